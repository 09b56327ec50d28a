//! # Invocation Dispatcher
//!
//! Runs one invocation end to end: lease a sandbox, execute the runtime shim
//! with the serialized event on stdin, wait for it under the function's
//! timeout and classify what came back.
//!
//! The timeout bounds the execution only. Time spent queued for a sandbox or
//! creating one is not counted against it.

use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::invocation::engine::ExecOutput;
use crate::invocation::event::InvocationEvent;
use crate::invocation::response::{
    error_object, last_line, parse_output, InvocationFailure, InvocationResult,
};
use crate::invocation::sandbox::SandboxPool;
use crate::observability::metrics;
use crate::routing::router::RouteMatch;

const STDERR_TAIL: usize = 2048;

/// Delivers invocation events to function sandboxes
#[derive(Debug, Clone)]
pub struct Dispatcher {
    pools: Arc<SandboxPool>,
}

impl Dispatcher {
    pub fn new(pools: Arc<SandboxPool>) -> Self {
        Self { pools }
    }

    pub fn pools(&self) -> &Arc<SandboxPool> {
        &self.pools
    }

    /// Invoke the matched function with `event`
    ///
    /// Never fails: every problem is reported as an `InvocationResult::Failure`.
    pub async fn dispatch(&self, route: &RouteMatch, event: &InvocationEvent) -> InvocationResult {
        let function = &route.function;
        let request_id = event.request_context.request_id.as_str();
        let started = Instant::now();

        let payload = match serde_json::to_vec(event) {
            Ok(payload) => payload,
            Err(e) => {
                return InvocationResult::Failure(InvocationFailure::crash(
                    "Gateway.SerializationError",
                    e.to_string(),
                ))
            }
        };

        let lease = match self.pools.acquire(&function.name).await {
            Ok(lease) => lease,
            Err(e) => {
                warn!(
                    function = %function.name,
                    request_id = %request_id,
                    error = %e,
                    "Could not obtain a sandbox"
                );
                let result = InvocationResult::Failure(InvocationFailure::crash(
                    "Sandbox.CreateError",
                    e.to_string(),
                ));
                metrics::invocation_finished(&function.name, result.outcome(), started.elapsed());
                return result;
            }
        };

        let cold_start = lease.cold_start();
        let sandbox_id = lease.sandbox().id.clone();
        let exec_started = Instant::now();

        let result = match tokio::time::timeout(function.timeout, lease.exec(payload)).await {
            Err(_) => {
                // The exec future is dropped here, which kills the engine client
                lease.discard();
                InvocationResult::Failure(InvocationFailure::Timeout {
                    timeout_ms: function.timeout_ms(),
                })
            }
            Ok(Err(e)) => {
                lease.discard();
                InvocationResult::Failure(InvocationFailure::crash("Sandbox.ExecError", e.to_string()))
            }
            Ok(Ok(output)) => {
                let result = classify(&output);
                match &result {
                    InvocationResult::Failure(failure) if failure.poisons_sandbox() => lease.discard(),
                    _ => lease.release(),
                }
                result
            }
        };

        let duration = exec_started.elapsed();
        metrics::invocation_finished(&function.name, result.outcome(), duration);

        match &result {
            InvocationResult::Success(response) => info!(
                function = %function.name,
                route_key = %route.route_key,
                request_id = %request_id,
                sandbox_id = %sandbox_id,
                cold_start,
                duration_ms = duration.as_millis() as u64,
                status = response.status.as_u16(),
                outcome = result.outcome(),
                "Invocation completed"
            ),
            InvocationResult::Failure(failure) => warn!(
                function = %function.name,
                route_key = %route.route_key,
                request_id = %request_id,
                sandbox_id = %sandbox_id,
                cold_start,
                duration_ms = duration.as_millis() as u64,
                outcome = result.outcome(),
                failure = ?failure,
                "Invocation failed"
            ),
        }

        result
    }
}

/// Classify a finished shim run
///
/// A non-zero exit is a crash described by the shim's error object when it
/// printed one, else by the stderr tail, else by the exit code. A zero exit is
/// handed to the response translator.
pub fn classify(output: &ExecOutput) -> InvocationResult {
    if output.success() {
        return parse_output(&output.stdout);
    }

    let shim_error = last_line(&output.stdout)
        .and_then(|line| serde_json::from_str::<Value>(&line).ok())
        .and_then(|value| error_object(&value));

    let failure = match shim_error {
        Some((error_type, message)) => InvocationFailure::crash(error_type, message),
        None => {
            let tail = output.stderr_tail(STDERR_TAIL);
            let message = if tail.is_empty() {
                format!("Runtime exited with status {}", output.exit_code)
            } else {
                tail
            };
            InvocationFailure::crash("Runtime.ExitError", message)
        }
    };

    InvocationResult::Failure(failure)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(exit_code: i32, stdout: &str, stderr: &str) -> ExecOutput {
        ExecOutput {
            exit_code,
            stdout: stdout.as_bytes().to_vec(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }

    fn failure(result: InvocationResult) -> InvocationFailure {
        match result {
            InvocationResult::Failure(f) => f,
            InvocationResult::Success(r) => panic!("expected failure, got {:?}", r),
        }
    }

    #[test]
    fn test_successful_exit_is_parsed() {
        let result = classify(&output(0, "START\n{\"statusCode\":200,\"body\":\"ok\"}\n", ""));
        assert_eq!(result.outcome(), "success");
    }

    #[test]
    fn test_nonzero_exit_uses_shim_error_object() {
        let f = failure(classify(&output(
            1,
            r#"{"errorType":"KeyError","errorMessage":"'id'","stackTrace":[]}"#,
            "Traceback ...",
        )));
        assert_eq!(f, InvocationFailure::crash("KeyError", "'id'"));
    }

    #[test]
    fn test_nonzero_exit_falls_back_to_stderr_then_code() {
        let f = failure(classify(&output(2, "", "segfault\n")));
        assert_eq!(f, InvocationFailure::crash("Runtime.ExitError", "segfault"));

        let f = failure(classify(&output(137, "", "")));
        assert_eq!(
            f,
            InvocationFailure::crash("Runtime.ExitError", "Runtime exited with status 137")
        );
    }

    #[test]
    fn test_malformed_output_does_not_poison() {
        let f = failure(classify(&output(0, "not json at all", "")));
        assert_eq!(f.kind(), "malformed-output");
        assert!(!f.poisons_sandbox());
    }
}
