//! Shared fixtures for the integration suites
//!
//! `FakeEngine` stands in for the container engine. What a sandbox does when
//! invoked depends only on the function it was created for, so every suite
//! can drive the gateway without a container runtime.

#![allow(dead_code)]

use async_trait::async_trait;
use axum_test::TestServer;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use function_gateway::core::config::{EngineConfig, PoolConfig, ServerConfig};
use function_gateway::core::manifest::ServiceManifest;
use function_gateway::gateway::server::{build_app, GatewayContext};
use function_gateway::invocation::engine::{ContainerEngine, ContainerId, ExecOutput, SandboxSpec};
use function_gateway::invocation::event::InvocationEvent;
use function_gateway::invocation::runtime::RuntimeRegistry;
use function_gateway::invocation::sandbox::SandboxPool;
use function_gateway::routing::router::RouteTable;
use function_gateway::{GatewayError, GatewayResult};

/// Container engine double scripted per function name
///
/// - `echo`, `binary`: structured response mirroring the request body
/// - `sleepy`: never answers within any sane timeout
/// - `crash`: exits 1 with a traceback on stderr
/// - `raise`: exits 1 after printing a shim error object
/// - `malformed`: prints a line that is not JSON
/// - `slow`: answers after 100ms with the sandbox id
/// - anything else: returns a summary of the event without a `statusCode`
///
/// `stall_creates(true)` makes every sandbox start hang until turned off.
#[derive(Default)]
pub struct FakeEngine {
    next_id: AtomicUsize,
    stall_create: AtomicBool,
    pub created: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub execs: AtomicUsize,
    owners: Mutex<HashMap<String, String>>,
}

impl FakeEngine {
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn execs(&self) -> usize {
        self.execs.load(Ordering::SeqCst)
    }

    pub fn stall_creates(&self, stall: bool) {
        self.stall_create.store(stall, Ordering::SeqCst);
    }
}

fn ok(stdout: impl Into<Vec<u8>>) -> ExecOutput {
    ExecOutput {
        exit_code: 0,
        stdout: stdout.into(),
        stderr: Vec::new(),
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    fn name(&self) -> &str {
        "fake"
    }

    async fn check_available(&self) -> GatewayResult<()> {
        Ok(())
    }

    async fn ensure_image(&self, _image: &str, _pull: bool) -> GatewayResult<()> {
        Ok(())
    }

    async fn ensure_executable(&self, _image: &str, _path: &str) -> GatewayResult<()> {
        Ok(())
    }

    async fn create(&self, spec: &SandboxSpec) -> GatewayResult<ContainerId> {
        if self.stall_create.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let id = format!("fake-{:04}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.owners.lock().insert(id.clone(), spec.function.clone());
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(ContainerId(id))
    }

    async fn exec(
        &self,
        container: &ContainerId,
        _command: &[String],
        stdin: Vec<u8>,
    ) -> GatewayResult<ExecOutput> {
        self.execs.fetch_add(1, Ordering::SeqCst);
        let function = self
            .owners
            .lock()
            .get(&container.0)
            .cloned()
            .ok_or_else(|| GatewayError::internal(format!("unknown container {}", container.0)))?;
        let event: InvocationEvent = serde_json::from_slice(&stdin)?;

        let output = match function.as_str() {
            "echo" | "binary" => {
                let content_type = event
                    .headers
                    .get("content-type")
                    .cloned()
                    .unwrap_or_else(|| "text/plain".to_string());
                let reply = json!({
                    "statusCode": 200,
                    "headers": { "content-type": content_type },
                    "body": event.body,
                    "isBase64Encoded": event.is_base64_encoded,
                });
                ok(format!("START\n{}\n", reply))
            }
            "sleepy" => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                ok("null")
            }
            "crash" => ExecOutput {
                exit_code: 1,
                stdout: Vec::new(),
                stderr: b"Traceback (most recent call last):\nZeroDivisionError: division by zero\n"
                    .to_vec(),
            },
            "raise" => ExecOutput {
                exit_code: 1,
                stdout: br#"{"errorMessage": "boom", "errorType": "ValueError", "stackTrace": []}"#
                    .to_vec(),
                stderr: Vec::new(),
            },
            "malformed" => ok("hello from print()\nthis is not json\n"),
            "slow" => {
                tokio::time::sleep(Duration::from_millis(100)).await;
                ok(json!({ "sandbox": container.0 }).to_string())
            }
            _ => ok(json!({
                "routeKey": event.route_key,
                "rawPath": event.raw_path,
                "pathParameters": event.path_parameters,
                "query": event.query_string_parameters,
                "stage": event.request_context.stage,
            })
            .to_string()),
        };

        Ok(output)
    }

    async fn destroy(&self, container: &ContainerId) -> GatewayResult<()> {
        self.owners.lock().remove(&container.0);
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Manifest with one function per scripted behavior
pub fn standard_manifest() -> Value {
    json!({
        "service": "integration",
        "provider": { "runtime": "python3.12", "timeout": 3 },
        "functions": {
            "echo": {
                "handler": "handler.main",
                "events": [
                    { "httpApi": { "method": "GET", "path": "/echo" } },
                    { "httpApi": "POST /echo" }
                ]
            },
            "items": {
                "handler": "handler.main",
                "events": [{ "httpApi": { "method": "GET", "path": "/items/{id}" } }]
            },
            "files": {
                "handler": "handler.main",
                "events": [{ "httpApi": { "method": "*", "path": "/files/{proxy+}" } }]
            },
            "binary": {
                "handler": "handler.main",
                "events": [{ "httpApi": "POST /binary" }]
            },
            "sleepy": {
                "handler": "handler.main",
                "timeout": 0.2,
                "events": [{ "httpApi": "GET /sleepy" }]
            },
            "crash": {
                "handler": "handler.main",
                "events": [{ "httpApi": "GET /crash" }]
            },
            "raise": {
                "handler": "handler.main",
                "events": [{ "httpApi": "GET /raise" }]
            },
            "malformed": {
                "handler": "handler.main",
                "events": [{ "httpApi": "GET /malformed" }]
            },
            "slow": {
                "handler": "handler.main",
                "events": [{ "httpApi": "GET /slow" }]
            },
            "worker": {
                "handler": "handler.main",
                "events": [{ "schedule": "rate(5 minutes)" }]
            }
        }
    })
}

/// Create `<dir>/<function>/handler.py` for every function in `manifest`
pub fn write_handlers(dir: &Path, manifest: &Value) {
    let functions = manifest["functions"].as_object().cloned().unwrap_or_default();
    for name in functions.keys() {
        let code_dir = dir.join(name);
        std::fs::create_dir_all(&code_dir).unwrap();
        std::fs::write(code_dir.join("handler.py"), "def main(event, context):\n    return event\n")
            .unwrap();
    }
}

/// Route table built from `manifest` against code directories under `dir`
pub fn route_table(dir: &Path, manifest: Value) -> GatewayResult<RouteTable> {
    let manifest: ServiceManifest = serde_json::from_value(manifest)?;
    let descriptors = manifest.into_descriptors(dir, &BTreeMap::new(), Duration::from_secs(3))?;
    RouteTable::load(descriptors, &RuntimeRegistry::builtin())
}

pub struct Harness {
    pub server: TestServer,
    pub engine: Arc<FakeEngine>,
    pub pools: Arc<SandboxPool>,
    pub context: GatewayContext,
    _dir: TempDir,
}

pub fn test_server_config() -> ServerConfig {
    ServerConfig {
        port: 0,
        max_body_size: 1024,
        ..ServerConfig::default()
    }
}

/// Engine settings with a sandbox start limit short enough for tests
pub fn test_engine_config() -> EngineConfig {
    EngineConfig {
        create_timeout: Duration::from_millis(300),
        ..EngineConfig::default()
    }
}

/// Build a gateway over the standard manifest
pub fn harness(pool: PoolConfig) -> Harness {
    harness_with(standard_manifest(), pool, test_server_config())
}

pub fn harness_with(manifest: Value, pool: PoolConfig, server: ServerConfig) -> Harness {
    let (context, engine, dir) = context_with(manifest, pool, &server);
    let app = build_app(context.clone(), server.cors);
    Harness {
        server: TestServer::new(app).unwrap(),
        engine,
        pools: Arc::clone(context.pools()),
        context,
        _dir: dir,
    }
}

/// Gateway context over `manifest`, backed by a fresh `FakeEngine`
pub fn context_with(
    manifest: Value,
    pool: PoolConfig,
    server: &ServerConfig,
) -> (GatewayContext, Arc<FakeEngine>, TempDir) {
    let dir = TempDir::new().unwrap();
    write_handlers(dir.path(), &manifest);

    let routes = Arc::new(route_table(dir.path(), manifest).unwrap());
    let engine = Arc::new(FakeEngine::default());
    let pools = Arc::new(
        SandboxPool::new(
            engine.clone(),
            routes.functions(),
            &RuntimeRegistry::builtin(),
            &test_engine_config(),
            &pool,
        )
        .unwrap(),
    );

    (GatewayContext::new(routes, pools, server), engine, dir)
}

pub fn base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}
