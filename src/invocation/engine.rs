//! # Container Engine Module
//!
//! The gateway never runs function code itself. It asks an external container
//! engine to start a long-lived sandbox per function instance and then runs the
//! runtime shim inside that sandbox once per invocation.
//!
//! ## Rust Concepts Used
//!
//! - `async_trait` for async methods in the `ContainerEngine` trait
//! - `tokio::process::Command` with `kill_on_drop` so a cancelled invocation
//!   never leaves an orphaned engine client behind
//! - `tokio::try_join!` to feed stdin while collecting output

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::core::config::EngineConfig;
use crate::core::error::{GatewayError, GatewayResult};

/// Mount point of the function code inside the sandbox
pub const TASK_DIR: &str = "/var/task";

/// Mount point of the layer directory inside the sandbox
pub const LAYER_DIR: &str = "/opt";

/// Engine-assigned container identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerId(pub String);

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form, like `docker ps`
        let short: String = self.0.chars().take(12).collect();
        write!(f, "{}", short)
    }
}

/// Everything the engine needs to start one sandbox
#[derive(Debug, Clone)]
pub struct SandboxSpec {
    /// Owning function
    pub function: String,

    /// Runtime image
    pub image: String,

    /// Host directory mounted read-only at `/var/task`
    pub code_dir: PathBuf,

    /// Host directory mounted read-only at `/opt`
    pub layer_dir: Option<PathBuf>,

    /// Engine network to join
    pub network: Option<String>,

    /// Environment visible to the function
    pub environment: BTreeMap<String, String>,

    /// Container labels
    pub labels: BTreeMap<String, String>,

    /// Command keeping the sandbox alive between invocations
    pub keepalive: Vec<String>,
}

/// Captured result of one command run inside a sandbox
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    /// Exit status; `-1` when the process was killed by a signal
    pub exit_code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Last `max` characters of stderr, for failure messages
    pub fn stderr_tail(&self, max: usize) -> String {
        let text = String::from_utf8_lossy(&self.stderr);
        let text = text.trim();
        let count = text.chars().count();
        if count <= max {
            text.to_string()
        } else {
            text.chars().skip(count - max).collect()
        }
    }
}

/// Control interface of the container engine
///
/// Implementations must be safe to share between request tasks.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Engine name used in diagnostics
    fn name(&self) -> &str;

    /// Verify the engine is installed and reachable
    async fn check_available(&self) -> GatewayResult<()>;

    /// Verify an image is present locally, pulling it when `pull` is set
    async fn ensure_image(&self, image: &str, pull: bool) -> GatewayResult<()>;

    /// Verify `path` exists and is executable inside `image`
    async fn ensure_executable(&self, image: &str, path: &str) -> GatewayResult<()>;

    /// Start a sandbox and return its container id
    async fn create(&self, spec: &SandboxSpec) -> GatewayResult<ContainerId>;

    /// Run `command` inside the sandbox with `stdin` as its standard input
    ///
    /// Dropping the returned future must stop the command.
    async fn exec(
        &self,
        container: &ContainerId,
        command: &[String],
        stdin: Vec<u8>,
    ) -> GatewayResult<ExecOutput>;

    /// Forcefully remove a sandbox
    async fn destroy(&self, container: &ContainerId) -> GatewayResult<()>;
}

/// `ContainerEngine` backed by the `docker` command line client
///
/// Any Docker-compatible CLI (for example `podman`) works through
/// `engine.binary`.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    binary: String,
}

impl DockerEngine {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.binary.clone())
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, err: std::io::Error) -> GatewayError {
        if err.kind() == ErrorKind::NotFound {
            GatewayError::dependency(
                &self.binary,
                "command not found. Please install it and retry.",
            )
        } else {
            GatewayError::from(err)
        }
    }

    /// Run a control command and return its trimmed stdout
    async fn run(&self, args: Vec<String>) -> GatewayResult<String> {
        debug!(engine = %self.binary, args = ?args, "Running engine command");

        let output = self
            .command(&args)
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GatewayError::internal(format!(
                "{} {} failed: {}",
                self.binary,
                args.first().map(String::as_str).unwrap_or_default(),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Arguments of the `run` command that starts a sandbox
pub fn run_args(spec: &SandboxSpec, name: &str) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        name.to_string(),
        "-v".to_string(),
        format!("{}:{}:ro,delegated", spec.code_dir.display(), TASK_DIR),
    ];

    if let Some(layer) = &spec.layer_dir {
        args.push("-v".to_string());
        args.push(format!("{}:{}:ro,delegated", layer.display(), LAYER_DIR));
    }

    if let Some(network) = &spec.network {
        args.push("--network".to_string());
        args.push(network.clone());
    }

    for (key, value) in &spec.labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }

    for (key, value) in &spec.environment {
        args.push("-e".to_string());
        args.push(format!("{}={}", key, value));
    }

    // The runtime images ship their own entrypoint; replace it with the keepalive
    let mut keepalive = spec.keepalive.iter();
    if let Some(entrypoint) = keepalive.next() {
        args.push("--entrypoint".to_string());
        args.push(entrypoint.clone());
    }

    args.push(spec.image.clone());
    args.extend(keepalive.cloned());
    args
}

/// Arguments of a throwaway `run` that exits 0 only if `path` is executable
pub fn executable_check_args(image: &str, path: &str) -> Vec<String> {
    vec![
        "run".to_string(),
        "--rm".to_string(),
        "--entrypoint".to_string(),
        "test".to_string(),
        image.to_string(),
        "-x".to_string(),
        path.to_string(),
    ]
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    fn name(&self) -> &str {
        &self.binary
    }

    async fn check_available(&self) -> GatewayResult<()> {
        self.run(vec![
            "version".to_string(),
            "--format".to_string(),
            "{{.Server.Version}}".to_string(),
        ])
        .await
        .map(|version| debug!(engine = %self.binary, version = %version, "Container engine reachable"))
        .map_err(|e| match e {
            GatewayError::Dependency { .. } => e,
            other => GatewayError::dependency(&self.binary, other.to_string()),
        })
    }

    async fn ensure_image(&self, image: &str, pull: bool) -> GatewayResult<()> {
        let inspect = self
            .run(vec!["image".to_string(), "inspect".to_string(), image.to_string()])
            .await;

        match inspect {
            Ok(_) => Ok(()),
            Err(e @ GatewayError::Dependency { .. }) => Err(e),
            Err(_) if pull => {
                warn!(image = %image, "Runtime image not present locally, pulling");
                self.run(vec!["pull".to_string(), image.to_string()])
                    .await
                    .map(|_| ())
                    .map_err(|e| {
                        GatewayError::dependency(format!("runtime image {}", image), e.to_string())
                    })
            }
            Err(_) => Err(GatewayError::dependency(
                format!("runtime image {}", image),
                format!("not present locally; run `{} pull {}`", self.binary, image),
            )),
        }
    }

    async fn ensure_executable(&self, image: &str, path: &str) -> GatewayResult<()> {
        match self.run(executable_check_args(image, path)).await {
            Ok(_) => Ok(()),
            Err(e @ GatewayError::Dependency { .. }) => Err(e),
            Err(_) => Err(GatewayError::dependency(
                format!("runtime shim {} in {}", path, image),
                "not found or not executable; point the runtime's `shim` setting at the shim inside the image",
            )),
        }
    }

    async fn create(&self, spec: &SandboxSpec) -> GatewayResult<ContainerId> {
        let name = format!(
            "{}-{}",
            sanitize_name(&spec.function),
            &uuid::Uuid::new_v4().simple().to_string()[..12]
        );

        let id = self.run(run_args(spec, &name)).await?;
        if id.is_empty() {
            return Err(GatewayError::internal(format!(
                "{} run returned no container id",
                self.binary
            )));
        }

        Ok(ContainerId(id))
    }

    async fn exec(
        &self,
        container: &ContainerId,
        command: &[String],
        stdin: Vec<u8>,
    ) -> GatewayResult<ExecOutput> {
        let mut args = vec![
            "exec".to_string(),
            "-i".to_string(),
            "-w".to_string(),
            TASK_DIR.to_string(),
            container.0.clone(),
        ];
        args.extend(command.iter().cloned());

        let mut child = self
            .command(&args)
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let mut pipe = child
            .stdin
            .take()
            .ok_or_else(|| GatewayError::internal("sandbox stdin unavailable"))?;

        let feed = async move {
            // A shim that exits without reading stdin closes the pipe early
            match pipe.write_all(&stdin).await {
                Err(e) if e.kind() != ErrorKind::BrokenPipe => Err(e),
                _ => Ok(()),
            }
        };

        let ((), output) = tokio::try_join!(feed, child.wait_with_output())?;

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn destroy(&self, container: &ContainerId) -> GatewayResult<()> {
        self.run(vec!["rm".to_string(), "-f".to_string(), container.0.clone()])
            .await
            .map(|_| ())
    }
}

/// Container names allow `[a-zA-Z0-9_.-]`
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-' { c } else { '-' })
        .collect();
    format!("fngw-{}", cleaned.trim_matches('-'))
}
