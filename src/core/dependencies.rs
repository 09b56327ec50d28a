//! # Startup Dependency Checks
//!
//! The gateway refuses to start when the container engine is unreachable, a
//! runtime image in use is missing, or an image lacks its runtime shim. Checks
//! run once, before the listener is bound.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{error, info};

use crate::core::error::GatewayResult;
use crate::invocation::engine::ContainerEngine;
use crate::invocation::runtime::RuntimeRegistry;
use crate::routing::router::RouteTable;

/// Runtime images needed by the loaded functions, each with the shim
/// executables it must provide
///
/// Only absolute shim paths are listed; bare names resolve through the
/// image's `PATH` when the shim runs.
pub fn required_images(
    routes: &RouteTable,
    runtimes: &RuntimeRegistry,
) -> BTreeMap<String, BTreeSet<String>> {
    let mut images: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for spec in routes
        .functions()
        .iter()
        .filter_map(|function| runtimes.get(&function.runtime))
    {
        let shims = images.entry(spec.image.clone()).or_default();
        if let Some(shim) = spec.shim.first().filter(|s| Path::new(s.as_str()).is_absolute()) {
            shims.insert(shim.clone());
        }
    }
    images
}

/// Verify the engine is reachable, every image is present and ships its shim
///
/// Missing images are pulled when `pull_missing` is set.
pub async fn check_dependencies(
    engine: &dyn ContainerEngine,
    images: &BTreeMap<String, BTreeSet<String>>,
    pull_missing: bool,
) -> GatewayResult<()> {
    engine.check_available().await.map_err(|e| {
        error!("{}", e);
        e
    })?;
    info!(engine = engine.name(), "Container engine available");

    for (image, shims) in images {
        engine.ensure_image(image, pull_missing).await.map_err(|e| {
            error!(image = %image, "{}", e);
            e
        })?;

        for shim in shims {
            engine.ensure_executable(image, shim).await.map_err(|e| {
                error!(image = %image, shim = %shim, "{}", e);
                e
            })?;
        }
        info!(image = %image, "Runtime image available");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::GatewayError;
    use crate::invocation::engine::{ContainerId, ExecOutput, SandboxSpec};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct StubEngine {
        available: bool,
        present: Vec<String>,
        missing_shims: Vec<String>,
        pulled: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ContainerEngine for StubEngine {
        fn name(&self) -> &str {
            "stub"
        }

        async fn check_available(&self) -> GatewayResult<()> {
            if self.available {
                Ok(())
            } else {
                Err(GatewayError::dependency("stub", "command not found"))
            }
        }

        async fn ensure_image(&self, image: &str, pull: bool) -> GatewayResult<()> {
            if self.present.iter().any(|i| i == image) {
                Ok(())
            } else if pull {
                self.pulled.lock().push(image.to_string());
                Ok(())
            } else {
                Err(GatewayError::dependency(format!("runtime image {}", image), "not present"))
            }
        }

        async fn ensure_executable(&self, image: &str, path: &str) -> GatewayResult<()> {
            if self.missing_shims.iter().any(|p| p == path) {
                Err(GatewayError::dependency(
                    format!("runtime shim {} in {}", path, image),
                    "not found or not executable",
                ))
            } else {
                Ok(())
            }
        }

        async fn create(&self, _spec: &SandboxSpec) -> GatewayResult<ContainerId> {
            unreachable!("not used by dependency checks")
        }

        async fn exec(&self, _: &ContainerId, _: &[String], _: Vec<u8>) -> GatewayResult<ExecOutput> {
            unreachable!("not used by dependency checks")
        }

        async fn destroy(&self, _container: &ContainerId) -> GatewayResult<()> {
            Ok(())
        }
    }

    fn images(list: &[&str]) -> BTreeMap<String, BTreeSet<String>> {
        list.iter()
            .map(|s| (s.to_string(), BTreeSet::from(["/shim".to_string()])))
            .collect()
    }

    #[tokio::test]
    async fn test_unreachable_engine_names_dependency() {
        let engine = StubEngine::default();
        let err = check_dependencies(&engine, &images(&[]), false).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("Missing dependency \"stub\""));
    }

    #[tokio::test]
    async fn test_missing_image_fails_without_pull() {
        let engine = StubEngine {
            available: true,
            present: vec!["a".to_string()],
            ..StubEngine::default()
        };
        let err = check_dependencies(&engine, &images(&["a", "b"]), false)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("runtime image b"));
    }

    #[tokio::test]
    async fn test_missing_image_is_pulled_when_enabled() {
        let engine = StubEngine {
            available: true,
            ..StubEngine::default()
        };
        check_dependencies(&engine, &images(&["a"]), true).await.unwrap();
        assert_eq!(*engine.pulled.lock(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_image_without_shim_is_fatal() {
        let engine = StubEngine {
            available: true,
            present: vec!["a".to_string()],
            missing_shims: vec!["/shim".to_string()],
            ..StubEngine::default()
        };
        let err = check_dependencies(&engine, &images(&["a"]), false)
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(err, GatewayError::Dependency { .. }));
        assert!(err.to_string().contains("runtime shim /shim in a"));
    }

    #[test]
    fn test_required_images_list_absolute_shims_only() {
        use crate::core::types::{FunctionDescriptor, HandlerRef};
        use crate::invocation::runtime::RuntimeSpec;
        use std::time::Duration;
        use tempfile::TempDir;

        let dir = TempDir::new().unwrap();
        let function = |name: &str, runtime: &str| {
            let code_dir = dir.path().join(name);
            std::fs::create_dir_all(&code_dir).unwrap();
            std::fs::write(code_dir.join("handler.sh"), "").unwrap();
            std::fs::write(code_dir.join("handler.py"), "").unwrap();
            FunctionDescriptor {
                name: name.to_string(),
                handler: HandlerRef::parse("handler.main").unwrap(),
                runtime: runtime.to_string(),
                code_dir,
                routes: vec![],
                environment: BTreeMap::new(),
                timeout: Duration::from_secs(3),
            }
        };

        let mut overrides = BTreeMap::new();
        overrides.insert(
            "custom".to_string(),
            RuntimeSpec {
                image: "my/custom:latest".to_string(),
                extensions: vec!["sh".to_string()],
                shim: vec!["bootstrap".to_string(), "{handler}".to_string()],
            },
        );
        let runtimes = RuntimeRegistry::with_overrides(&overrides).unwrap();
        let routes = RouteTable::load(
            vec![function("py", "python3.12"), function("sh", "custom")],
            &runtimes,
        )
        .unwrap();

        let images = required_images(&routes, &runtimes);
        assert_eq!(images.len(), 2);
        assert!(images["my/custom:latest"].is_empty());
        let python = &images["public.ecr.aws/lambda/python:3.12"];
        assert_eq!(python.len(), 1);
        assert!(python.iter().all(|shim| shim.starts_with('/')));
    }
}
