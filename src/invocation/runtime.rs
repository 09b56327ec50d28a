//! # Runtime Registry
//!
//! Maps runtime identifiers (`python3.12`, `nodejs20.x`, ...) to the container
//! image that hosts them, the source file extensions a handler may use, and
//! the command line of the runtime shim inside the image.
//!
//! The shim is an external collaborator: it reads one invocation event on
//! stdin, calls the handler and prints the result as the last stdout line.
//! Its command line is configurable per runtime; `{handler}` is replaced by
//! the handler reference (`<file>.<export>`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::error::{GatewayError, GatewayResult};

/// Placeholder substituted with the handler reference in shim commands
pub const HANDLER_PLACEHOLDER: &str = "{handler}";

const DEFAULT_SHIM: &str = "/usr/local/bin/gateway-shim";

/// How to run functions of one runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeSpec {
    /// Container image providing the language runtime and the shim
    pub image: String,

    /// Handler source extensions, tried in order (without the dot)
    pub extensions: Vec<String>,

    /// Shim command line executed inside the sandbox for each invocation
    pub shim: Vec<String>,
}

impl RuntimeSpec {
    fn new(image: String, extensions: &[&str]) -> Self {
        Self {
            image,
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
            shim: vec![DEFAULT_SHIM.to_string(), HANDLER_PLACEHOLDER.to_string()],
        }
    }

    /// Shim command with the handler substituted
    pub fn shim_command(&self, handler: &str) -> Vec<String> {
        self.shim
            .iter()
            .map(|arg| arg.replace(HANDLER_PLACEHOLDER, handler))
            .collect()
    }

    fn validate(&self, id: &str, errors: &mut Vec<String>) {
        if self.image.trim().is_empty() {
            errors.push(format!("Runtime '{}' has an empty image", id));
        }
        if self.extensions.is_empty() {
            errors.push(format!("Runtime '{}' declares no handler extensions", id));
        }
        if self.shim.is_empty() {
            errors.push(format!("Runtime '{}' has an empty shim command", id));
        }
    }
}

/// Registry of supported runtimes
#[derive(Debug, Clone)]
pub struct RuntimeRegistry {
    specs: BTreeMap<String, RuntimeSpec>,
}

impl RuntimeRegistry {
    /// Built-in runtimes backed by the public Lambda base images
    pub fn builtin() -> Self {
        let mut specs = BTreeMap::new();

        for minor in 8..=13 {
            specs.insert(
                format!("python3.{}", minor),
                RuntimeSpec::new(format!("public.ecr.aws/lambda/python:3.{}", minor), &["py"]),
            );
        }

        for major in [16, 18, 20, 22] {
            specs.insert(
                format!("nodejs{}.x", major),
                RuntimeSpec::new(
                    format!("public.ecr.aws/lambda/nodejs:{}", major),
                    &["js", "mjs", "cjs"],
                ),
            );
        }

        Self { specs }
    }

    /// Built-ins extended (or replaced, per identifier) by configured runtimes
    pub fn with_overrides(overrides: &BTreeMap<String, RuntimeSpec>) -> GatewayResult<Self> {
        let mut registry = Self::builtin();
        let mut errors = Vec::new();

        for (id, spec) in overrides {
            spec.validate(id, &mut errors);
            registry.specs.insert(id.clone(), spec.clone());
        }

        if !errors.is_empty() {
            return Err(GatewayError::config(format!(
                "Invalid runtime configuration:\n{}",
                errors.join("\n")
            )));
        }

        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Option<&RuntimeSpec> {
        self.specs.get(id)
    }

    pub fn is_supported(&self, id: &str) -> bool {
        self.specs.contains_key(id)
    }

    /// Supported runtime identifiers, sorted
    pub fn supported(&self) -> Vec<&str> {
        self.specs.keys().map(String::as_str).collect()
    }
}

impl Default for RuntimeRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
