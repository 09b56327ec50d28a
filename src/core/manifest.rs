//! # Service Manifest
//!
//! The resolved ("printed") service configuration produced by the
//! infrastructure-as-code tool, reduced to what the gateway needs: the
//! provider defaults and each function's handler, runtime, timeout,
//! environment and `httpApi` events.
//!
//! Several manifest fragments may be supplied. They are merged first and then
//! turned into [`FunctionDescriptor`]s in one pass, so a problem in any
//! fragment fails the whole load.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{FunctionDescriptor, HandlerRef, RouteBinding, RouteMethod};

/// Merged service manifest
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceManifest {
    #[serde(default)]
    pub service: Option<String>,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub functions: FunctionsSection,
}

/// Provider-level defaults inherited by every function
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub runtime: Option<String>,

    /// Invocation timeout in seconds
    #[serde(default)]
    pub timeout: Option<f64>,

    #[serde(default)]
    pub environment: BTreeMap<String, Value>,

    #[serde(default)]
    pub stage: Option<String>,
}

/// `functions` as either a map or a list of single-entry maps
///
/// Older printers emit the list form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FunctionsSection {
    Map(BTreeMap<String, FunctionConfig>),
    List(Vec<BTreeMap<String, FunctionConfig>>),
}

impl Default for FunctionsSection {
    fn default() -> Self {
        FunctionsSection::Map(BTreeMap::new())
    }
}

impl FunctionsSection {
    fn into_entries(self) -> Vec<(String, FunctionConfig)> {
        match self {
            FunctionsSection::Map(map) => map.into_iter().collect(),
            FunctionsSection::List(list) => list.into_iter().flatten().collect(),
        }
    }
}

/// One function entry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FunctionConfig {
    #[serde(default)]
    pub handler: Option<String>,

    #[serde(default)]
    pub runtime: Option<String>,

    /// Invocation timeout in seconds
    #[serde(default)]
    pub timeout: Option<f64>,

    #[serde(default)]
    pub environment: BTreeMap<String, Value>,

    #[serde(default)]
    pub events: Vec<EventConfig>,
}

/// Function event; only `httpApi` events are routed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventConfig {
    HttpApi {
        #[serde(rename = "httpApi")]
        http_api: HttpApiEvent,
    },
    Other(Value),
}

/// `httpApi` event, detailed or `"METHOD /path"` shorthand
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HttpApiEvent {
    Detailed { method: String, path: String },
    Shorthand(String),
}

impl HttpApiEvent {
    fn to_binding(&self) -> GatewayResult<RouteBinding> {
        let (method, path) = match self {
            HttpApiEvent::Detailed { method, path } => (method.as_str(), path.as_str()),
            HttpApiEvent::Shorthand(route) => route.trim().split_once(' ').ok_or_else(|| {
                GatewayError::config(format!(
                    "Invalid httpApi route '{}': expected 'METHOD /path'",
                    route
                ))
            })?,
        };

        let path = path.trim();
        if path.is_empty() {
            return Err(GatewayError::config("httpApi route has an empty path"));
        }

        Ok(RouteBinding::new(method.parse::<RouteMethod>()?, path))
    }
}

impl ServiceManifest {
    /// Parse one manifest fragment (JSON, or YAML for `.yml`/`.yaml` files)
    pub async fn load_fragment<P: AsRef<Path>>(path: P) -> GatewayResult<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            GatewayError::config(format!("Failed to read manifest {}: {}", path.display(), e))
        })?;

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yml") | Some("yaml")
        );

        let manifest = if is_yaml {
            serde_yaml::from_str(&content).map_err(|e| {
                GatewayError::config(format!("Error parsing manifest {}: {}", path.display(), e))
            })?
        } else {
            serde_json::from_str(&content).map_err(|e| {
                GatewayError::config(format!("Error parsing manifest {}: {}", path.display(), e))
            })?
        };

        debug!(path = %path.display(), "Loaded manifest fragment");
        Ok(manifest)
    }

    /// Merge fragments in order
    ///
    /// Provider settings from later fragments override earlier ones field by
    /// field. A function name declared by two fragments is a configuration error.
    pub fn merge(fragments: Vec<ServiceManifest>) -> GatewayResult<Self> {
        let mut service = None;
        let mut provider = ProviderConfig::default();
        let mut functions: BTreeMap<String, FunctionConfig> = BTreeMap::new();

        for fragment in fragments {
            if fragment.service.is_some() {
                service = fragment.service;
            }

            let p = fragment.provider;
            if p.runtime.is_some() {
                provider.runtime = p.runtime;
            }
            if p.timeout.is_some() {
                provider.timeout = p.timeout;
            }
            if p.stage.is_some() {
                provider.stage = p.stage;
            }
            provider.environment.extend(p.environment);

            for (name, function) in fragment.functions.into_entries() {
                if functions.contains_key(&name) {
                    return Err(GatewayError::config(format!(
                        "Function '{}' is declared more than once",
                        name
                    )));
                }
                functions.insert(name, function);
            }
        }

        Ok(Self {
            service,
            provider,
            functions: FunctionsSection::Map(functions),
        })
    }

    /// Build immutable function descriptors
    ///
    /// Environment precedence: `overrides` (the env file) over the function's
    /// environment over the provider's. Every problem is reported at once.
    pub fn into_descriptors(
        self,
        functions_dir: &Path,
        overrides: &BTreeMap<String, String>,
        default_timeout: Duration,
    ) -> GatewayResult<Vec<FunctionDescriptor>> {
        let provider = self.provider;
        let mut descriptors = Vec::new();
        let mut errors = Vec::new();

        for (name, function) in self.functions.into_entries() {
            match build_descriptor(&name, function, &provider, functions_dir, overrides, default_timeout) {
                Ok(descriptor) => {
                    if descriptor.routes.is_empty() {
                        warn!(function = %name, "Function declares no httpApi events and will not be routed");
                    }
                    descriptors.push(descriptor);
                }
                Err(e) => errors.push(e.to_string()),
            }
        }

        if !errors.is_empty() {
            return Err(GatewayError::config(format!(
                "Invalid function configuration:\n{}",
                errors.join("\n")
            )));
        }

        Ok(descriptors)
    }
}

fn build_descriptor(
    name: &str,
    function: FunctionConfig,
    provider: &ProviderConfig,
    functions_dir: &Path,
    overrides: &BTreeMap<String, String>,
    default_timeout: Duration,
) -> GatewayResult<FunctionDescriptor> {
    let handler = function.handler.as_deref().ok_or_else(|| {
        GatewayError::config(format!("Function \"{}\" handler config not found.", name))
    })?;
    let handler = HandlerRef::parse(handler)?;

    let runtime = function
        .runtime
        .or_else(|| provider.runtime.clone())
        .ok_or_else(|| {
            GatewayError::config(format!(
                "Function \"{}\" runtime not specified, please configure a runtime for it.",
                name
            ))
        })?;

    let timeout = match function.timeout.or(provider.timeout) {
        Some(secs) => Duration::try_from_secs_f64(secs)
            .ok()
            .filter(|timeout| !timeout.is_zero())
            .ok_or_else(|| {
                GatewayError::config(format!(
                    "Function \"{}\" has an invalid timeout: {}",
                    name, secs
                ))
            })?,
        None => default_timeout,
    };

    let mut environment = stringify_environment(&provider.environment);
    environment.extend(stringify_environment(&function.environment));
    environment.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));

    let routes = function
        .events
        .iter()
        .filter_map(|event| match event {
            EventConfig::HttpApi { http_api } => Some(http_api.to_binding()),
            EventConfig::Other(_) => None,
        })
        .collect::<GatewayResult<Vec<_>>>()
        .map_err(|e| GatewayError::config(format!("Function \"{}\": {}", name, e)))?;

    Ok(FunctionDescriptor {
        name: name.to_string(),
        handler,
        runtime,
        code_dir: functions_dir.join(name),
        routes,
        environment,
        timeout,
    })
}

fn stringify_environment(env: &BTreeMap<String, Value>) -> BTreeMap<String, String> {
    env.iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (key.clone(), value)
        })
        .collect()
}

/// Parse a `KEY=VALUE` environment file
///
/// Blank lines and lines starting with `#` are skipped. Keys and values are
/// trimmed.
pub fn read_env_file(path: &Path) -> GatewayResult<BTreeMap<String, String>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        GatewayError::config(format!("Failed to read env file {}: {}", path.display(), e))
    })?;
    parse_env(&content)
}

fn parse_env(content: &str) -> GatewayResult<BTreeMap<String, String>> {
    let mut env = BTreeMap::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = line.split_once('=').ok_or_else(|| {
            GatewayError::config(format!("incorrect environment variable format: \"{}\"", line))
        })?;

        env.insert(key.trim().to_string(), value.trim().to_string());
    }

    Ok(env)
}

/// Default manifest path: `./serverless.json`
pub fn default_manifest_path() -> PathBuf {
    PathBuf::from("serverless.json")
}
