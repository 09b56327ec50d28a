//! # Router Module
//!
//! The route table maps `(HTTP method, path pattern)` pairs to the function that
//! serves them. It is built once at startup from the function descriptors and
//! never mutated afterwards, so request tasks share it without locking.
//!
//! Path patterns use the cloud gateway's syntax: `{param}` captures one
//! segment and `{param+}` captures the rest of the path. Internally every
//! pattern is translated to `matchit` syntax and stored in a radix tree per
//! method, plus one tree for `ANY` routes.
//!
//! ## Rust Concepts Used
//!
//! - `matchit` crate provides the radix tree implementation for route matching
//! - `Arc<T>` shares function descriptors with the sandbox pools
//! - `Ordering` on per-segment specificity picks the most specific route

use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::{FunctionDescriptor, RouteBinding, RouteMethod};
use crate::invocation::runtime::RuntimeRegistry;
use axum::http::Method;
use matchit::Router as RadixRouter;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// One declared route
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub binding: RouteBinding,

    /// `"METHOD /pattern"`, as reported in the invocation event
    pub route_key: String,

    pub function: Arc<FunctionDescriptor>,
}

/// Result of a successful route lookup
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub function: Arc<FunctionDescriptor>,

    pub route_key: String,

    /// Declared path pattern (e.g. `/items/{id}`)
    pub pattern: String,

    /// Percent-decoded path parameters keyed by their declared names
    pub path_params: BTreeMap<String, String>,
}

/// Immutable route table
pub struct RouteTable {
    routes: Vec<RouteEntry>,
    functions: Vec<Arc<FunctionDescriptor>>,
    by_method: HashMap<Method, RadixRouter<usize>>,
    any: RadixRouter<usize>,
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTable")
            .field("routes", &self.routes.len())
            .field("functions", &self.functions.len())
            .finish()
    }
}

impl RouteTable {
    /// Validate descriptors and build the table
    ///
    /// Fails on an unsupported runtime, an unresolvable handler, a duplicate
    /// `(method, normalized path)` pair or a pattern the matcher rejects. All
    /// problems are reported in one error.
    pub fn load(
        descriptors: Vec<FunctionDescriptor>,
        runtimes: &RuntimeRegistry,
    ) -> GatewayResult<Self> {
        let mut errors = Vec::new();
        let mut table = Self {
            routes: Vec::new(),
            functions: Vec::new(),
            by_method: HashMap::new(),
            any: RadixRouter::new(),
        };
        let mut seen: HashMap<(String, String), String> = HashMap::new();

        for descriptor in descriptors {
            match runtimes.get(&descriptor.runtime) {
                None => {
                    errors.push(format!(
                        "Function \"{}\" uses unsupported runtime \"{}\" (supported: {})",
                        descriptor.name,
                        descriptor.runtime,
                        runtimes.supported().join(", ")
                    ));
                    continue;
                }
                Some(spec) => {
                    if descriptor
                        .handler
                        .resolve(&descriptor.code_dir, &spec.extensions)
                        .is_none()
                    {
                        errors.push(format!(
                            "Handler function file path not found: \"{}\" (tried extensions: {})",
                            descriptor.code_dir.join(&descriptor.handler.file).display(),
                            spec.extensions.join(", ")
                        ));
                        continue;
                    }
                }
            }

            let function = Arc::new(descriptor);
            table.functions.push(Arc::clone(&function));

            for binding in &function.routes {
                let key = (binding.method.to_string(), normalize_pattern(&binding.path));
                if let Some(owner) = seen.get(&key) {
                    errors.push(format!(
                        "Duplicated route: {} (functions \"{}\" and \"{}\")",
                        binding.route_key(),
                        owner,
                        function.name
                    ));
                    continue;
                }
                seen.insert(key, function.name.clone());

                if let Err(e) = table.insert(binding.clone(), Arc::clone(&function)) {
                    errors.push(e.to_string());
                }
            }
        }

        if !errors.is_empty() {
            return Err(GatewayError::config(format!(
                "Invalid route table:\n{}",
                errors.join("\n")
            )));
        }

        debug!(routes = table.routes.len(), functions = table.functions.len(), "Route table loaded");
        Ok(table)
    }

    fn insert(&mut self, binding: RouteBinding, function: Arc<FunctionDescriptor>) -> GatewayResult<()> {
        let index = self.routes.len();
        let pattern = to_matcher_pattern(&trim_trailing_slash(&binding.path));

        let router = match &binding.method {
            RouteMethod::Any => &mut self.any,
            RouteMethod::Exact(method) => self.by_method.entry(method.clone()).or_insert_with(RadixRouter::new),
        };

        router.insert(pattern, index).map_err(|e| {
            GatewayError::config(format!("Invalid route {}: {}", binding.route_key(), e))
        })?;

        self.routes.push(RouteEntry {
            route_key: binding.route_key(),
            binding,
            function,
        });
        Ok(())
    }

    /// Match a request to a route
    ///
    /// An exact-method route and an `ANY` route may both match; the more
    /// specific pattern wins, and on a tie the exact-method route does.
    pub fn match_route(&self, method: &Method, path: &str) -> GatewayResult<RouteMatch> {
        let lookup = trim_trailing_slash(path);

        let exact = self
            .by_method
            .get(method)
            .and_then(|router| router.at(&lookup).ok());
        let any = self.any.at(&lookup).ok();

        let chosen = match (exact, any) {
            (Some(e), Some(a)) => {
                let e_rank = specificity(&self.routes[*e.value].binding.path);
                let a_rank = specificity(&self.routes[*a.value].binding.path);
                if a_rank > e_rank {
                    a
                } else {
                    e
                }
            }
            (Some(e), None) => e,
            (None, Some(a)) => a,
            (None, None) => return Err(GatewayError::route_not_found(method.as_str(), path)),
        };

        let entry = &self.routes[*chosen.value];
        let path_params = chosen
            .params
            .iter()
            .map(|(key, value)| {
                let decoded = urlencoding::decode(value)
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| value.to_string());
                (key.to_string(), decoded)
            })
            .collect();

        Ok(RouteMatch {
            function: Arc::clone(&entry.function),
            route_key: entry.route_key.clone(),
            pattern: entry.binding.path.clone(),
            path_params,
        })
    }

    /// Declared routes in load order
    pub fn routes(&self) -> &[RouteEntry] {
        &self.routes
    }

    /// Every loaded function, routed or not
    pub fn functions(&self) -> &[Arc<FunctionDescriptor>] {
        &self.functions
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Strip one trailing `/`, except for the root path
fn trim_trailing_slash(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Canonical form used for duplicate detection: parameter names erased
pub fn normalize_pattern(path: &str) -> String {
    let path = trim_trailing_slash(path);
    path.split('/')
        .map(|segment| match parse_param(segment) {
            Some((_, true)) => "{+}",
            Some((_, false)) => "{}",
            None => segment,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// `{name}` or `{name+}` segment, returning the name and greediness
fn parse_param(segment: &str) -> Option<(&str, bool)> {
    let inner = segment.strip_prefix('{')?.strip_suffix('}')?;
    match inner.strip_suffix('+') {
        Some(name) => Some((name, true)),
        None => Some((inner, false)),
    }
}

/// Translate gateway syntax to matchit syntax (`{proxy+}` becomes `{*proxy}`)
fn to_matcher_pattern(path: &str) -> String {
    path.split('/')
        .map(|segment| match parse_param(segment) {
            Some((name, true)) => format!("{{*{}}}", name),
            _ => segment.to_string(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Per-segment rank: literal 2, parameter 1, greedy 0
fn specificity(path: &str) -> Vec<u8> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|segment| match parse_param(segment) {
            Some((_, true)) => 0,
            Some((_, false)) => 1,
            None => 2,
        })
        .collect()
}
