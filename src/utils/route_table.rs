use crate::models::router::{AuthPolicy, LimitDefinition, RequireLogic, RouteConfig};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors from route compilation and matching.
#[derive(Error, Debug, PartialEq)]
pub enum RouteTableError {
    /// The pattern contains malformed syntax: an unbalanced brace, an empty
    /// `{}`, or an invalid character in a parameter name.
    #[error("invalid route pattern: {pattern}")]
    InvalidPattern { pattern: String },

    /// The generated regex failed to compile. Indicates a bug in pattern
    /// conversion rather than bad user input.
    #[error("regex compilation failed: {0}")]
    RegexError(String),

    /// The backend URL could not be split into origin and base path.
    #[error("invalid backend url: {url}")]
    InvalidBackend { url: String },

    /// No route accepts the method/path pair. The caller translates this
    /// to HTTP 404.
    #[error("no route matches {method} {path}")]
    NoMatch { method: String, path: String },
}

/// A route after compilation: immutable, shared across workers.
///
/// Everything the dispatcher and the policy middlewares need at request time
/// is resolved here once, at startup: the backend URL is pre-split into
/// origin and base path, methods are uppercased, and the priority is fixed.
#[derive(Debug)]
pub struct Route {
    /// The original path template, also used as the route's identity in
    /// rate-limit keys and logs.
    pub pattern: String,
    /// Uppercase method set this route accepts.
    pub methods: Vec<String>,
    /// Absolute upstream URL as configured.
    pub backend_url: String,
    /// `scheme://host[:port]` part of the backend URL.
    pub backend_origin: String,
    /// Base path of the backend URL with no trailing slash; empty when the
    /// backend URL has no path or just `/`.
    pub backend_base_path: String,
    pub strip_prefix: Option<String>,
    /// Per-route upstream deadline; `0` means the global default applies.
    pub timeout_ms: u64,
    pub auth_policy: AuthPolicy,
    pub required_roles: Vec<String>,
    pub required_permissions: Vec<String>,
    pub logic: RequireLogic,
    pub rate_limits: Vec<LimitDefinition>,
    /// Derived ordering key; lower is tried earlier.
    pub priority: i64,
}

/// A compiled pattern paired with its route.
#[derive(Debug)]
struct CompiledRoute {
    route: Arc<Route>,
    regex: Regex,
    param_names: Vec<String>,
}

/// Outcome of a successful match: the route plus the concrete values
/// captured for each `{name}` in the pattern, in template order.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<Route>,
    pub params: HashMap<String, String>,
}

/// The gateway's route table.
///
/// Holds every compiled route sorted by priority and answers
/// `(method, path) -> match or miss`. Built once at startup from the
/// validated configuration and never mutated, so reads take no lock.
///
/// # Pattern grammar
///
/// - `{name}` captures exactly one path segment (`([^/]+)`)
/// - `*` matches within one segment (`[^/]*`)
/// - `**` matches any remainder including slashes (`.*`)
///
/// Everything else is a byte-for-byte literal; paths are matched as
/// received, without percent-decoding.
///
/// # Priority
///
/// `priority = (1000 - len) + 1000*params + 5000*single-star + 10000*double-star`,
/// so exact patterns outrank parameterized ones, which outrank single-segment
/// wildcards, which outrank `**`; longer patterns win ties. Declaration order
/// breaks exact ties.
#[derive(Debug)]
pub struct RouteTable {
    routes: Vec<CompiledRoute>,
}

impl RouteTable {
    /// Compiles every route definition and fixes the match order.
    ///
    /// # Errors
    ///
    /// Returns the first `InvalidPattern`, `RegexError` or `InvalidBackend`
    /// encountered; a table is either fully built or not built at all.
    pub fn new(configs: Vec<RouteConfig>) -> Result<Self, RouteTableError> {
        let mut routes = Vec::with_capacity(configs.len());

        for config in configs {
            routes.push(Self::compile(config)?);
        }

        // Stable sort keeps declaration order for equal priorities.
        routes.sort_by_key(|c| c.route.priority);

        Ok(Self { routes })
    }

    /// Resolves a request to the highest-priority route accepting both the
    /// method and the path.
    ///
    /// Routes are tried in priority order; the first whose method set
    /// contains `method` and whose matcher accepts `path` wins, making the
    /// result deterministic for identical inputs.
    pub fn find_match(&self, method: &str, path: &str) -> Result<RouteMatch, RouteTableError> {
        for compiled in &self.routes {
            if !compiled.route.methods.iter().any(|m| m == method) {
                continue;
            }
            if let Some(captures) = compiled.regex.captures(path) {
                let mut params = HashMap::with_capacity(compiled.param_names.len());
                for (i, name) in compiled.param_names.iter().enumerate() {
                    if let Some(value) = captures.get(i + 1) {
                        params.insert(name.clone(), value.as_str().to_string());
                    }
                }
                return Ok(RouteMatch {
                    route: Arc::clone(&compiled.route),
                    params,
                });
            }
        }

        Err(RouteTableError::NoMatch {
            method: method.to_string(),
            path: path.to_string(),
        })
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    /// Priority of a pattern under the table's ordering. Exposed so the
    /// config validator can warn about shadowed routes.
    pub fn pattern_priority(pattern: &str) -> i64 {
        let has_double = pattern.contains("**");
        let has_single = pattern.contains('*') && !has_double;
        let params = pattern.matches('{').count() as i64;

        (1000 - pattern.len() as i64)
            + 1000 * params
            + if has_single { 5000 } else { 0 }
            + if has_double { 10_000 } else { 0 }
    }

    fn compile(config: RouteConfig) -> Result<CompiledRoute, RouteTableError> {
        let (regex_src, param_names) = Self::pattern_to_regex(&config.pattern)?;
        let regex =
            Regex::new(&regex_src).map_err(|e| RouteTableError::RegexError(e.to_string()))?;

        let (backend_origin, backend_base_path) = split_backend_url(&config.backend_url)?;

        let route = Route {
            priority: Self::pattern_priority(&config.pattern),
            methods: config.normalized_methods(),
            pattern: config.pattern,
            backend_url: config.backend_url,
            backend_origin,
            backend_base_path,
            strip_prefix: config.strip_prefix,
            timeout_ms: config.timeout_ms,
            auth_policy: config.auth_policy,
            required_roles: config.required_roles,
            required_permissions: config.required_permissions,
            logic: config.logic,
            rate_limits: config.rate_limits,
        };

        Ok(CompiledRoute {
            route: Arc::new(route),
            regex,
            param_names,
        })
    }

    /// Converts a pattern into an anchored regex and the ordered parameter
    /// names. `{name}` -> `([^/]+)`, `**` -> `.*`, `*` -> `[^/]*`; all other
    /// regex metacharacters are escaped.
    fn pattern_to_regex(pattern: &str) -> Result<(String, Vec<String>), RouteTableError> {
        let mut regex_src = String::with_capacity(pattern.len() * 2);
        let mut param_names = Vec::new();
        regex_src.push('^');

        let mut chars = pattern.chars().peekable();

        while let Some(ch) = chars.next() {
            match ch {
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for inner in chars.by_ref() {
                        if inner == '}' {
                            closed = true;
                            break;
                        }
                        if inner.is_alphanumeric() || inner == '_' {
                            name.push(inner);
                        } else {
                            return Err(RouteTableError::InvalidPattern {
                                pattern: pattern.to_string(),
                            });
                        }
                    }
                    if !closed || name.is_empty() {
                        return Err(RouteTableError::InvalidPattern {
                            pattern: pattern.to_string(),
                        });
                    }
                    param_names.push(name);
                    regex_src.push_str("([^/]+)");
                }
                '}' => {
                    return Err(RouteTableError::InvalidPattern {
                        pattern: pattern.to_string(),
                    });
                }
                '*' => {
                    if chars.peek() == Some(&'*') {
                        chars.next();
                        regex_src.push_str(".*");
                    } else {
                        regex_src.push_str("[^/]*");
                    }
                }
                '.' | '?' | '+' | '^' | '$' | '[' | ']' | '(' | ')' | '|' | '\\' => {
                    regex_src.push('\\');
                    regex_src.push(ch);
                }
                _ => regex_src.push(ch),
            }
        }

        regex_src.push('$');
        Ok((regex_src, param_names))
    }
}

/// Splits an absolute backend URL into `scheme://authority` and a base path
/// with no trailing slash. A base path of `/` collapses to empty.
fn split_backend_url(url: &str) -> Result<(String, String), RouteTableError> {
    let scheme_end = url
        .find("://")
        .ok_or_else(|| RouteTableError::InvalidBackend {
            url: url.to_string(),
        })?;
    let rest = &url[scheme_end + 3..];
    if rest.is_empty() {
        return Err(RouteTableError::InvalidBackend {
            url: url.to_string(),
        });
    }

    match rest.find('/') {
        Some(slash) => {
            let origin = url[..scheme_end + 3 + slash].to_string();
            let base = rest[slash..].trim_end_matches('/').to_string();
            Ok((origin, base))
        }
        None => Ok((url.to_string(), String::new())),
    }
}
