use serde::{Deserialize, Serialize};

/// Authorization requirement attached to a route.
///
/// The policy decides whether a request may be dispatched to the backend
/// based on the (possibly absent) user context extracted from the session
/// token.
///
/// # Decision rules
///
/// - `Public` - always allowed, even without a token
/// - `Authenticated` - allowed iff a valid token was presented
/// - `RoleBased` - allowed iff the user holds the required roles
/// - `PermissionBased` - allowed iff the user holds the required permissions
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthPolicy {
    /// No authentication required.
    Public,
    /// Any valid session token is sufficient.
    Authenticated,
    /// Valid token plus role membership per `required_roles` and `logic`.
    RoleBased,
    /// Valid token plus permission grants per `required_permissions` and `logic`.
    PermissionBased,
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self::Public
    }
}

/// Combinator for role/permission checks.
///
/// `All` requires every configured role/permission to be held; `Any`
/// (the default) requires at least one.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequireLogic {
    All,
    Any,
}

impl Default for RequireLogic {
    fn default() -> Self {
        Self::Any
    }
}

/// Dimension a rate-limit counter is keyed on.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LimitKeyType {
    /// Counter per client IP address.
    Ip,
    /// Counter per authenticated user id (anonymous traffic shares one bucket).
    User,
    /// Counter per route pattern.
    Route,
    /// One process-wide counter.
    Global,
}

impl LimitKeyType {
    /// Short label used in bucket identities and limit headers.
    pub fn as_str(&self) -> &'static str {
        match self {
            LimitKeyType::Ip => "ip",
            LimitKeyType::User => "user",
            LimitKeyType::Route => "route",
            LimitKeyType::Global => "global",
        }
    }
}

/// A single fixed-window rate limit attached to a route.
///
/// A route may carry several definitions; a request is denied as soon as
/// any one of them is exhausted for the current window.
///
/// # Examples
///
/// ```json
/// { "key_type": "ip", "capacity": 100, "window_ms": 60000 }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LimitDefinition {
    /// Dimension the counter is keyed on.
    pub key_type: LimitKeyType,
    /// Requests admitted per window.
    pub capacity: u64,
    /// Window length in milliseconds.
    pub window_ms: u64,
}

impl LimitDefinition {
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err("rate limit capacity must be greater than 0".to_string());
        }
        if self.window_ms == 0 {
            return Err("rate limit window_ms must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Configuration for one upstream route.
///
/// A `RouteConfig` maps a URL pattern plus a method set to a backend, with
/// the authorization and rate-limit policies enforced before dispatch.
/// Routes are compiled once at startup into the route table and never
/// mutated afterwards.
///
/// # Pattern grammar
///
/// Patterns are slash-separated with three meta-tokens:
///
/// - `{name}` captures exactly one path segment and binds `name`
/// - `*` matches zero or more characters within one segment
/// - `**` matches any remaining characters including `/`
///
/// # Examples
///
/// ```json
/// {
///   "pattern": "/api/v1/users/{id}",
///   "methods": ["GET", "PUT"],
///   "backend_url": "http://user-service:8080",
///   "auth_policy": "role_based",
///   "required_roles": ["admin", "support"],
///   "logic": "ANY",
///   "rate_limits": [{ "key_type": "ip", "capacity": 50, "window_ms": 1000 }]
/// }
/// ```
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RouteConfig {
    /// Path template clients address, e.g. `/api/v1/users/{id}` or `/static/**`.
    pub pattern: String,

    /// Allowed HTTP methods. Matching is case-insensitive in config,
    /// uppercase at runtime.
    pub methods: Vec<String>,

    /// Absolute upstream URL: scheme + host, optional base path.
    pub backend_url: String,

    /// Prefix trimmed from the request path before the upstream rewrite.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strip_prefix: Option<String>,

    /// Per-route upstream deadline in milliseconds; `0` uses the global default.
    #[serde(default)]
    pub timeout_ms: u64,

    /// Authorization requirement; defaults to `public`.
    #[serde(default)]
    pub auth_policy: AuthPolicy,

    /// Roles checked under `role_based`.
    #[serde(default)]
    pub required_roles: Vec<String>,

    /// Permissions checked under `permission_based`.
    #[serde(default)]
    pub required_permissions: Vec<String>,

    /// How required roles/permissions combine; defaults to `ANY`.
    #[serde(default)]
    pub logic: RequireLogic,

    /// Fixed-window limits enforced before authorization and dispatch.
    #[serde(default)]
    pub rate_limits: Vec<LimitDefinition>,
}

const VALID_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH",
];

impl RouteConfig {
    /// Validates a single route definition.
    ///
    /// Pattern *syntax* (balanced braces, parameter names) is checked by the
    /// route table at compile time; this method covers everything serde
    /// cannot express: path shape, method names, backend URL scheme and the
    /// limit definitions.
    ///
    /// # Errors
    ///
    /// Returns a descriptive message on the first violation found:
    /// - pattern or strip_prefix not starting with `/`
    /// - empty or unknown HTTP method
    /// - backend URL without an `http://` or `https://` scheme
    /// - role/permission policy without any required entries
    /// - zero capacity or zero window on a limit
    pub fn validate(&self) -> Result<(), String> {
        if !self.pattern.starts_with('/') {
            return Err(format!("route pattern must start with '/': {}", self.pattern));
        }

        if self.methods.is_empty() {
            return Err(format!(
                "route {} must allow at least one HTTP method",
                self.pattern
            ));
        }
        for method in &self.methods {
            let upper = method.to_ascii_uppercase();
            if !VALID_METHODS.contains(&upper.as_str()) {
                return Err(format!("invalid HTTP method {} on route {}", method, self.pattern));
            }
        }

        if !self.backend_url.starts_with("http://") && !self.backend_url.starts_with("https://") {
            return Err(format!(
                "backend_url must start with http:// or https://: {}",
                self.backend_url
            ));
        }

        if let Some(prefix) = &self.strip_prefix {
            if !prefix.starts_with('/') {
                return Err(format!(
                    "strip_prefix must start with '/': {} on route {}",
                    prefix, self.pattern
                ));
            }
        }

        match self.auth_policy {
            AuthPolicy::RoleBased if self.required_roles.is_empty() => {
                return Err(format!(
                    "route {} uses role_based policy but lists no required_roles",
                    self.pattern
                ));
            }
            AuthPolicy::PermissionBased if self.required_permissions.is_empty() => {
                return Err(format!(
                    "route {} uses permission_based policy but lists no required_permissions",
                    self.pattern
                ));
            }
            _ => {}
        }

        for limit in &self.rate_limits {
            limit
                .validate()
                .map_err(|e| format!("route {}: {}", self.pattern, e))?;
        }

        Ok(())
    }

    /// The method set normalized to uppercase.
    pub fn normalized_methods(&self) -> Vec<String> {
        self.methods.iter().map(|m| m.to_ascii_uppercase()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_route() -> RouteConfig {
        RouteConfig {
            pattern: "/api/v1/users/{id}".to_string(),
            methods: vec!["GET".to_string()],
            backend_url: "http://users:8080".to_string(),
            strip_prefix: None,
            timeout_ms: 0,
            auth_policy: AuthPolicy::Public,
            required_roles: vec![],
            required_permissions: vec![],
            logic: RequireLogic::Any,
            rate_limits: vec![],
        }
    }

    #[test]
    fn accepts_well_formed_route() {
        assert!(base_route().validate().is_ok());
    }

    #[test]
    fn rejects_relative_pattern() {
        let mut route = base_route();
        route.pattern = "api/users".to_string();
        assert!(route.validate().is_err());
    }

    #[test]
    fn rejects_unknown_method() {
        let mut route = base_route();
        route.methods = vec!["FETCH".to_string()];
        assert!(route.validate().is_err());
    }

    #[test]
    fn rejects_backend_without_scheme() {
        let mut route = base_route();
        route.backend_url = "users:8080".to_string();
        assert!(route.validate().is_err());
    }

    #[test]
    fn rejects_role_policy_without_roles() {
        let mut route = base_route();
        route.auth_policy = AuthPolicy::RoleBased;
        assert!(route.validate().is_err());
    }

    #[test]
    fn rejects_zero_window_limit() {
        let mut route = base_route();
        route.rate_limits = vec![LimitDefinition {
            key_type: LimitKeyType::Ip,
            capacity: 10,
            window_ms: 0,
        }];
        assert!(route.validate().is_err());
    }

    #[test]
    fn logic_defaults_to_any() {
        let json = r#"{
            "pattern": "/x",
            "methods": ["GET"],
            "backend_url": "http://b"
        }"#;
        let route: RouteConfig = serde_json::from_str(json).unwrap();
        assert_eq!(route.logic, RequireLogic::Any);
        assert_eq!(route.auth_policy, AuthPolicy::Public);
    }
}
