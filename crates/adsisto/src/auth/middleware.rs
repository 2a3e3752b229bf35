//! Authentication middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{FromRequestParts, State},
    http::{
        HeaderMap,
        header::{ACCEPT, AUTHORIZATION, COOKIE},
        request::Parts,
    },
    middleware::Next,
    response::Response,
};
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use super::{
    AuthConfig, AuthError, AuthnError, AuthnValidator, ConfigError, IssuedSession, ServerKeyPair,
    SessionClaims, SessionIssuer, SessionValidator,
};
use crate::registry::{KeyRecord, KeyRegistry, RegistryConfig, RegistryFactories};

static BEARER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?i:bearer)\s+([A-Za-z0-9\-._~+/]+=*)$").expect("bearer pattern is valid")
});

/// Extract a Bearer token from an Authorization header value.
fn bearer_token_from_header(header_value: &str) -> Result<&str, AuthError> {
    BEARER_PATTERN
        .captures(header_value.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or(AuthError::InvalidAuthHeader)
}

fn token_from_cookie_header<'a>(cookie_header: &'a str, cookie_name: &str) -> Option<&'a str> {
    cookie_header.split(';').map(str::trim).find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        if name.trim() == cookie_name {
            Some(value.trim()).filter(|v| !v.is_empty())
        } else {
            None
        }
    })
}

/// Browsers ask for HTML; API clients do not.
fn wants_html(headers: &HeaderMap) -> bool {
    headers
        .get(ACCEPT)
        .and_then(|h| h.to_str().ok())
        .is_some_and(|accept| accept.contains("text/html"))
}

/// Authentication state shared across handlers.
///
/// Built once at startup; cloning is cheap.
#[derive(Clone)]
pub struct AuthState {
    config: Arc<AuthConfig>,
    registry: Arc<dyn KeyRegistry>,
    authn: Arc<AuthnValidator>,
    issuer: Arc<SessionIssuer>,
    sessions: Arc<SessionValidator>,
}

impl AuthState {
    /// Create auth state over an existing registry.
    ///
    /// Validates the algorithm and loads the server key pair; any problem
    /// here is fatal at startup.
    pub fn new(config: AuthConfig, registry: Arc<dyn KeyRegistry>) -> Result<Self, ConfigError> {
        let algorithm = config.validate()?;
        let keys = Arc::new(config.load_key_pair(algorithm)?);
        Ok(Self::with_keys(config, registry, keys))
    }

    /// Create auth state, building the registry selected in `registry_config`.
    pub fn from_config(
        config: AuthConfig,
        registry_config: &RegistryConfig,
        factories: &RegistryFactories,
    ) -> Result<Self, ConfigError> {
        let algorithm = config.validate()?;
        let keys = Arc::new(config.load_key_pair(algorithm)?);
        let registry = factories.build(registry_config, algorithm.family())?;
        debug!(
            "auth initialized: algorithm={}, registry={}",
            algorithm,
            registry.name()
        );
        Ok(Self::with_keys(config, registry, keys))
    }

    fn with_keys(
        config: AuthConfig,
        registry: Arc<dyn KeyRegistry>,
        keys: Arc<ServerKeyPair>,
    ) -> Self {
        let authn = AuthnValidator::new(
            registry.clone(),
            keys.algorithm(),
            config.authn_timeout(),
            config.leeway(),
            config.registry_timeout(),
        );
        let issuer = SessionIssuer::new(keys.clone(), config.session_timeout());
        let sessions = SessionValidator::new(keys, config.leeway());

        Self {
            config: Arc::new(config),
            registry,
            authn: Arc::new(authn),
            issuer: Arc::new(issuer),
            sessions: Arc::new(sessions),
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<dyn KeyRegistry> {
        &self.registry
    }

    pub fn registry_timeout(&self) -> Duration {
        self.config.registry_timeout()
    }

    pub fn admin_access_level(&self) -> u32 {
        self.config.admin_access_level
    }

    /// Validate a login assertion.
    pub async fn authenticate(&self, assertion: &str) -> Result<KeyRecord, AuthnError> {
        self.authn.validate(assertion).await
    }

    /// Issue a session token for an authenticated identity.
    pub fn issue_session(&self, record: &KeyRecord) -> Result<IssuedSession, AuthError> {
        self.issuer.issue(record)
    }

    /// Validate a session token.
    pub fn validate_session(&self, token: &str) -> Result<SessionClaims, AuthError> {
        self.sessions.validate(token).map_err(|e| {
            debug!("session token rejected: {}", e);
            AuthError::from(e)
        })
    }

    /// `Set-Cookie` value carrying a fresh session token.
    pub fn session_cookie(&self, token: &str) -> String {
        self.cookie(token, self.issuer.session_timeout())
    }

    /// `Set-Cookie` value that clears the session cookie.
    pub fn clear_session_cookie(&self) -> String {
        self.cookie("", 0)
    }

    fn cookie(&self, value: &str, max_age: i64) -> String {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.config.cookie_name, value, max_age
        );
        if self.config.cookie_secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

/// Authenticated user extracted from request.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    /// Session claims.
    pub claims: SessionClaims,
}

impl CurrentUser {
    /// Identity the session belongs to.
    pub fn id(&self) -> &str {
        &self.claims.sub
    }

    /// Access level from the `user` claim, if the token carries one.
    pub fn access_level(&self) -> Option<u32> {
        self.claims.user.as_ref().and_then(|u| u.access_level)
    }

    /// Session id.
    pub fn session_id(&self) -> Option<&str> {
        self.claims.jti.as_deref()
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(AuthError::MissingToken)
    }
}

/// Session middleware.
///
/// Validates the session token and injects `CurrentUser` into request
/// extensions. The token is taken from, in order:
/// 1. `Authorization: Bearer <token>` header
/// 2. the session cookie
///
/// Without a token, browsers are redirected to the login path and other
/// clients get 401.
pub async fn auth_middleware(
    State(auth): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let headers = req.headers();

    let token = if let Some(header) = headers.get(AUTHORIZATION) {
        let header = header.to_str().map_err(|_| AuthError::InvalidAuthHeader)?;
        bearer_token_from_header(header)?.to_string()
    } else if let Some(token) = headers
        .get(COOKIE)
        .and_then(|h| h.to_str().ok())
        .and_then(|cookie_header| token_from_cookie_header(cookie_header, &auth.config.cookie_name))
    {
        token.to_string()
    } else if wants_html(headers) {
        return Err(AuthError::LoginRequired(auth.config.login_path.clone()));
    } else {
        return Err(AuthError::MissingToken);
    };

    let claims = auth.validate_session(&token)?;

    req.extensions_mut().insert(CurrentUser { claims });
    Ok(next.run(req).await)
}

/// Minimum access level for a group of routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessGate {
    required: u32,
}

impl AccessGate {
    pub fn new(required: u32) -> Self {
        Self { required }
    }

    pub fn required(&self) -> u32 {
        self.required
    }

    /// Admit a session with the given access level.
    ///
    /// A session without an access level is a server-side defect, not a
    /// client error.
    pub fn check(&self, access_level: Option<u32>) -> Result<(), AuthError> {
        match access_level {
            Some(level) if level >= self.required => Ok(()),
            Some(_) => Err(AuthError::InsufficientAccess {
                required: self.required,
            }),
            None => Err(AuthError::MalformedSession),
        }
    }
}

/// Access level middleware. Must run after [`auth_middleware`].
pub async fn access_gate_middleware(
    State(gate): State<AccessGate>,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let user = req
        .extensions()
        .get::<CurrentUser>()
        .ok_or(AuthError::MissingToken)?;

    if let Err(e) = gate.check(user.access_level()) {
        match &e {
            AuthError::MalformedSession => {
                warn!("session for {} has no access level", user.id())
            }
            _ => debug!(
                "access denied for {}: level {:?} below {}",
                user.id(),
                user.access_level(),
                gate.required()
            ),
        }
        return Err(e);
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SessionUser;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_from_header_valid() {
        assert_eq!(
            bearer_token_from_header("Bearer abc.def.ghi").unwrap(),
            "abc.def.ghi"
        );
        assert_eq!(
            bearer_token_from_header("bearer   token123").unwrap(),
            "token123"
        );
        assert_eq!(
            bearer_token_from_header("   Bearer\tmixed-case ").unwrap(),
            "mixed-case"
        );
        assert_eq!(
            bearer_token_from_header("Bearer a+b/c==").unwrap(),
            "a+b/c=="
        );
    }

    #[test]
    fn test_bearer_token_from_header_invalid() {
        let cases = [
            "",
            "Bearer",
            "Bearer ",
            "Token something",
            "Bearer token extra",
            "bear token",
            "Bearer tok,en",
            "Basic dXNlcjpwYXNz",
        ];

        for case in cases {
            assert!(
                bearer_token_from_header(case).is_err(),
                "{case} should fail"
            );
        }
    }

    #[test]
    fn test_token_from_cookie_header() {
        assert_eq!(
            token_from_cookie_header("theme=dark; auth_token=abc.def", "auth_token"),
            Some("abc.def")
        );
        assert_eq!(token_from_cookie_header("auth_token=", "auth_token"), None);
        assert_eq!(token_from_cookie_header("other=1", "auth_token"), None);
    }

    #[test]
    fn test_wants_html() {
        let mut headers = HeaderMap::new();
        assert!(!wants_html(&headers));

        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,*/*;q=0.8"),
        );
        assert!(wants_html(&headers));

        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        assert!(!wants_html(&headers));
    }

    #[test]
    fn test_access_gate() {
        let gate = AccessGate::new(5);
        assert!(gate.check(Some(5)).is_ok());
        assert!(gate.check(Some(99)).is_ok());
        assert!(matches!(
            gate.check(Some(4)),
            Err(AuthError::InsufficientAccess { required: 5 })
        ));
        assert!(matches!(gate.check(None), Err(AuthError::MalformedSession)));

        assert!(AccessGate::new(0).check(Some(0)).is_ok());
    }

    #[test]
    fn test_current_user() {
        let user = CurrentUser {
            claims: SessionClaims {
                sub: "alice".to_string(),
                iat: 0,
                nbf: None,
                exp: 60,
                jti: Some("s-1".to_string()),
                user: Some(SessionUser {
                    identity: "alice".to_string(),
                    access_level: Some(3),
                }),
            },
        };
        assert_eq!(user.id(), "alice");
        assert_eq!(user.access_level(), Some(3));
        assert_eq!(user.session_id(), Some("s-1"));
    }
}
