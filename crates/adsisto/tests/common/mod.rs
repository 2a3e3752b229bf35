//! Test utilities and common setup.
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use adsisto::api::{self, AppState};
use adsisto::audit::AuditLogger;
use adsisto::auth::{AuthConfig, AuthState, KeyFamily, ServerKeyPair, SigningAlgorithm};
use adsisto::registry::{KeyRecord, MemoryKeyRegistry};
use axum::{
    Router,
    body::Body,
    http::{Method, Request, Response, StatusCode, header},
};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::{Value, json};
use tower::ServiceExt;

pub const SERVER_PUBLIC: &str = include_str!("../fixtures/server_rsa_public.pem");
pub const SERVER_PRIVATE: &str = include_str!("../fixtures/server_rsa_private.pem");
pub const ALICE_PUBLIC: &str = include_str!("../fixtures/alice_rsa_public.pem");
pub const ALICE_PRIVATE: &str = include_str!("../fixtures/alice_rsa_private.pem");
pub const MALLORY_PUBLIC: &str = include_str!("../fixtures/mallory_rsa_public.pem");
pub const MALLORY_PRIVATE: &str = include_str!("../fixtures/mallory_rsa_private.pem");
pub const ALICE_EC_PUBLIC: &str = include_str!("../fixtures/alice_ec_public.pem");
pub const SERVER_EC521_PUBLIC: &str = include_str!("../fixtures/server_ec521_public.pem");
pub const SERVER_EC521_PRIVATE: &str = include_str!("../fixtures/server_ec521_private.pem");
pub const ALICE_EC521_PUBLIC: &str = include_str!("../fixtures/alice_ec521_public.pem");
pub const ALICE_EC521_PRIVATE: &str = include_str!("../fixtures/alice_ec521_private.pem");

/// Registered with full access.
pub const ADMIN: &str = "alice@example.com";
/// Registered with access level 1, using mallory's key pair.
pub const OPERATOR: &str = "operator@example.com";

pub const ADMIN_LEVEL: u32 = 10;
pub const OPERATOR_LEVEL: u32 = 1;

/// Auth configuration with inline RS256 server keys.
pub fn test_auth_config() -> AuthConfig {
    AuthConfig {
        public_key: Some(SERVER_PUBLIC.to_string()),
        private_key: Some(SERVER_PRIVATE.to_string()),
        cookie_secure: false,
        ..AuthConfig::default()
    }
}

fn seeded_registry(read_only: bool) -> Arc<MemoryKeyRegistry> {
    let records = [
        KeyRecord {
            identity: ADMIN.to_string(),
            public_key: ALICE_PUBLIC.to_string(),
            access_level: ADMIN_LEVEL,
        },
        KeyRecord {
            identity: OPERATOR.to_string(),
            public_key: MALLORY_PUBLIC.to_string(),
            access_level: OPERATOR_LEVEL,
        },
    ];
    Arc::new(
        MemoryKeyRegistry::with_records(KeyFamily::Rsa, records, read_only)
            .expect("seed registry"),
    )
}

fn test_state(read_only: bool) -> AppState {
    let auth = AuthState::new(test_auth_config(), seeded_registry(read_only))
        .expect("build auth state");
    AppState::new(auth)
}

/// Router over a writable in-memory registry.
pub fn test_app() -> Router {
    api::create_router(test_state(false))
}

/// Router over a read-only in-memory registry.
pub fn read_only_app() -> Router {
    api::create_router(test_state(true))
}

/// Router with an ES512 server key and ADMIN registered with a P-521 key.
pub fn es512_app() -> Router {
    let config = AuthConfig {
        algorithm: "ES512".to_string(),
        public_key: Some(SERVER_EC521_PUBLIC.to_string()),
        private_key: Some(SERVER_EC521_PRIVATE.to_string()),
        cookie_secure: false,
        ..AuthConfig::default()
    };
    let registry = MemoryKeyRegistry::with_records(
        KeyFamily::Ec,
        [KeyRecord {
            identity: ADMIN.to_string(),
            public_key: ALICE_EC521_PUBLIC.to_string(),
            access_level: ADMIN_LEVEL,
        }],
        false,
    )
    .expect("seed registry");
    let auth = AuthState::new(config, Arc::new(registry)).expect("build auth state");
    api::create_router(AppState::new(auth))
}

/// ES512 assertion from ADMIN, signed with alice's P-521 key.
pub fn sign_es512_assertion() -> String {
    let alice = ServerKeyPair::from_pem(
        SigningAlgorithm::Es512,
        ALICE_EC521_PUBLIC.as_bytes(),
        ALICE_EC521_PRIVATE.as_bytes(),
    )
    .expect("alice P-521 key pair");
    let now = chrono::Utc::now().timestamp();
    alice
        .sign(&json!({ "iss": ADMIN, "iat": now - 1, "exp": now + 60 }))
        .expect("sign assertion")
}

/// Sign arbitrary session claims with the RS256 server key.
pub fn sign_server_session(claims: &Value) -> String {
    let key = EncodingKey::from_rsa_pem(SERVER_PRIVATE.as_bytes()).expect("server private key");
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), claims, &key).expect("sign session")
}

/// Router that writes audit events to `path`.
pub async fn audited_app(path: &Path) -> Router {
    let logger = AuditLogger::new(path.to_path_buf())
        .await
        .expect("open audit log");
    api::create_router(test_state(false).with_audit_logger(logger))
}

/// Sign a login assertion for `identity` with `private_pem`.
pub fn sign_assertion_at(identity: &str, private_pem: &str, iat: i64, exp: i64) -> String {
    let claims = json!({ "iss": identity, "iat": iat, "exp": exp });
    let key = EncodingKey::from_rsa_pem(private_pem.as_bytes()).expect("client private key");
    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key).expect("sign assertion")
}

/// Assertion issued a second ago, valid for a minute.
pub fn sign_assertion(identity: &str, private_pem: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    sign_assertion_at(identity, private_pem, now - 1, now + 60)
}

pub async fn post_login(app: &Router, assertion: &str) -> Response<Body> {
    app.clone()
        .oneshot(
            Request::builder()
                .uri("/auth/login")
                .method(Method::POST)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({ "token": assertion }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

/// Log in and return the session token.
pub async fn login_token(app: &Router, identity: &str, private_pem: &str) -> String {
    let response = post_login(app, &sign_assertion(identity, private_pem)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    json["token"].as_str().expect("token in body").to_string()
}

/// Send a JSON request with a bearer token.
pub async fn send_json(
    app: &Router,
    method: Method,
    uri: &str,
    token: &str,
    body: Value,
) -> Response<Body> {
    app.clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .method(method)
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn get_with_token(app: &Router, uri: &str, token: &str) -> Response<Body> {
    app.clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .method(Method::GET)
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}
