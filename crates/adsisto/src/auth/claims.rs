//! Token claims.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Claims of a server-issued session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Identity the session belongs to.
    pub sub: String,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    pub exp: i64,
    /// Session id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<SessionUser>,
}

/// The `user` claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub identity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_level: Option<u32>,
}

/// A token split and decoded without any signature check.
///
/// Used to read the issuer before the verifying key is known, and to check
/// claim presence. Nothing read from here is trusted until the signature
/// has been verified.
#[derive(Debug)]
pub(crate) struct UnverifiedToken {
    /// The `alg` header.
    pub alg: String,
    pub claims: Map<String, Value>,
}

impl UnverifiedToken {
    pub fn parse(token: &str) -> Result<Self, String> {
        let mut parts = token.split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err("expected three dot-separated segments".to_string());
        };
        if signature.is_empty() {
            return Err("empty signature segment".to_string());
        }

        let header: Map<String, Value> = decode_segment(header, "header")?;
        let Some(alg) = header.get("alg").and_then(Value::as_str) else {
            return Err("header has no alg".to_string());
        };
        let claims: Map<String, Value> = decode_segment(payload, "payload")?;
        Ok(Self {
            alg: alg.to_string(),
            claims,
        })
    }

    /// Present and not null.
    pub fn has_claim(&self, name: &str) -> bool {
        self.claims.get(name).is_some_and(|v| !v.is_null())
    }

    pub fn str_claim(&self, name: &str) -> Option<&str> {
        self.claims.get(name).and_then(Value::as_str)
    }

    /// Integer claim. Whole-number floats are accepted, other types are not.
    pub fn int_claim(&self, name: &str) -> Option<i64> {
        let value = self.claims.get(name)?;
        value.as_i64().or_else(|| {
            value
                .as_f64()
                .filter(|f| f.fract() == 0.0 && f.is_finite())
                .map(|f| f as i64)
        })
    }
}

fn decode_segment<T: serde::de::DeserializeOwned>(segment: &str, what: &str) -> Result<T, String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| format!("{what} is not base64url: {e}"))?;
    serde_json::from_slice(&bytes).map_err(|e| format!("{what} is not valid JSON: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn segment(value: &Value) -> String {
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(value).unwrap())
    }

    fn token(claims: Value) -> String {
        format!(
            "{}.{}.c2ln",
            segment(&json!({"alg": "RS256", "typ": "JWT"})),
            segment(&claims)
        )
    }

    #[test]
    fn test_parse_reads_header_and_claims() {
        let parsed = UnverifiedToken::parse(&token(json!({
            "iss": "alice@example.com",
            "iat": 100,
            "exp": 200.0,
            "nbf": null,
        })))
        .unwrap();

        assert_eq!(parsed.alg, "RS256");
        assert_eq!(parsed.str_claim("iss"), Some("alice@example.com"));
        assert_eq!(parsed.int_claim("iat"), Some(100));
        assert_eq!(parsed.int_claim("exp"), Some(200));
        assert!(!parsed.has_claim("nbf"));
        assert!(!parsed.has_claim("sub"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in [
            "",
            "abc",
            "a.b",
            "a.b.c.d",
            "!!!.???.sig",
            format!("{}.{}.", segment(&json!({"alg": "RS256"})), segment(&json!({}))).as_str(),
            format!("{}.{}.sig", segment(&json!({"alg": "RS256"})), "bm90IGpzb24").as_str(),
            format!("{}.{}.sig", segment(&json!({"typ": "JWT"})), segment(&json!({}))).as_str(),
        ] {
            assert!(UnverifiedToken::parse(bad).is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn test_int_claim_rejects_non_numbers() {
        let parsed = UnverifiedToken::parse(&token(json!({
            "iat": "100",
            "exp": 1.5,
        })))
        .unwrap();
        assert_eq!(parsed.int_claim("iat"), None);
        assert_eq!(parsed.int_claim("exp"), None);
    }

    #[test]
    fn test_session_claims_json_shape() {
        let claims = SessionClaims {
            sub: "alice".to_string(),
            iat: 1,
            nbf: Some(1),
            exp: 2,
            jti: None,
            user: Some(SessionUser {
                identity: "alice".to_string(),
                access_level: Some(10),
            }),
        };
        let value = serde_json::to_value(&claims).unwrap();
        assert_eq!(value["user"]["accessLevel"], 10);
        assert_eq!(value["user"]["identity"], "alice");
        assert!(value.get("jti").is_none());
    }

    #[test]
    fn test_session_user_without_access_level() {
        let claims: SessionClaims = serde_json::from_value(json!({
            "sub": "alice",
            "iat": 1,
            "exp": 2,
            "user": {"identity": "alice"}
        }))
        .unwrap();
        assert_eq!(claims.nbf, None);
        assert_eq!(claims.user.unwrap().access_level, None);
    }
}
