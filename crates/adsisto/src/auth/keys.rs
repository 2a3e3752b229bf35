//! Server key pair and client public key handling.
//!
//! RS* and ES256/ES384 go through `jsonwebtoken`. ES512 has no backend
//! there and is signed with the `p521` crate directly.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use p521::ecdsa::signature::{Signer, Verifier};
use p521::elliptic_curve::sec1::ToEncodedPoint;
use p521::pkcs8::{DecodePrivateKey, DecodePublicKey};
use serde::Serialize;
use serde_json::json;

use super::{ConfigError, KeyFamily, SigningAlgorithm};

/// A public key bound to the algorithm it verifies.
pub enum VerifyingKey {
    Jwt {
        key: DecodingKey,
        algorithm: Algorithm,
    },
    P521(p521::ecdsa::VerifyingKey),
}

impl fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyingKey::Jwt { algorithm, .. } => {
                f.debug_struct("Jwt").field("algorithm", algorithm).finish_non_exhaustive()
            }
            VerifyingKey::P521(_) => f.write_str("P521"),
        }
    }
}

impl VerifyingKey {
    /// Parse a PEM public key for `algorithm`.
    pub fn from_pem(algorithm: SigningAlgorithm, pem: &[u8]) -> Result<Self, String> {
        match algorithm.jwt_algorithm() {
            Some(jwt_algorithm) => decoding_key_for(algorithm.family(), pem)
                .map(|key| VerifyingKey::Jwt {
                    key,
                    algorithm: jwt_algorithm,
                })
                .map_err(|e| e.to_string()),
            None => {
                let text = pem_text(pem)?;
                let public = p521::PublicKey::from_public_key_pem(text)
                    .map_err(|e| format!("not a P-521 public key: {e}"))?;
                let point = public.to_encoded_point(false);
                p521::ecdsa::VerifyingKey::from_sec1_bytes(point.as_bytes())
                    .map(VerifyingKey::P521)
                    .map_err(|e| format!("not a P-521 public key: {e}"))
            }
        }
    }

    /// Check the signature of a compact JWS. Claims are not looked at.
    pub fn verify(&self, token: &str) -> bool {
        let Some((message, signature)) = token.rsplit_once('.') else {
            return false;
        };
        match self {
            VerifyingKey::Jwt { key, algorithm } => {
                jsonwebtoken::crypto::verify(signature, message.as_bytes(), key, *algorithm)
                    .unwrap_or(false)
            }
            VerifyingKey::P521(key) => {
                let Ok(bytes) = URL_SAFE_NO_PAD.decode(signature) else {
                    return false;
                };
                let Ok(signature) = p521::ecdsa::Signature::from_slice(&bytes) else {
                    return false;
                };
                key.verify(message.as_bytes(), &signature).is_ok()
            }
        }
    }
}

enum SigningKey {
    Jwt {
        key: EncodingKey,
        algorithm: Algorithm,
    },
    P521(p521::ecdsa::SigningKey),
}

impl SigningKey {
    fn from_pem(algorithm: SigningAlgorithm, pem: &[u8]) -> Result<Self, String> {
        let Some(jwt_algorithm) = algorithm.jwt_algorithm() else {
            let text = pem_text(pem)?;
            let secret = p521::SecretKey::from_pkcs8_pem(text)
                .or_else(|_| p521::SecretKey::from_sec1_pem(text))
                .map_err(|e| format!("not a P-521 private key: {e}"))?;
            return p521::ecdsa::SigningKey::from_bytes(&secret.to_bytes())
                .map(SigningKey::P521)
                .map_err(|e| e.to_string());
        };

        let key = match algorithm.family() {
            KeyFamily::Rsa => EncodingKey::from_rsa_pem(pem),
            KeyFamily::Ec => EncodingKey::from_ec_pem(pem),
        }
        .map_err(|e| e.to_string())?;
        Ok(SigningKey::Jwt {
            key,
            algorithm: jwt_algorithm,
        })
    }

    /// Base64url signature over `message`.
    fn sign(&self, message: &[u8]) -> Result<String, String> {
        match self {
            SigningKey::Jwt { key, algorithm } => {
                jsonwebtoken::crypto::sign(message, key, *algorithm).map_err(|e| e.to_string())
            }
            SigningKey::P521(key) => {
                let signature: p521::ecdsa::Signature =
                    key.try_sign(message).map_err(|e| e.to_string())?;
                Ok(URL_SAFE_NO_PAD.encode(signature.to_bytes()))
            }
        }
    }
}

fn pem_text(pem: &[u8]) -> Result<&str, String> {
    std::str::from_utf8(pem)
        .map(str::trim)
        .map_err(|_| "key is not PEM text".to_string())
}

/// The server's signing key pair, loaded once at startup.
pub struct ServerKeyPair {
    algorithm: SigningAlgorithm,
    signing: SigningKey,
    verifying: VerifyingKey,
}

impl fmt::Debug for ServerKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerKeyPair")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl ServerKeyPair {
    /// Parse both halves and check that they belong together.
    pub fn from_pem(
        algorithm: SigningAlgorithm,
        public_pem: &[u8],
        private_pem: &[u8],
    ) -> Result<Self, ConfigError> {
        let verifying =
            VerifyingKey::from_pem(algorithm, public_pem).map_err(ConfigError::InvalidPublicKey)?;
        let signing =
            SigningKey::from_pem(algorithm, private_pem).map_err(ConfigError::InvalidPrivateKey)?;

        let pair = Self {
            algorithm,
            signing,
            verifying,
        };
        pair.check_pair()?;
        Ok(pair)
    }

    pub fn algorithm(&self) -> SigningAlgorithm {
        self.algorithm
    }

    /// Encode `claims` as a compact JWS signed with the private half.
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, String> {
        let header = json!({ "typ": "JWT", "alg": self.algorithm.as_str() });
        let header = serde_json::to_vec(&header).map_err(|e| e.to_string())?;
        let payload = serde_json::to_vec(claims).map_err(|e| e.to_string())?;
        let message = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(payload)
        );
        let signature = self.signing.sign(message.as_bytes())?;
        Ok(format!("{message}.{signature}"))
    }

    /// Check a token's signature against the public half.
    pub fn verify(&self, token: &str) -> bool {
        self.verifying.verify(token)
    }

    /// Sign a throwaway token and verify it with the public half.
    fn check_pair(&self) -> Result<(), ConfigError> {
        let token = self
            .sign(&json!({ "sub": "adsisto-key-check" }))
            .map_err(ConfigError::InvalidPrivateKey)?;
        if self.verify(&token) {
            Ok(())
        } else {
            Err(ConfigError::KeyPairMismatch)
        }
    }
}

/// Parse a PEM public key for the given family.
pub fn decoding_key_for(
    family: KeyFamily,
    pem: &[u8],
) -> Result<DecodingKey, jsonwebtoken::errors::Error> {
    match family {
        KeyFamily::Rsa => DecodingKey::from_rsa_pem(pem),
        KeyFamily::Ec => DecodingKey::from_ec_pem(pem),
    }
}

/// Normalize a client public key to PEM.
///
/// Accepts PEM (`PUBLIC KEY`, or `RSA PUBLIC KEY` for RSA) or bare base64 DER
/// (SubjectPublicKeyInfo, or PKCS#1 for RSA). The key must parse for `family`.
pub fn normalize_public_key(family: KeyFamily, input: &str) -> Result<String, String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err("public key is required".to_string());
    }

    if trimmed.starts_with("-----BEGIN") {
        let pem = format!("{trimmed}\n");
        decoding_key_for(family, pem.as_bytes())
            .map_err(|e| format!("invalid {family} public key: {e}"))?;
        return Ok(pem);
    }

    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    let der = STANDARD
        .decode(compact.as_bytes())
        .map_err(|_| "public key is neither PEM nor base64 DER".to_string())?;

    let labels: &[&str] = match family {
        KeyFamily::Rsa => &["PUBLIC KEY", "RSA PUBLIC KEY"],
        KeyFamily::Ec => &["PUBLIC KEY"],
    };
    for label in labels {
        let pem = der_to_pem(label, &der);
        if decoding_key_for(family, pem.as_bytes()).is_ok() {
            return Ok(pem);
        }
    }
    Err(format!("invalid {family} public key"))
}

fn der_to_pem(label: &str, der: &[u8]) -> String {
    let body = STANDARD.encode(der);
    let mut pem = format!("-----BEGIN {label}-----\n");
    for line in body.as_bytes().chunks(64) {
        // base64 output is ASCII
        pem.push_str(&String::from_utf8_lossy(line));
        pem.push('\n');
    }
    pem.push_str(&format!("-----END {label}-----\n"));
    pem
}
