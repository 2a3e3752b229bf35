//! Signature algorithm allow-list.
//!
//! Only asymmetric algorithms are accepted. Symmetric HMAC algorithms are
//! refused outright: the server must never verify client assertions with a
//! shared secret.

use std::fmt;
use std::str::FromStr;

use jsonwebtoken::Algorithm;

use super::ConfigError;

/// Algorithms the console can be configured with.
pub const ACCEPTED_ALGORITHMS: &[&str] = &["RS256", "RS384", "RS512", "ES256", "ES384", "ES512"];

/// Symmetric algorithms, refused with a dedicated error.
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["HS256", "HS384", "HS512"];

/// Configured signing algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigningAlgorithm {
    Rs256,
    Rs384,
    Rs512,
    Es256,
    Es384,
    Es512,
}

/// Key type required by an algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyFamily {
    Rsa,
    Ec,
}

impl fmt::Display for KeyFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyFamily::Rsa => write!(f, "RSA"),
            KeyFamily::Ec => write!(f, "EC"),
        }
    }
}

impl SigningAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            SigningAlgorithm::Rs256 => "RS256",
            SigningAlgorithm::Rs384 => "RS384",
            SigningAlgorithm::Rs512 => "RS512",
            SigningAlgorithm::Es256 => "ES256",
            SigningAlgorithm::Es384 => "ES384",
            SigningAlgorithm::Es512 => "ES512",
        }
    }

    pub fn family(&self) -> KeyFamily {
        match self {
            SigningAlgorithm::Rs256 | SigningAlgorithm::Rs384 | SigningAlgorithm::Rs512 => {
                KeyFamily::Rsa
            }
            SigningAlgorithm::Es256 | SigningAlgorithm::Es384 | SigningAlgorithm::Es512 => {
                KeyFamily::Ec
            }
        }
    }

    /// The `jsonwebtoken` algorithm backing this one, `None` for ES512
    /// which is handled with `p521` instead.
    pub fn jwt_algorithm(&self) -> Option<Algorithm> {
        match self {
            SigningAlgorithm::Rs256 => Some(Algorithm::RS256),
            SigningAlgorithm::Rs384 => Some(Algorithm::RS384),
            SigningAlgorithm::Rs512 => Some(Algorithm::RS512),
            SigningAlgorithm::Es256 => Some(Algorithm::ES256),
            SigningAlgorithm::Es384 => Some(Algorithm::ES384),
            SigningAlgorithm::Es512 => None,
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SigningAlgorithm {
    type Err = ConfigError;

    /// Parse an algorithm name, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_uppercase();
        if FORBIDDEN_ALGORITHMS.contains(&name.as_str()) {
            return Err(ConfigError::SymmetricAlgorithm(name));
        }
        match name.as_str() {
            "RS256" => Ok(SigningAlgorithm::Rs256),
            "RS384" => Ok(SigningAlgorithm::Rs384),
            "RS512" => Ok(SigningAlgorithm::Rs512),
            "ES256" => Ok(SigningAlgorithm::Es256),
            "ES384" => Ok(SigningAlgorithm::Es384),
            "ES512" => Ok(SigningAlgorithm::Es512),
            _ => Err(ConfigError::InvalidAlgorithm(s.trim().to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepted() {
        for name in ACCEPTED_ALGORITHMS {
            let alg: SigningAlgorithm = name.parse().unwrap();
            assert_eq!(alg.as_str(), *name);
        }
        assert_eq!(
            "es384".parse::<SigningAlgorithm>().unwrap(),
            SigningAlgorithm::Es384
        );
    }

    #[test]
    fn test_parse_symmetric_rejected() {
        for name in ["HS256", "hs384", "Hs512"] {
            assert!(matches!(
                name.parse::<SigningAlgorithm>(),
                Err(ConfigError::SymmetricAlgorithm(_))
            ));
        }
    }

    #[test]
    fn test_parse_unknown_rejected() {
        for name in ["", "none", "PS256", "EdDSA", "RS1024"] {
            assert!(matches!(
                name.parse::<SigningAlgorithm>(),
                Err(ConfigError::InvalidAlgorithm(_))
            ));
        }
    }

    #[test]
    fn test_family() {
        assert_eq!(SigningAlgorithm::Rs512.family(), KeyFamily::Rsa);
        assert_eq!(SigningAlgorithm::Es256.family(), KeyFamily::Ec);
    }

    #[test]
    fn test_jwt_backend() {
        assert_eq!(SigningAlgorithm::Es512.jwt_algorithm(), None);
        assert_eq!(SigningAlgorithm::Es512.family(), KeyFamily::Ec);
        assert_eq!(
            SigningAlgorithm::Es384.jwt_algorithm(),
            Some(Algorithm::ES384)
        );
    }
}
