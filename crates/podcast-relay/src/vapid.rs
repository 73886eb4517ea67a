//! VAPID application-server identity (RFC 8292).
//!
//! One P-256 key pair signs an ES256 JWT per push request.  Browsers bind
//! each subscription to the public key they were given, so regenerating the
//! pair orphans every existing subscription.

use std::path::Path;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::SecretKey;
use podcast_proto::config::VapidConfig;
use rand::rngs::OsRng;
use serde::Serialize;
use tracing::{info, warn};

/// Lifetime of a signed token.  The protocol caps it at 24 hours.
pub const TOKEN_LIFETIME_HOURS: i64 = 12;

#[derive(Debug, thiserror::Error)]
pub enum VapidError {
    #[error("invalid VAPID private key: {0}")]
    InvalidKey(String),
    #[error("VAPID key file {path:?}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot encode token: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct JwtHeader<'a> {
    typ: &'a str,
    alg: &'a str,
}

#[derive(Serialize)]
struct JwtClaims<'a> {
    aud: &'a str,
    exp: i64,
    sub: &'a str,
}

pub struct VapidKeys {
    secret: SecretKey,
    signing: SigningKey,
    /// Uncompressed SEC1 point, 65 bytes.
    public: Vec<u8>,
}

impl VapidKeys {
    pub fn generate() -> Self {
        Self::from_secret(SecretKey::random(&mut OsRng))
    }

    fn from_secret(secret: SecretKey) -> Self {
        let signing = SigningKey::from(&secret);
        let public = secret
            .public_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec();
        Self {
            secret,
            signing,
            public,
        }
    }

    /// Raw 32-byte private scalar, base64url.
    pub fn from_private_b64(encoded: &str) -> Result<Self, VapidError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim().trim_end_matches('='))
            .map_err(|e| VapidError::InvalidKey(e.to_string()))?;
        let secret =
            SecretKey::from_slice(&bytes).map_err(|e| VapidError::InvalidKey(e.to_string()))?;
        Ok(Self::from_secret(secret))
    }

    pub fn private_key_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.secret.to_bytes())
    }

    pub fn public_key_bytes(&self) -> &[u8] {
        &self.public
    }

    pub fn public_key_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.public)
    }

    /// Use the configured key file, creating it on first start.  With no key
    /// file configured the pair lives only as long as the process.
    pub fn load_or_generate(config: &VapidConfig) -> Result<Self, VapidError> {
        let Some(path) = &config.private_key_file else {
            warn!("No vapid.private_key_file configured; generated keys are lost on restart and existing subscriptions stop working");
            return Ok(Self::generate());
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let keys = Self::from_private_b64(&contents)?;
                info!("VAPID key loaded from {:?}", path);
                Ok(keys)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let keys = Self::generate();
                keys.save(path)?;
                info!("VAPID key generated and saved to {:?}", path);
                Ok(keys)
            }
            Err(source) => Err(VapidError::Io {
                path: path.clone(),
                source,
            }),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), VapidError> {
        let io = |source: std::io::Error| VapidError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io)?;
        }
        std::fs::write(path, self.private_key_b64()).map_err(io)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(io)?;
        }
        Ok(())
    }

    /// Compact ES256 JWT for `audience` (the push service origin).
    pub fn sign_token(
        &self,
        audience: &str,
        subject: &str,
        expires: DateTime<Utc>,
    ) -> Result<String, VapidError> {
        let header = serde_json::to_vec(&JwtHeader {
            typ: "JWT",
            alg: "ES256",
        })?;
        let claims = serde_json::to_vec(&JwtClaims {
            aud: audience,
            exp: expires.timestamp(),
            sub: subject,
        })?;
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(header),
            URL_SAFE_NO_PAD.encode(claims)
        );
        let signature: Signature = self.signing.sign(signing_input.as_bytes());
        Ok(format!(
            "{}.{}",
            signing_input,
            URL_SAFE_NO_PAD.encode(signature.to_bytes())
        ))
    }

    /// Value of the `Authorization` header for a push to `audience`.
    pub fn authorization(&self, audience: &str, subject: &str) -> Result<String, VapidError> {
        let expires = Utc::now() + Duration::hours(TOKEN_LIFETIME_HOURS);
        let token = self.sign_token(audience, subject, expires)?;
        Ok(format!("vapid t={}, k={}", token, self.public_key_b64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::signature::Verifier;
    use p256::ecdsa::VerifyingKey;

    #[test]
    fn test_public_key_is_uncompressed_point() {
        let keys = VapidKeys::generate();
        assert_eq!(keys.public_key_bytes().len(), 65);
        assert_eq!(keys.public_key_bytes()[0], 0x04);
        assert!(!keys.public_key_b64().contains('='));
    }

    #[test]
    fn test_token_verifies_with_public_key() {
        let keys = VapidKeys::generate();
        let expires = Utc::now() + Duration::hours(12);
        let token = keys
            .sign_token("https://push.example.net", "mailto:ops@example.com", expires)
            .unwrap();

        let parts: Vec<&str> = token.split('.').collect();
        assert_eq!(parts.len(), 3);

        let claims: serde_json::Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(parts[1]).unwrap()).unwrap();
        assert_eq!(claims["aud"], "https://push.example.net");
        assert_eq!(claims["sub"], "mailto:ops@example.com");
        assert_eq!(claims["exp"], expires.timestamp());

        let verifying = VerifyingKey::from_sec1_bytes(keys.public_key_bytes()).unwrap();
        let signature =
            Signature::from_slice(&URL_SAFE_NO_PAD.decode(parts[2]).unwrap()).unwrap();
        let signed = format!("{}.{}", parts[0], parts[1]);
        assert!(verifying.verify(signed.as_bytes(), &signature).is_ok());
    }

    #[test]
    fn test_private_key_round_trip() {
        let keys = VapidKeys::generate();
        let reloaded = VapidKeys::from_private_b64(&keys.private_key_b64()).unwrap();
        assert_eq!(reloaded.public_key_b64(), keys.public_key_b64());
    }

    #[test]
    fn test_garbage_private_key_rejected() {
        assert!(VapidKeys::from_private_b64("not a key").is_err());
    }
}
