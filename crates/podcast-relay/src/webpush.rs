//! Web Push delivery: `aes128gcm` message encryption (RFC 8291) and the
//! HTTP request to the subscriber's push service.

use std::sync::Arc;
use std::time::Duration;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Nonce};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hkdf::Hkdf;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use podcast_proto::config::{PushConfig, VapidConfig};
use podcast_proto::protocol::PushSubscription;
use rand::rngs::OsRng;
use rand::RngCore;
use reqwest::Url;
use sha2::Sha256;
use tracing::debug;

use crate::vapid::{VapidError, VapidKeys};

/// Record size advertised in the header.  Everything fits in one record.
pub const RECORD_SIZE: u32 = 4096;
/// Largest plaintext that fits one record: 4096 minus the 86-byte header,
/// the 16-byte tag and the 1-byte padding delimiter.
pub const MAX_PAYLOAD_LEN: usize = 3993;

const SALT_LEN: usize = 16;
const KEY_INFO: &[u8] = b"WebPush: info\0";
const CEK_INFO: &[u8] = b"Content-Encoding: aes128gcm\0";
const NONCE_INFO: &[u8] = b"Content-Encoding: nonce\0";
/// Delimiter after the last (only) record's data.
const LAST_RECORD: u8 = 0x02;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("invalid subscription keys: {0}")]
    InvalidKeys(String),
    #[error("invalid endpoint {0:?}")]
    InvalidEndpoint(String),
    #[error("payload of {0} bytes exceeds the {} byte limit", MAX_PAYLOAD_LEN)]
    PayloadTooLarge(usize),
    #[error("encryption failed: {0}")]
    Encryption(String),
    #[error(transparent)]
    Vapid(#[from] VapidError),
    #[error("request to push service failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("push service answered {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// One delivery attempt of an opaque payload to one subscription.
#[async_trait]
pub trait PushTransport: Send + Sync {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &[u8],
    ) -> Result<(), DeliveryError>;
}

fn decode_b64(field: &str, value: &str) -> Result<Vec<u8>, DeliveryError> {
    URL_SAFE_NO_PAD
        .decode(value.trim().trim_end_matches('='))
        .map_err(|e| DeliveryError::InvalidKeys(format!("{}: {}", field, e)))
}

/// Encrypt `plaintext` for the subscriber identified by `ua_public` (the
/// `p256dh` key) and `auth_secret`.  Returns the complete request body.
pub fn encrypt(
    ua_public: &[u8],
    auth_secret: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, DeliveryError> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    encrypt_with(
        ua_public,
        auth_secret,
        plaintext,
        &SecretKey::random(&mut OsRng),
        salt,
    )
}

fn encrypt_with(
    ua_public: &[u8],
    auth_secret: &[u8],
    plaintext: &[u8],
    local: &SecretKey,
    salt: [u8; SALT_LEN],
) -> Result<Vec<u8>, DeliveryError> {
    if plaintext.len() > MAX_PAYLOAD_LEN {
        return Err(DeliveryError::PayloadTooLarge(plaintext.len()));
    }
    let ua_key = PublicKey::from_sec1_bytes(ua_public)
        .map_err(|e| DeliveryError::InvalidKeys(format!("p256dh: {}", e)))?;
    let as_public = local.public_key().to_encoded_point(false);
    let as_public = as_public.as_bytes();
    let ua_point = ua_key.to_encoded_point(false);

    let shared = p256::ecdh::diffie_hellman(local.to_nonzero_scalar(), ua_key.as_affine());

    let mut key_info = Vec::with_capacity(KEY_INFO.len() + 130);
    key_info.extend_from_slice(KEY_INFO);
    key_info.extend_from_slice(ua_point.as_bytes());
    key_info.extend_from_slice(as_public);

    let expand_err = |e: hkdf::InvalidLength| DeliveryError::Encryption(e.to_string());

    let mut ikm = [0u8; 32];
    Hkdf::<Sha256>::new(Some(auth_secret), shared.raw_secret_bytes())
        .expand(&key_info, &mut ikm)
        .map_err(expand_err)?;

    let prk = Hkdf::<Sha256>::new(Some(&salt[..]), &ikm);
    let mut cek = [0u8; 16];
    prk.expand(CEK_INFO, &mut cek).map_err(expand_err)?;
    let mut nonce = [0u8; 12];
    prk.expand(NONCE_INFO, &mut nonce).map_err(expand_err)?;

    let mut record = Vec::with_capacity(plaintext.len() + 1);
    record.extend_from_slice(plaintext);
    record.push(LAST_RECORD);

    let cipher = Aes128Gcm::new_from_slice(&cek)
        .map_err(|e| DeliveryError::Encryption(e.to_string()))?;
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), record.as_slice())
        .map_err(|e| DeliveryError::Encryption(e.to_string()))?;

    let mut body = Vec::with_capacity(SALT_LEN + 5 + as_public.len() + sealed.len());
    body.extend_from_slice(&salt);
    body.extend_from_slice(&RECORD_SIZE.to_be_bytes());
    body.push(as_public.len() as u8);
    body.extend_from_slice(as_public);
    body.extend_from_slice(&sealed);
    Ok(body)
}

/// Real push services over HTTPS, signed with the relay's VAPID key.
pub struct WebPushTransport {
    client: reqwest::Client,
    keys: Arc<VapidKeys>,
    subject: String,
    ttl_secs: u32,
}

impl WebPushTransport {
    pub fn new(
        keys: Arc<VapidKeys>,
        vapid: &VapidConfig,
        push: &PushConfig,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(push.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            keys,
            subject: vapid.subject.clone(),
            ttl_secs: push.ttl_secs,
        })
    }
}

#[async_trait]
impl PushTransport for WebPushTransport {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &[u8],
    ) -> Result<(), DeliveryError> {
        let endpoint = Url::parse(&subscription.endpoint)
            .map_err(|_| DeliveryError::InvalidEndpoint(subscription.endpoint.clone()))?;
        let audience = endpoint.origin().ascii_serialization();

        let ua_public = decode_b64("p256dh", &subscription.keys.p256dh)?;
        let auth = decode_b64("auth", &subscription.keys.auth)?;
        let body = encrypt(&ua_public, &auth, payload)?;
        let authorization = self.keys.authorization(&audience, &self.subject)?;

        let response = self
            .client
            .post(endpoint)
            .header("TTL", self.ttl_secs.to_string())
            .header("Content-Encoding", "aes128gcm")
            .header("Content-Type", "application/octet-stream")
            .header("Authorization", authorization)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        debug!("push accepted by {} ({})", audience, status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Subscriber side of the scheme, used to check what the relay produces.
    fn decrypt(ua_secret: &SecretKey, auth: &[u8], body: &[u8]) -> Option<Vec<u8>> {
        let salt = &body[..16];
        let rs = u32::from_be_bytes(body[16..20].try_into().ok()?);
        assert_eq!(rs, RECORD_SIZE);
        let idlen = body[20] as usize;
        let as_bytes = &body[21..21 + idlen];
        let as_public = PublicKey::from_sec1_bytes(as_bytes).ok()?;
        let sealed = &body[21 + idlen..];

        let shared =
            p256::ecdh::diffie_hellman(ua_secret.to_nonzero_scalar(), as_public.as_affine());
        let mut info = KEY_INFO.to_vec();
        info.extend_from_slice(ua_secret.public_key().to_encoded_point(false).as_bytes());
        info.extend_from_slice(as_bytes);
        let mut ikm = [0u8; 32];
        Hkdf::<Sha256>::new(Some(auth), shared.raw_secret_bytes())
            .expand(&info, &mut ikm)
            .ok()?;
        let prk = Hkdf::<Sha256>::new(Some(salt), &ikm);
        let mut cek = [0u8; 16];
        prk.expand(CEK_INFO, &mut cek).ok()?;
        let mut nonce = [0u8; 12];
        prk.expand(NONCE_INFO, &mut nonce).ok()?;

        let mut plain = Aes128Gcm::new_from_slice(&cek)
            .ok()?
            .decrypt(Nonce::from_slice(&nonce), sealed)
            .ok()?;
        assert_eq!(plain.pop(), Some(LAST_RECORD));
        Some(plain)
    }

    fn subscriber() -> (SecretKey, Vec<u8>, [u8; 16]) {
        let secret = SecretKey::random(&mut OsRng);
        let public = secret.public_key().to_encoded_point(false).as_bytes().to_vec();
        let mut auth = [0u8; 16];
        OsRng.fill_bytes(&mut auth);
        (secret, public, auth)
    }

    #[test]
    fn test_subscriber_can_decrypt() {
        let (secret, public, auth) = subscriber();
        let payload = br#"{"title":"New episode","body":"Ep 3"}"#;

        let body = encrypt(&public, &auth, payload).unwrap();
        assert_eq!(decrypt(&secret, &auth, &body), Some(payload.to_vec()));
    }

    #[test]
    fn test_header_layout() {
        let (_, public, auth) = subscriber();
        let body = encrypt_with(&public, &auth, b"x", &SecretKey::random(&mut OsRng), [7u8; 16])
            .unwrap();
        assert_eq!(&body[..16], &[7u8; 16]);
        assert_eq!(&body[16..20], &4096u32.to_be_bytes());
        assert_eq!(body[20], 65);
        // header + 1 byte of data + delimiter + 16 byte tag
        assert_eq!(body.len(), 86 + 1 + 1 + 16);
    }

    #[test]
    fn test_wrong_auth_secret_fails_to_decrypt() {
        let (secret, public, auth) = subscriber();
        let body = encrypt(&public, &auth, b"secret").unwrap();

        assert_eq!(decrypt(&secret, &[0u8; 16], &body), None);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let (_, public, auth) = subscriber();
        let err = encrypt(&public, &auth, &vec![b'a'; MAX_PAYLOAD_LEN + 1]).unwrap_err();
        assert!(matches!(err, DeliveryError::PayloadTooLarge(_)));
        assert!(encrypt(&public, &auth, &vec![b'a'; MAX_PAYLOAD_LEN]).is_ok());
    }

    #[test]
    fn test_bad_subscriber_key_rejected() {
        let err = encrypt(&[4u8; 10], &[0u8; 16], b"x").unwrap_err();
        assert!(matches!(err, DeliveryError::InvalidKeys(_)));
    }
}
