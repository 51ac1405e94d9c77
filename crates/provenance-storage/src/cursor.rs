//! Opaque page tokens.
//!
//! A token is the row marker of the last item on a page, sealed with
//! AES-256-GCM under a process-wide key and encoded as URL-safe base64.
//! Nothing outside this module parses or constructs tokens.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use tracing::{debug, warn};

use provenance_core::error::{ProvenanceError, Result};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Symmetric key for page tokens.
///
/// Its text form is the URL-safe, padded base64 encoding of 32 bytes.
#[derive(Clone)]
pub struct CursorKey([u8; KEY_LEN]);

impl CursorKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(OsRng);
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(key.as_slice());
        Self(bytes)
    }

    /// Parse a key from its text form, rejecting anything that is not
    /// exactly 32 bytes of URL-safe base64.
    pub fn parse(text: &str) -> Result<Self> {
        let decoded = URL_SAFE.decode(text.trim()).map_err(|e| {
            ProvenanceError::Config(format!(
                "invalid pagination key; must be 32 bytes of URL-safe base64: {}",
                e
            ))
        })?;
        let bytes: [u8; KEY_LEN] = decoded.as_slice().try_into().map_err(|_| {
            ProvenanceError::Config(format!(
                "invalid pagination key; must decode to {} bytes, got {}",
                KEY_LEN,
                decoded.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Text form suitable for `pagination.key`.
    pub fn encode(&self) -> String {
        URL_SAFE.encode(self.0)
    }
}

impl std::fmt::Debug for CursorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CursorKey(..)")
    }
}

/// Maps row markers to opaque page tokens and back.
pub struct CursorCodec {
    cipher: Aes256Gcm,
}

impl CursorCodec {
    pub fn new(key: &CursorKey) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0)),
        }
    }

    /// Build the codec from the configured key text.
    ///
    /// With no key configured a new one is generated and logged: tokens it
    /// issues are unreadable by any other process, so a deployment with more
    /// than one instance must configure a shared key instead.
    pub fn from_config(key: Option<&str>) -> Result<Self> {
        let key = match key {
            Some(text) => CursorKey::parse(text)?,
            None => {
                let key = CursorKey::generate();
                warn!(
                    pagination_key = %key.encode(),
                    "No pagination key configured; generated one for this process. \
                     Set pagination.key to share page tokens between instances"
                );
                key
            }
        };
        Ok(Self::new(&key))
    }

    /// Seal a row marker into a page token.
    pub fn encode(&self, marker: i64) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, marker.to_be_bytes().as_ref())
            .map_err(|e| ProvenanceError::Encoding(e.to_string()))?;

        let mut token = Vec::with_capacity(NONCE_LEN + sealed.len());
        token.extend_from_slice(nonce.as_slice());
        token.extend_from_slice(&sealed);
        Ok(URL_SAFE_NO_PAD.encode(token))
    }

    /// Recover the marker from a page token.
    ///
    /// An empty token yields `default`. So does any token that cannot be
    /// opened with this key, whether corrupted, tampered with or issued under
    /// another key; the failure is only logged.
    pub fn decode(&self, token: &str, default: i64) -> i64 {
        if token.is_empty() {
            return default;
        }
        match self.open(token) {
            Ok(marker) => marker,
            Err(reason) => {
                debug!(reason, "Unreadable page token; starting from the default marker");
                default
            }
        }
    }

    /// Like [`CursorCodec::decode`], but an unreadable token is an
    /// `InvalidArgument` error. Returns `None` for the empty token.
    pub fn decode_strict(&self, token: &str) -> Result<Option<i64>> {
        if token.is_empty() {
            return Ok(None);
        }
        self.open(token)
            .map(Some)
            .map_err(|reason| ProvenanceError::InvalidArgument(format!("invalid page token: {}", reason)))
    }

    fn open(&self, token: &str) -> std::result::Result<i64, &'static str> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| "not URL-safe base64")?;
        if bytes.len() <= NONCE_LEN {
            return Err("too short");
        }
        let (nonce, sealed) = bytes.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .map_err(|_| "authentication failed")?;
        let marker: [u8; 8] = plain
            .as_slice()
            .try_into()
            .map_err(|_| "unexpected payload length")?;
        let marker = i64::from_be_bytes(marker);
        if marker < 0 {
            return Err("negative marker");
        }
        Ok(marker)
    }
}

impl std::fmt::Debug for CursorCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorCodec").finish()
    }
}
