use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::BridgeError;

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 12;
const MAC_LEN: usize = 32;
const STATE_NONCE_LEN: usize = 16;

/// How long an issued OAuth state stays acceptable on the callback.
pub const STATE_TTL_SECS: i64 = 10 * 60;

/// Seals realm tokens at rest and issues the OAuth `state` parameter.
///
/// Sealed tokens are AES-256-GCM with the realm id as associated data, so a
/// ciphertext copied onto another realm's row fails to open. The state is
/// `hex(nonce):unix_seconds` behind an HMAC-SHA256 tag.
pub struct CryptoEngine {
    cipher: Aes256Gcm,
    hmac_key: Vec<u8>,
}

impl CryptoEngine {
    /// Build the engine from base64 `MASTER_KEY` (32 bytes) and `HMAC_SECRET`.
    ///
    /// Bad keys are a configuration problem, reported before the server starts.
    pub fn new(master_key_b64: &str, hmac_secret_b64: &str) -> Result<Self, BridgeError> {
        let master_key = STANDARD
            .decode(master_key_b64)
            .map_err(|e| BridgeError::Configuration(format!("Invalid MASTER_KEY base64: {e}")))?;

        let cipher = Aes256Gcm::new_from_slice(&master_key).map_err(|_| {
            BridgeError::Configuration(format!("MASTER_KEY must be 32 bytes, got {}", master_key.len()))
        })?;

        let hmac_key = STANDARD
            .decode(hmac_secret_b64)
            .map_err(|e| BridgeError::Configuration(format!("Invalid HMAC_SECRET base64: {e}")))?;

        if hmac_key.is_empty() {
            return Err(BridgeError::Configuration("HMAC_SECRET is empty".into()));
        }

        Ok(Self { cipher, hmac_key })
    }

    // ── Tokens at rest ──────────────────────────────────────────────────

    /// Seal one token of `realm_id`. Returns base64(nonce || ciphertext).
    pub fn seal_token(&self, realm_id: &str, token: &str) -> Result<String, BridgeError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let payload = Payload {
            msg: token.as_bytes(),
            aad: realm_id.as_bytes(),
        };
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), payload)
            .map_err(|e| BridgeError::Crypto(format!("Sealing token for realm {realm_id} failed: {e}")))?;

        let mut sealed = nonce_bytes.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    /// Open a token sealed for `realm_id`.
    pub fn open_token(&self, realm_id: &str, sealed_b64: &str) -> Result<String, BridgeError> {
        let sealed = STANDARD
            .decode(sealed_b64)
            .map_err(|e| BridgeError::Crypto(format!("Stored token is not base64: {e}")))?;

        if sealed.len() < NONCE_LEN {
            return Err(BridgeError::Crypto("Stored token too short".into()));
        }
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);

        let payload = Payload {
            msg: ciphertext,
            aad: realm_id.as_bytes(),
        };
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), payload)
            .map_err(|_| BridgeError::Crypto(format!("Stored token does not open for realm {realm_id}")))?;

        String::from_utf8(plaintext).map_err(|e| BridgeError::Crypto(format!("Stored token is not UTF-8: {e}")))
    }

    // ── OAuth state ─────────────────────────────────────────────────────

    /// A fresh signed state issued at `now`.
    pub fn issue_state(&self, now: DateTime<Utc>) -> Result<String, BridgeError> {
        let mut nonce = [0u8; STATE_NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let nonce: String = nonce.iter().map(|b| format!("{b:02x}")).collect();

        let payload = format!("{nonce}:{}", now.timestamp());
        let mut signed = self.mac(payload.as_bytes())?;
        signed.extend_from_slice(payload.as_bytes());

        Ok(URL_SAFE_NO_PAD.encode(signed))
    }

    /// Accept a state returned on the callback: the tag must match and the
    /// issue time must lie within `STATE_TTL_SECS` before `now`.
    pub fn check_state(&self, state: &str, now: DateTime<Utc>) -> Result<(), BridgeError> {
        let signed = URL_SAFE_NO_PAD
            .decode(state)
            .map_err(|_| BridgeError::InvalidState)?;
        if signed.len() <= MAC_LEN {
            return Err(BridgeError::InvalidState);
        }
        let (tag, payload) = signed.split_at(MAC_LEN);

        let mut mac = self.hmac()?;
        mac.update(payload);
        mac.verify_slice(tag).map_err(|_| BridgeError::InvalidState)?;

        let issued_at: i64 = std::str::from_utf8(payload)
            .ok()
            .and_then(|p| p.rsplit_once(':'))
            .and_then(|(_, ts)| ts.parse().ok())
            .ok_or(BridgeError::InvalidState)?;

        let age = now.timestamp() - issued_at;
        if !(0..=STATE_TTL_SECS).contains(&age) {
            tracing::warn!("[OAuth] rejecting state issued {age}s ago");
            return Err(BridgeError::InvalidState);
        }
        Ok(())
    }

    fn hmac(&self) -> Result<HmacSha256, BridgeError> {
        <HmacSha256 as Mac>::new_from_slice(&self.hmac_key)
            .map_err(|e| BridgeError::Crypto(format!("HMAC init failed: {e}")))
    }

    fn mac(&self, data: &[u8]) -> Result<Vec<u8>, BridgeError> {
        let mut mac = self.hmac()?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

#[cfg(test)]
pub(crate) fn test_engine() -> CryptoEngine {
    CryptoEngine::new(&STANDARD.encode([0x42u8; 32]), &STANDARD.encode([0x43u8; 32])).unwrap()
}
