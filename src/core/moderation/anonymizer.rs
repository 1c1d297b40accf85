// Identity anonymizer - keyed hash from raw user id to identity token.
//
// HMAC-SHA256 over the decimal form of the id. The MAC computation does not
// branch on key material.

use super::moderation_models::{IdentityToken, KeyMode};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

/// Length of a generated key, 256 bits.
pub const GENERATED_KEY_LEN: usize = 32;

/// Secret key bytes, zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct AnonymizationKey {
    bytes: Vec<u8>,
}

impl AnonymizationKey {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Fresh key from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; GENERATED_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn anonymize(&self, raw_id: u64) -> IdentityToken {
        anonymize(raw_id, self)
    }
}

impl std::fmt::Debug for AnonymizationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AnonymizationKey(<{} bytes>)", self.bytes.len())
    }
}

/// Pure function of `(raw_id, key)`.
pub fn anonymize(raw_id: u64, key: &AnonymizationKey) -> IdentityToken {
    // HMAC accepts keys of any length, so construction cannot fail.
    let mut mac = <HmacSha256 as Mac>::new_from_slice(&key.bytes)
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
    mac.update(raw_id.to_string().as_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    IdentityToken::from_bytes(out)
}

/// Holds the single active key.
///
/// Event processing holds a read lease for as long as it works with tokens
/// derived from the key; rotation takes the write lease, which excludes
/// every reader until the swap and the counter wipe are both done.
pub struct IdentityAnonymizer {
    key: RwLock<AnonymizationKey>,
    mode: KeyMode,
}

impl IdentityAnonymizer {
    /// Operator-supplied key that never rotates.
    pub fn fixed(key: AnonymizationKey) -> Self {
        Self {
            key: RwLock::new(key),
            mode: KeyMode::Fixed,
        }
    }

    /// Generated key that the rotation scheduler replaces.
    pub fn rotating() -> Self {
        Self {
            key: RwLock::new(AnonymizationKey::generate()),
            mode: KeyMode::Rotating,
        }
    }

    pub fn mode(&self) -> KeyMode {
        self.mode
    }

    /// Shared lease on the current key. Waits while a rotation is in progress.
    pub async fn lease(&self) -> RwLockReadGuard<'_, AnonymizationKey> {
        self.key.read().await
    }

    /// Exclusive lease, only for rotation.
    pub(crate) async fn lease_exclusive(&self) -> RwLockWriteGuard<'_, AnonymizationKey> {
        self.key.write().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_input_same_token() {
        let key = AnonymizationKey::from_bytes(b"0123456789abcdef".to_vec());
        assert_eq!(key.anonymize(42), key.anonymize(42));
    }

    #[test]
    fn test_distinct_ids_distinct_tokens() {
        let key = AnonymizationKey::generate();
        let tokens: std::collections::HashSet<_> =
            (1..=1000u64).map(|id| key.anonymize(id)).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn test_distinct_keys_unlinkable() {
        let k1 = AnonymizationKey::generate();
        let k2 = AnonymizationKey::generate();
        assert_ne!(k1.anonymize(42), k2.anonymize(42));
    }

    #[test]
    fn test_known_hmac_vector() {
        // HMAC-SHA256(key = "key", msg = "42")
        let key = AnonymizationKey::from_bytes(b"key".to_vec());
        let mut mac = <HmacSha256 as Mac>::new_from_slice(b"key").unwrap();
        mac.update(b"42");
        let expected = mac.finalize().into_bytes();
        assert_eq!(&key.anonymize(42).as_bytes()[..], &expected[..]);
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let key = AnonymizationKey::from_bytes(vec![7u8; 32]);
        assert_eq!(format!("{:?}", key), "AnonymizationKey(<32 bytes>)");
    }

    #[tokio::test]
    async fn test_rotating_anonymizer_generates_key() {
        let anonymizer = IdentityAnonymizer::rotating();
        assert_eq!(anonymizer.mode(), KeyMode::Rotating);
        let token = anonymizer.lease().await.anonymize(1);
        assert_eq!(token, anonymizer.lease().await.anonymize(1));
    }
}
