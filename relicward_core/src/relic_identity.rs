//! The "IDENTITY" Engine - tamper-evident relic stamps
//!
//! Every relic carries four embedded fields: id, class, creation time and a
//! signature binding the other three under a process-wide secret:
//!
//! ```text
//! signature = hex(HMAC-SHA256(secret, "<id>|<CLASS>|<created_at>"))
//! ```
//!
//! Verification needs nothing but the item and the secret, so a stamp can be
//! checked anywhere in the world without consulting the registry. Rotating the
//! secret invalidates every stamp in existence.

use crate::world::ItemStack;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Length of the integrity secret in bytes.
pub const SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Secret file error: {0}")]
    Io(String),

    #[error("Malformed secret: {0}")]
    MalformedSecret(String),
}

impl IdentityError {
    pub fn io(err: impl std::fmt::Display) -> Self {
        Self::Io(err.to_string())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedSecret(msg.into())
    }
}

/// Population class of a relic. Each class has its own cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelicClass {
    /// Enchantment/attachment limited.
    Restricted,
    /// No enchantment limits.
    Unrestricted,
}

impl RelicClass {
    pub const ALL: [RelicClass; 2] = [RelicClass::Restricted, RelicClass::Unrestricted];

    /// Canonical form embedded in stamps and the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            RelicClass::Restricted => "RESTRICTED",
            RelicClass::Unrestricted => "UNRESTRICTED",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            RelicClass::Restricted => "Restricted",
            RelicClass::Unrestricted => "Unrestricted",
        }
    }
}

impl std::fmt::Display for RelicClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RelicClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "RESTRICTED" => Ok(RelicClass::Restricted),
            "UNRESTRICTED" => Ok(RelicClass::Unrestricted),
            _ => Err(format!("Unknown relic class: {}", s)),
        }
    }
}

// ============================================================================
// SECRET
// ============================================================================

/// Process-wide signing secret. Lives in its own file, never in the store.
#[derive(Clone, PartialEq, Eq)]
pub struct IntegritySecret([u8; SECRET_LEN]);

impl IntegritySecret {
    pub fn from_bytes(bytes: [u8; SECRET_LEN]) -> Self {
        Self(bytes)
    }

    /// Generates a fresh secret from the given entropy source.
    pub fn generate(fill: impl FnOnce(&mut [u8])) -> Self {
        let mut bytes = [0u8; SECRET_LEN];
        fill(&mut bytes);
        Self(bytes)
    }

    pub fn from_hex(encoded: &str) -> Result<Self, IdentityError> {
        let raw = hex::decode(encoded.trim())
            .map_err(|e| IdentityError::malformed(format!("not hex: {}", e)))?;
        let bytes: [u8; SECRET_LEN] = raw.try_into().map_err(|raw: Vec<u8>| {
            IdentityError::malformed(format!("expected {} bytes, got {}", SECRET_LEN, raw.len()))
        })?;
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Loads the secret from `path`, creating it on first start.
    ///
    /// A malformed file is an error rather than a silent rotation.
    pub fn load_or_create(
        path: &Path,
        fill: impl FnOnce(&mut [u8]),
    ) -> Result<Self, IdentityError> {
        if path.exists() {
            let encoded = std::fs::read_to_string(path).map_err(IdentityError::io)?;
            let secret = Self::from_hex(&encoded)?;
            info!("Loaded integrity secret from {}", path.display());
            return Ok(secret);
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(IdentityError::io)?;
            }
        }
        let secret = Self::generate(fill);
        std::fs::write(path, secret.to_hex()).map_err(IdentityError::io)?;
        warn!(
            "Generated a new integrity secret at {}; relics stamped under any previous secret will fail verification",
            path.display()
        );
        Ok(secret)
    }
}

impl std::fmt::Debug for IntegritySecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "IntegritySecret(..)")
    }
}

// ============================================================================
// STAMP
// ============================================================================

/// Signs and verifies relic stamps.
#[derive(Clone)]
pub struct RelicIdentity {
    /// MAC keyed with the secret; cloned per computation.
    keyed: HmacSha256,
}

impl RelicIdentity {
    pub fn new(secret: &IntegritySecret) -> Result<Self, IdentityError> {
        let keyed = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| IdentityError::malformed(e.to_string()))?;
        Ok(Self { keyed })
    }

    fn payload(id: &str, class: &str, created_at: i64) -> String {
        format!("{}|{}|{}", id, class, created_at)
    }

    fn sign(&self, id: &str, class: &str, created_at: i64) -> String {
        let mut mac = self.keyed.clone();
        mac.update(Self::payload(id, class, created_at).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Writes id, class, creation time and signature onto `item`.
    ///
    /// Identical inputs always produce an identical signature.
    pub fn stamp(&self, item: &mut ItemStack, id: &str, class: RelicClass, created_at: i64) {
        item.tags.id = Some(id.to_string());
        item.tags.class = Some(class.as_str().to_string());
        item.tags.created_at = Some(created_at);
        item.tags.signature = Some(self.sign(id, class.as_str(), created_at));
    }

    /// Recomputes the MAC from the item's own fields.
    ///
    /// Any missing field, or a signature that is not valid hex, fails.
    pub fn verify(&self, item: &ItemStack) -> bool {
        let tags = &item.tags;
        let (Some(id), Some(class), Some(created_at), Some(signature)) =
            (&tags.id, &tags.class, tags.created_at, &tags.signature)
        else {
            return false;
        };
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };

        let mut mac = self.keyed.clone();
        mac.update(Self::payload(id, class, created_at).as_bytes());
        mac.verify_slice(&expected).is_ok()
    }

    /// A relic that was never stamped.
    pub fn is_unregistered(&self, item: &ItemStack) -> bool {
        item.is_relic() && item.tags.id.is_none()
    }

    /// Carries an id but the stamp does not verify.
    pub fn is_tampered(&self, item: &ItemStack) -> bool {
        item.tags.id.is_some() && !self.verify(item)
    }

    /// Recomputes the signature from the item's current fields.
    ///
    /// Returns false when a field is missing and nothing was signed.
    pub fn resign(&self, item: &mut ItemStack) -> bool {
        let (Some(id), Some(class), Some(created_at)) =
            (item.tags.id.clone(), item.tags.class.clone(), item.tags.created_at)
        else {
            return false;
        };
        item.tags.signature = Some(self.sign(&id, &class, created_at));
        true
    }

    /// Changes the embedded class and re-signs.
    pub fn reclass(&self, item: &mut ItemStack, class: RelicClass) -> bool {
        if item.tags.id.is_none() || item.tags.created_at.is_none() {
            return false;
        }
        item.tags.class = Some(class.as_str().to_string());
        self.resign(item)
    }

    pub fn id_of(item: &ItemStack) -> Option<&str> {
        item.relic_id()
    }

    pub fn class_of(item: &ItemStack) -> Option<RelicClass> {
        if !item.is_relic() {
            return None;
        }
        item.tags.class.as_deref().and_then(|c| c.parse().ok())
    }

    pub fn created_at_of(item: &ItemStack) -> Option<i64> {
        if !item.is_relic() {
            return None;
        }
        item.tags.created_at
    }
}

impl std::fmt::Debug for RelicIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RelicIdentity(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn identity(byte: u8) -> RelicIdentity {
        RelicIdentity::new(&IntegritySecret::from_bytes([byte; SECRET_LEN])).unwrap()
    }

    #[test]
    fn test_stamp_then_verify_passes() {
        let identity = identity(7);
        let mut item = ItemStack::blank_relic();
        identity.stamp(&mut item, "MC-0001", RelicClass::Restricted, 1_700_000_000);

        assert!(identity.verify(&item));
        assert!(!identity.is_tampered(&item));
        assert!(!identity.is_unregistered(&item));
        assert_eq!(RelicIdentity::id_of(&item), Some("MC-0001"));
        assert_eq!(RelicIdentity::class_of(&item), Some(RelicClass::Restricted));
        assert_eq!(RelicIdentity::created_at_of(&item), Some(1_700_000_000));
    }

    #[test]
    fn test_blank_relic_is_unregistered_not_tampered() {
        let identity = identity(7);
        let item = ItemStack::blank_relic();

        assert!(identity.is_unregistered(&item));
        assert!(!identity.is_tampered(&item));
        assert!(!identity.verify(&item));
    }

    #[test]
    fn test_plain_item_is_neither() {
        let identity = identity(7);
        let item = ItemStack::plain("stick");
        assert!(!identity.is_unregistered(&item));
        assert!(!identity.is_tampered(&item));
    }

    #[test]
    fn test_class_flip_without_resign_is_tampered() {
        let identity = identity(7);
        let mut item = ItemStack::blank_relic();
        identity.stamp(&mut item, "MC-0007", RelicClass::Restricted, 42);

        item.tags.class = Some("UNRESTRICTED".to_string());

        assert!(!identity.verify(&item));
        assert!(identity.is_tampered(&item));
    }

    #[test]
    fn test_reclass_resigns() {
        let identity = identity(7);
        let mut item = ItemStack::blank_relic();
        identity.stamp(&mut item, "MC-0003", RelicClass::Restricted, 42);

        assert!(identity.reclass(&mut item, RelicClass::Unrestricted));
        assert!(identity.verify(&item));
        assert_eq!(RelicIdentity::class_of(&item), Some(RelicClass::Unrestricted));
    }

    #[test]
    fn test_missing_signature_fails_without_panic() {
        let identity = identity(7);
        let mut item = ItemStack::blank_relic();
        identity.stamp(&mut item, "MC-0001", RelicClass::Restricted, 42);
        item.tags.signature = None;
        assert!(!identity.verify(&item));

        item.tags.signature = Some("not-hex".to_string());
        assert!(!identity.verify(&item));

        item.tags.created_at = None;
        assert!(identity.is_tampered(&item));
    }

    #[test]
    fn test_secret_rotation_invalidates_stamps() {
        let old = identity(1);
        let new = identity(2);
        let mut item = ItemStack::blank_relic();
        old.stamp(&mut item, "MC-0001", RelicClass::Unrestricted, 5);

        assert!(old.verify(&item));
        assert!(!new.verify(&item));
    }

    #[test]
    fn test_secret_hex_roundtrip_and_errors() {
        let secret = IntegritySecret::from_bytes([0xab; SECRET_LEN]);
        let parsed = IntegritySecret::from_hex(&secret.to_hex()).unwrap();
        assert!(parsed == secret);

        assert!(IntegritySecret::from_hex("zz").is_err());
        assert!(IntegritySecret::from_hex("abcd").is_err());
    }

    #[test]
    fn test_secret_file_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("integrity.key");

        let first = IntegritySecret::load_or_create(&path, |b| b.fill(9)).unwrap();
        assert!(path.exists());

        // A second start must read the file, not regenerate
        let second = IntegritySecret::load_or_create(&path, |b| b.fill(1)).unwrap();
        assert!(first == second);
        assert_eq!(second.as_bytes(), &[9u8; SECRET_LEN]);
    }

    #[test]
    fn test_malformed_secret_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("integrity.key");
        std::fs::write(&path, "garbage").unwrap();

        let result = IntegritySecret::load_or_create(&path, |b| b.fill(1));
        assert!(matches!(result, Err(IdentityError::MalformedSecret(_))));
    }

    #[test]
    fn test_class_parse() {
        assert_eq!("restricted".parse::<RelicClass>(), Ok(RelicClass::Restricted));
        assert_eq!("UNRESTRICTED".parse::<RelicClass>(), Ok(RelicClass::Unrestricted));
        assert!("legendary".parse::<RelicClass>().is_err());
    }

    proptest! {
        #[test]
        fn prop_stamp_is_idempotent(
            num in 1u32..100_000,
            created_at in 0i64..4_000_000_000,
            unrestricted in any::<bool>(),
            key in any::<u8>(),
        ) {
            let identity = identity(key);
            let class = if unrestricted { RelicClass::Unrestricted } else { RelicClass::Restricted };
            let id = format!("MC-{:04}", num);

            let mut a = ItemStack::blank_relic();
            let mut b = ItemStack::blank_relic();
            identity.stamp(&mut a, &id, class, created_at);
            identity.stamp(&mut b, &id, class, created_at);

            prop_assert!(identity.verify(&a));
            prop_assert_eq!(&a.tags.signature, &b.tags.signature);

            // Re-stamping in place changes nothing
            let before = a.clone();
            identity.stamp(&mut a, &id, class, created_at);
            prop_assert_eq!(before, a);
        }
    }
}
