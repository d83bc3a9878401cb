//! Seal keys.

use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of a key id in bytes.
pub const KEY_ID_SIZE: usize = 32;

/// Size of the AES-256 key material in bytes.
pub const KEY_SIZE: usize = 32;

/// A sealing key: public 32-byte id plus secret AES-256 key material.
///
/// The key material is zeroized when the key is dropped. The id is not
/// secret; it is written in plaintext into every sealed stream so readers
/// can pick the right key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Key {
    #[zeroize(skip)]
    id: [u8; KEY_ID_SIZE],
    material: [u8; KEY_SIZE],
}

impl Key {
    /// Creates a key from an id and raw key material.
    #[must_use]
    pub const fn new(id: [u8; KEY_ID_SIZE], material: [u8; KEY_SIZE]) -> Self {
        Self { id, material }
    }

    /// Generates a key with random material under the given id.
    #[must_use]
    pub fn generate(id: [u8; KEY_ID_SIZE]) -> Self {
        let mut material = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut material);
        Self { id, material }
    }

    /// Returns the key id.
    #[must_use]
    pub fn id(&self) -> &[u8; KEY_ID_SIZE] {
        &self.id
    }

    pub(crate) fn material(&self) -> &[u8; KEY_SIZE] {
        &self.material
    }
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Key")
            .field("id", &self.id)
            .field("material", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_produces_distinct_material() {
        let a = Key::generate([1; KEY_ID_SIZE]);
        let b = Key::generate([1; KEY_ID_SIZE]);
        assert_ne!(a.material(), b.material());
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn debug_redacts_material() {
        let key = Key::new([2; KEY_ID_SIZE], [3; KEY_SIZE]);
        let s = format!("{key:?}");
        assert!(s.contains("REDACTED"));
        assert!(!s.contains('3'), "material leaked into debug output: {s}");
    }
}
