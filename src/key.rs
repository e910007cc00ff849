//! Key serialization and the data-source collaborator contract (§6, §9).

use async_trait::async_trait;
use std::fmt::Display;
use std::hash::Hash;

/// Canonical string form of a key, used for the membership filter, the
/// hot-key set, and lock naming.
///
/// Implementers must make this injective over the key population: two
/// distinct keys must never collide on the same string, or the filter and
/// lock namespace silently merge them.
pub trait KeyCodec {
    /// Render the canonical string form of this key.
    fn key_string(&self) -> String;
}

/// Blanket impl for any key that is already `Display` — the common case for
/// string-like and integer-like keys.
impl<K> KeyCodec for K
where
    K: Display + Eq + Hash,
{
    fn key_string(&self) -> String {
        self.to_string()
    }
}

/// The data-source collaborator: a pure function `k -> v?`, where absence
/// means "no such record". Any underlying failure is reported as
/// `CacheErrorType::DataSource` (§4.10) by the facade's error classifier,
/// never surfaced directly to callers of `get`.
///
/// Modeled on the teacher's `BackingStore` trait (`enterprise::cache::strategy`):
/// one required async method, object-safe, `Send + Sync` for use from any
/// worker thread.
#[async_trait]
pub trait DataLoader<K, V>: Send + Sync
where
    K: Send + Sync,
    V: Send + Sync,
{
    /// Load the authoritative value for `key`, or `None` if it does not exist.
    async fn load(&self, key: &K) -> Result<Option<V>, String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_keys_get_a_blanket_codec() {
        assert_eq!(42i32.key_string(), "42");
        assert_eq!("user:1".to_string().key_string(), "user:1");
    }
}
