//! Lock-free DEK cache.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use enclave_crypto::Dek;

/// Holds the unwrapped DEK. Reads never block writers or each other.
#[derive(Default)]
pub struct DekCache {
    slot: ArcSwapOption<Dek>,
}

impl DekCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<Dek>> {
        self.slot.load_full()
    }

    pub fn set(&self, dek: Arc<Dek>) {
        self.slot.store(Some(dek));
    }

    /// Drop the cached DEK. Outstanding `Arc`s stay valid; the key is
    /// zeroized when the last one goes away.
    pub fn clear(&self) {
        self.slot.store(None);
    }

    pub fn is_populated(&self) -> bool {
        self.slot.load().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_clear() {
        let cache = DekCache::new();
        assert!(cache.get().is_none());

        cache.set(Arc::new(Dek::from_bytes([7; 32])));
        assert!(cache.is_populated());
        let held = cache.get().unwrap();

        cache.clear();
        assert!(cache.get().is_none());
        assert_eq!(held.as_bytes(), &[7; 32]);
    }
}
