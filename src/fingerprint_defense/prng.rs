//! Session seed and seeded hash for the session-randomized profile.
//!
//! The seed is drawn once per module instance (one per document) and every
//! profile field drawn from it uses its own fixed index, so a profile never
//! changes after it has been built.

use std::cell::Cell;

thread_local! {
    static SESSION_SEED: Cell<Option<u32>> = const { Cell::new(None) };
}

/// Index offsets, one per drawn field.
pub mod draw {
    pub const HARDWARE_CONCURRENCY: u32 = 0x10;
    pub const DEVICE_MEMORY: u32 = 0x20;
    pub const SCREEN: u32 = 0x30;
}

/// Session-scoped pseudo-random number generator.
pub struct SessionPrng;

impl SessionPrng {
    /// Get or initialize the session seed.
    /// Uses `getrandom` (backed by crypto.getRandomValues in WASM).
    pub fn seed() -> u32 {
        SESSION_SEED.with(|s| {
            if let Some(seed) = s.get() {
                return seed;
            }
            let mut bytes = [0u8; 4];
            let seed = match getrandom::getrandom(&mut bytes) {
                Ok(()) => u32::from_le_bytes(bytes),
                Err(err) => {
                    log::warn!("session seed unavailable, using fixed seed: {}", err);
                    0x9E37_79B9
                }
            };
            s.set(Some(seed));
            seed
        })
    }

    /// Deterministic hash mixing (murmurhash-style).
    #[inline]
    pub fn seeded_random(seed: u32, index: u32) -> u32 {
        let mut h = seed ^ index;
        h = (h ^ (h >> 16)).wrapping_mul(0x45d9f3b);
        h = (h ^ (h >> 13)).wrapping_mul(0x45d9f3b);
        h ^ (h >> 16)
    }

    /// Pick one entry of a non-empty allow-list.
    pub fn pick<T: Copy>(seed: u32, index: u32, items: &[T]) -> T {
        let slot = Self::seeded_random(seed, index) as usize % items.len();
        items[slot]
    }
}
