//! Seed hashing and the linear congruential generator that drives song
//! generation.
//!
//! The generator is a plain value: callers own it and thread it through the
//! generation functions, so two songs can be derived side by side without
//! touching each other's sequence.

const LCG_MULTIPLIER: u64 = 1_664_525;
const LCG_INCREMENT: u64 = 1_013_904_223;
const LCG_MODULUS: u64 = 1 << 32;

/// Numerical Recipes LCG over `u32` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lcg {
    state: u32,
}

impl Lcg {
    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    /// Builds a generator from a seed string via [`hash_seed`].
    pub fn from_seed_str(seed: &str) -> Self {
        Self::new(hash_seed(seed))
    }

    pub fn state(&self) -> u32 {
        self.state
    }

    /// Steps the generator once and returns the new state scaled to `[0, 1)`.
    pub fn next_unit(&mut self) -> f64 {
        let next = (LCG_MULTIPLIER * u64::from(self.state) + LCG_INCREMENT) % LCG_MODULUS;
        self.state = next as u32;
        next as f64 / LCG_MODULUS as f64
    }

    /// Picks an index in `0..len` with one draw. `len` must be non-zero.
    pub fn pick_index(&mut self, len: usize) -> usize {
        debug_assert!(len > 0, "cannot pick from an empty set");
        let index = (self.next_unit() * len as f64).floor() as usize;
        index.min(len.saturating_sub(1))
    }

    /// Picks an element of `items` with one draw.
    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> &'a T {
        &items[self.pick_index(items.len())]
    }

    /// Uniform integer in `min..=max` with one draw. `min` must not exceed
    /// `max`.
    pub fn range_inclusive(&mut self, min: u32, max: u32) -> u32 {
        let span = (u64::from(max) - u64::from(min) + 1) as f64;
        let offset = (self.next_unit() * span).floor() as u64;
        (u64::from(min) + offset).min(u64::from(max)) as u32
    }

    /// `target ± jitter` with one draw.
    pub fn jitter(&mut self, target: f64, jitter: f64) -> f64 {
        target + (self.next_unit() * 2.0 - 1.0) * jitter
    }
}

/// 31-multiplier rolling hash over UTF-16 code units, wrapped to `i32` and
/// folded to its absolute value. Stable across platforms and runs.
pub fn hash_seed(seed: &str) -> u32 {
    let hash = seed.encode_utf16().fold(0_i32, |hash, unit| {
        hash.wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(i32::from(unit))
    });
    hash.unsigned_abs()
}

/// Draws a fresh hexadecimal seed string from system entropy.
pub fn fresh_seed() -> String {
    let value: u64 = rand::random::<u64>() & ((1 << 53) - 1);
    format!("{value:x}")
}
