//! Solution storage.
//!
//! A store maps captcha ids to their solutions for a bounded time. The
//! facade only talks to the `SolutionStore` trait, so the in-process
//! `MemoryStore` and the shared `RedisStore` are interchangeable.

mod memory;
mod redis;

pub use memory::MemoryStore;
pub use redis::{RedisStore, RedisStoreConfig};

use captcha_common::{CaptchaId, DigitSequence, Result};

/// Storage backend for captcha solutions
pub trait SolutionStore: Send + Sync {
    /// Store (or overwrite) the solution for `id`
    fn set(&self, id: &CaptchaId, digits: DigitSequence) -> Result<()>;

    /// Look up the solution for `id`. With `clear`, the entry is removed in
    /// the same atomic step, so at most one caller ever receives it.
    fn get(&self, id: &CaptchaId, clear: bool) -> Result<Option<DigitSequence>>;

    /// Swap in new digits only if `id` is still live, as one atomic step.
    /// Returns `false` when the id is absent. The entry keeps its original
    /// expiry.
    fn replace(&self, id: &CaptchaId, digits: DigitSequence) -> Result<bool>;

    /// Drop expired entries. Runs synchronously on the calling thread.
    fn collect(&self);
}
