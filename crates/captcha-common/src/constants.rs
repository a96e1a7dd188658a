//! Shared constants for CAPTCHA components.

/// Standard number of digits in a captcha
pub const DEFAULT_LENGTH: usize = 6;

/// Standard image width in pixels
pub const STD_WIDTH: u32 = 240;

/// Standard image height in pixels
pub const STD_HEIGHT: u32 = 80;

/// Length of a generated captcha id
pub const ID_LEN: usize = 20;

/// Characters allowed in a generated captcha id
pub const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Longest id accepted from callers
pub const MAX_ID_LEN: usize = 64;

/// Number of stored captchas that triggers collection
pub const COLLECT_NUM: usize = 100;

/// Captcha expiration (10 minutes)
pub const EXPIRATION_SECS: i64 = 600;

/// Audio sample rate (8-bit mono PCM)
pub const SAMPLE_RATE: usize = 8000;

/// Default HTTP listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8666";

/// Default Redis connection URL
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Redis store settings
pub mod redis_keys {
    /// Key prefix: {prefix}.{captcha_id}
    pub const DEFAULT_PREFIX: &str = "captcha";

    /// Refuse new captchas once the database holds this many keys
    pub const DEFAULT_MAX_KEYS: u64 = 500_000;
}
