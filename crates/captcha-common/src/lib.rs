//! # Captcha Common
//!
//! Shared types, errors, and constants used across the CAPTCHA components.
//!
//! ## Modules
//! - `types` - Core data structures (DigitSequence, CaptchaId, Language)
//! - `error` - Common error type
//! - `constants` - Shared configuration constants

pub mod constants;
pub mod error;
pub mod types;

pub use error::{CaptchaError, Result};
pub use types::*;
