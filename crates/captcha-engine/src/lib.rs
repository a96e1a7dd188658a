//! Digit CAPTCHA engine.
//!
//! Generates random digit challenges and renders them as distorted PNG
//! images or noisy WAV audio. Solutions live in a pluggable
//! [`store::SolutionStore`]; [`CaptchaService`] drives the whole lifecycle.

pub mod assets;
pub mod audio;
pub mod draw;
pub mod imaging;
pub mod random;
pub mod service;
pub mod store;
pub mod wav;

pub use assets::{BuiltinGlyphs, ClipSet, DigitGlyphs, FontGlyphs, SoundClips};
pub use audio::{AudioSynthesizer, CaptchaAudio};
pub use imaging::{CaptchaImage, ImageOptions, ImageRenderer};
pub use service::CaptchaService;
pub use store::{MemoryStore, RedisStore, RedisStoreConfig, SolutionStore};
