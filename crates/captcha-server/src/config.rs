//! Configuration management for captchad.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fmt;
use std::path::Path;

use captcha_common::constants::redis_keys::{DEFAULT_MAX_KEYS, DEFAULT_PREFIX};
use captcha_common::constants::{
    COLLECT_NUM, DEFAULT_LENGTH, DEFAULT_LISTEN_ADDR, DEFAULT_REDIS_URL, EXPIRATION_SECS,
    STD_HEIGHT, STD_WIDTH,
};

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Requests taking longer than this are aborted
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub image: ImageConfig,

    #[serde(default)]
    pub captcha: CaptchaConfig,

    #[serde(default)]
    pub assets: AssetsConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::Redis => f.write_str("redis"),
        }
    }
}

/// Solution store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis connection URL (redis backend only)
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Insertions between automatic collections (memory backend only)
    #[serde(default = "default_collect_num")]
    pub collect_num: usize,

    /// Lifetime of an unsolved captcha
    #[serde(default = "default_expiration")]
    pub expiration_secs: i64,

    #[serde(default = "default_redis_prefix")]
    pub redis_prefix: String,

    #[serde(default = "default_max_redis_keys")]
    pub max_redis_keys: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: default_redis_url(),
            collect_num: default_collect_num(),
            expiration_secs: default_expiration(),
            redis_prefix: default_redis_prefix(),
            max_redis_keys: default_max_redis_keys(),
        }
    }
}

/// Image rendering configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    #[serde(default = "default_width")]
    pub width: u32,

    #[serde(default = "default_height")]
    pub height: u32,

    /// Apply the sine-wave warp
    #[serde(default = "default_true")]
    pub distort: bool,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            distort: true,
        }
    }
}

/// Challenge configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CaptchaConfig {
    /// Digits per captcha when the client does not ask for a length
    #[serde(default = "default_length")]
    pub length: usize,

    /// Longest captcha a client may request
    #[serde(default = "default_max_length")]
    pub max_length: usize,

    /// Audio language when `?lang` is absent
    #[serde(default = "default_lang")]
    pub default_lang: String,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            length: default_length(),
            max_length: default_max_length(),
            default_lang: default_lang(),
        }
    }
}

/// Optional asset overrides; built-in glyphs and clips are used otherwise
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssetsConfig {
    /// TrueType font for digit glyphs
    #[serde(default)]
    pub font_path: Option<String>,

    /// Directory with `<lang>/<digit>.wav` and `beep.wav`.
    ///
    /// When unset, audio falls back to synthesized tone patterns rather than
    /// spoken digits. Set this in production.
    #[serde(default)]
    pub sounds_dir: Option<String>,
}

// Default value functions
fn default_listen_addr() -> String { DEFAULT_LISTEN_ADDR.to_string() }
fn default_request_timeout() -> u64 { 30 }
fn default_redis_url() -> String { DEFAULT_REDIS_URL.to_string() }
fn default_collect_num() -> usize { COLLECT_NUM }
fn default_expiration() -> i64 { EXPIRATION_SECS }
fn default_redis_prefix() -> String { DEFAULT_PREFIX.to_string() }
fn default_max_redis_keys() -> u64 { DEFAULT_MAX_KEYS }
fn default_width() -> u32 { STD_WIDTH }
fn default_height() -> u32 { STD_HEIGHT }
fn default_true() -> bool { true }
fn default_length() -> usize { DEFAULT_LENGTH }
fn default_max_length() -> usize { 16 }
fn default_lang() -> String { "en".to_string() }

impl AppConfig {
    /// Load configuration from file, with CLI overrides
    pub fn load(config_path: &str, args: &super::Args) -> Result<Self> {
        let mut config = if Path::new(config_path).exists() {
            Self::from_file(config_path)?
        } else {
            // Use defaults if config file doesn't exist
            tracing::warn!("Config file not found, using defaults");
            Self::default()
        };

        // Apply CLI overrides
        if let Some(ref redis_url) = args.redis_url {
            config.store.backend = StoreBackend::Redis;
            config.store.redis_url = redis_url.clone();
        }
        if let Some(ref listen) = args.listen {
            config.listen_addr = listen.clone();
        }

        config.validate()?;
        Ok(config)
    }

    fn from_file(config_path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(config_path))
            .build()
            .context("Failed to load config file")?;

        settings
            .try_deserialize()
            .context("Failed to parse config")
    }

    /// True when audio challenges will use the built-in tones instead of
    /// recorded speech
    pub fn uses_synthesized_clips(&self) -> bool {
        self.assets.sounds_dir.is_none()
    }

    /// Reject settings the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.captcha.length == 0 || self.captcha.length > self.captcha.max_length {
            bail!(
                "captcha.length must be between 1 and captcha.max_length ({})",
                self.captcha.max_length
            );
        }
        if self.image.width == 0 || self.image.height == 0 {
            bail!("image dimensions must be positive");
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be positive");
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            request_timeout_secs: default_request_timeout(),
            store: StoreConfig::default(),
            image: ImageConfig::default(),
            captcha: CaptchaConfig::default(),
            assets: AssetsConfig::default(),
        }
    }
}
