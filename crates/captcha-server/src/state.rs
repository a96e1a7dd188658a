//! Application state and shared resources.

use anyhow::{Context, Result};
use chrono::TimeDelta;
use std::sync::Arc;

use captcha_common::Language;
use captcha_engine::{
    BuiltinGlyphs, CaptchaService, ClipSet, DigitGlyphs, FontGlyphs, ImageOptions, MemoryStore,
    RedisStore, RedisStoreConfig, SolutionStore, SoundClips,
};

use crate::config::{AppConfig, StoreBackend};

/// Glyph cell used when rasterizing a TrueType font
const FONT_CELL: (usize, usize) = (11, 16);

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<AppConfig>,

    /// Captcha lifecycle
    pub captcha: Arc<CaptchaService>,

    /// Audio language when the request names none
    pub default_lang: Language,
}

impl AppState {
    /// Build the store and assets named by `config`, connecting to Redis if
    /// it is the configured backend
    pub async fn new(config: AppConfig) -> Result<Self> {
        let store = build_store(&config).await?;
        let glyphs = load_glyphs(&config)?;
        let clips = load_clips(&config)?;
        Ok(Self::with_parts(config, store, glyphs, clips))
    }

    /// Assemble state from ready-made parts
    pub fn with_parts(
        config: AppConfig,
        store: Arc<dyn SolutionStore>,
        glyphs: Arc<dyn DigitGlyphs>,
        clips: Arc<dyn SoundClips>,
    ) -> Self {
        let captcha = CaptchaService::new(store, glyphs, clips).with_image_options(ImageOptions {
            distort: config.image.distort,
        });
        let default_lang = Language::from_tag(&config.captcha.default_lang);

        Self {
            config: Arc::new(config),
            captcha: Arc::new(captcha),
            default_lang,
        }
    }
}

async fn build_store(config: &AppConfig) -> Result<Arc<dyn SolutionStore>> {
    let expiration = TimeDelta::seconds(config.store.expiration_secs);

    match config.store.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new(
            config.store.collect_num,
            expiration,
        ))),
        StoreBackend::Redis => {
            let store = Arc::new(
                RedisStore::new(RedisStoreConfig {
                    url: config.store.redis_url.clone(),
                    prefix: config.store.redis_prefix.clone(),
                    expiration,
                    max_keys: config.store.max_redis_keys,
                })
                .context("Failed to create Redis store")?,
            );

            let pinger = Arc::clone(&store);
            tokio::task::spawn_blocking(move || pinger.connect())
                .await
                .context("Redis connect task failed")?
                .context("Failed to connect to Redis")?;
            tracing::info!(url = %config.store.redis_url, "Redis connected");

            Ok(store)
        }
    }
}

fn load_glyphs(config: &AppConfig) -> Result<Arc<dyn DigitGlyphs>> {
    match &config.assets.font_path {
        Some(path) => {
            let (w, h) = FONT_CELL;
            let glyphs = FontGlyphs::from_file(path, w, h)
                .with_context(|| format!("Failed to load font {}", path))?;
            tracing::info!(font = %path, "Using font glyphs");
            Ok(Arc::new(glyphs))
        }
        None => Ok(Arc::new(BuiltinGlyphs::new())),
    }
}

fn load_clips(config: &AppConfig) -> Result<Arc<dyn SoundClips>> {
    match &config.assets.sounds_dir {
        Some(dir) => {
            let clips = ClipSet::from_dir(dir)
                .with_context(|| format!("Failed to load sound clips from {}", dir))?;
            Ok(Arc::new(clips))
        }
        None => {
            tracing::warn!(
                "No sounds_dir configured, audio uses synthesized tones instead of speech"
            );
            Ok(Arc::new(ClipSet::synthesized()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_state_from_defaults() {
        let state = tokio_test::block_on(AppState::new(AppConfig::default())).unwrap();
        assert_eq!(state.default_lang, Language::En);
        let id = state.captcha.create(6).unwrap();
        assert!(state.captcha.image(&id, 240, 80).is_ok());
    }

    #[test]
    fn test_missing_assets_fail() {
        let mut config = AppConfig::default();
        config.assets.sounds_dir = Some("/nonexistent/sounds".to_string());
        assert!(tokio_test::block_on(AppState::new(config)).is_err());

        let mut config = AppConfig::default();
        config.assets.font_path = Some("/nonexistent/font.ttf".to_string());
        assert!(tokio_test::block_on(AppState::new(config)).is_err());
    }

    #[test]
    fn test_default_lang_from_config() {
        let mut config = AppConfig::default();
        config.captcha.default_lang = "ja".to_string();
        let state = tokio_test::block_on(AppState::new(config)).unwrap();
        assert_eq!(state.default_lang, Language::Ja);
    }
}
