//! Captcha lifecycle: create, render on demand, reload, verify, collect.

use std::io::Write;
use std::sync::Arc;

use captcha_common::{CaptchaError, CaptchaId, DigitSequence, Language, Result};

use crate::assets::{DigitGlyphs, SoundClips};
use crate::audio::{AudioSynthesizer, CaptchaAudio};
use crate::imaging::{CaptchaImage, ImageOptions, ImageRenderer};
use crate::random::{fast_rng, random_digits, random_id};
use crate::store::SolutionStore;

/// Ties the random source, the renderers, and a solution store together.
///
/// Rendering never removes a stored solution; verification always does.
#[derive(Clone)]
pub struct CaptchaService {
    store: Arc<dyn SolutionStore>,
    renderer: ImageRenderer,
    synth: AudioSynthesizer,
}

impl CaptchaService {
    pub fn new(
        store: Arc<dyn SolutionStore>,
        glyphs: Arc<dyn DigitGlyphs>,
        clips: Arc<dyn SoundClips>,
    ) -> Self {
        Self {
            store,
            renderer: ImageRenderer::new(glyphs),
            synth: AudioSynthesizer::new(clips),
        }
    }

    pub fn with_image_options(mut self, options: ImageOptions) -> Self {
        self.renderer = self.renderer.with_options(options);
        self
    }

    /// Register a new captcha with `length` random digits and return its id
    pub fn create(&self, length: usize) -> Result<CaptchaId> {
        if length == 0 {
            return Err(CaptchaError::InvalidInput(
                "captcha length must be positive".to_string(),
            ));
        }
        let id = random_id();
        self.store.set(&id, random_digits(length))?;
        tracing::debug!(%id, length, "Created captcha");
        Ok(id)
    }

    /// Replace the solution for `id` with fresh digits of the same length.
    /// Returns `false` when the id is unknown, or was verified or collected
    /// before the new digits landed.
    pub fn reload(&self, id: &CaptchaId) -> Result<bool> {
        let Some(old) = self.store.get(id, false)? else {
            return Ok(false);
        };
        let replaced = self.store.replace(id, random_digits(old.len()))?;
        tracing::debug!(%id, replaced, "Reloaded captcha");
        Ok(replaced)
    }

    fn solution(&self, id: &CaptchaId) -> Result<DigitSequence> {
        self.store.get(id, false)?.ok_or(CaptchaError::NotFound)
    }

    /// Render the image for `id` without consuming it
    pub fn image(&self, id: &CaptchaId, width: u32, height: u32) -> Result<CaptchaImage> {
        if width == 0 || height == 0 {
            return Err(CaptchaError::InvalidInput(format!(
                "invalid image size {}x{}",
                width, height
            )));
        }
        let digits = self.solution(id)?;
        Ok(self.renderer.render(&digits, width, height, &mut fast_rng()))
    }

    /// Render the image for `id` as PNG into `sink`
    pub fn render_image<W: Write>(
        &self,
        sink: W,
        id: &CaptchaId,
        width: u32,
        height: u32,
    ) -> Result<()> {
        self.image(id, width, height)?.write_png(sink)
    }

    /// Synthesize the audio challenge for `id` without consuming it
    pub fn audio(&self, id: &CaptchaId, language: Language) -> Result<CaptchaAudio> {
        let digits = self.solution(id)?;
        Ok(self.synth.render(&digits, language, &mut fast_rng()))
    }

    /// Render the audio for `id` as WAV into `sink`, returning the byte count
    pub fn render_audio<W: Write>(
        &self,
        sink: W,
        id: &CaptchaId,
        language: Language,
    ) -> Result<u64> {
        self.audio(id, language)?.write_wav(sink)
    }

    /// Check `guess` against the stored solution. The id is consumed whether
    /// or not the guess matches; an empty guess never matches.
    pub fn verify(&self, id: &CaptchaId, guess: &DigitSequence) -> Result<bool> {
        let stored = self.store.get(id, true)?;
        let matched = !guess.is_empty() && stored.as_ref() == Some(guess);
        tracing::debug!(%id, found = stored.is_some(), matched, "Verified captcha");
        Ok(matched)
    }

    /// Like `verify`, for an answer typed by a user. An unparsable answer
    /// still consumes the id.
    pub fn verify_str(&self, id: &CaptchaId, answer: &str) -> Result<bool> {
        match DigitSequence::parse(answer) {
            Ok(guess) => self.verify(id, &guess),
            Err(_) => {
                self.store.get(id, true)?;
                tracing::debug!(%id, "Rejected malformed answer");
                Ok(false)
            }
        }
    }

    /// Trigger expiry collection on a detached thread
    pub fn collect(&self) {
        let store = Arc::clone(&self.store);
        std::thread::spawn(move || store.collect());
    }
}
