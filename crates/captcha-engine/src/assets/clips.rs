//! Spoken digit clips.
//!
//! Clips are raw unsigned 8-bit mono PCM at 8 kHz, 128 being silence.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::path::Path;

use captcha_common::constants::SAMPLE_RATE;
use captcha_common::{CaptchaError, Language, Result};

use crate::wav::parse_pcm;

/// Provides one PCM clip per digit per language, plus the framing beep
pub trait SoundClips: Send + Sync {
    /// Clip for a digit in 0-9. Unsupported languages fall back to English.
    fn clip(&self, digit: u8, language: Language) -> &[u8];

    /// Beep used to frame the challenge
    fn beep(&self) -> &[u8];

    /// Length of the longest digit clip for a language
    fn longest_clip(&self, language: Language) -> usize {
        (0..10)
            .map(|d| self.clip(d, language).len())
            .max()
            .unwrap_or(0)
    }
}

/// Clip table keyed by language
#[derive(Debug, Clone)]
pub struct ClipSet {
    digits: HashMap<Language, Vec<Vec<u8>>>,
    beep: Vec<u8>,
}

impl ClipSet {
    /// Built-in clips synthesized from tone patterns.
    ///
    /// Every digit gets a distinct two-syllable contour; languages differ by
    /// base pitch so a listener can tell the sets apart. These are tones, not
    /// speech: fine for development and tests, but a real deployment loads
    /// recorded clips with [`ClipSet::from_dir`].
    pub fn synthesized() -> Self {
        let digits = Language::ALL
            .iter()
            .map(|&lang| {
                let base = base_pitch(lang);
                let clips = (0..10u8).map(|d| synth_digit(d, base)).collect();
                (lang, clips)
            })
            .collect();

        Self {
            digits,
            beep: synth_beep(),
        }
    }

    /// Load clips from `<dir>/<lang>/<digit>.wav` and `<dir>/beep.wav`.
    ///
    /// Files must be 8 kHz 8-bit mono PCM WAVs; any other sample format is
    /// rejected rather than played as noise. A missing language directory falls back to `en`, which is
    /// required.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let beep = read_pcm(&dir.join("beep.wav"))?;

        let mut digits = HashMap::new();
        for lang in Language::ALL {
            let lang_dir = dir.join(lang.tag());
            if !lang_dir.is_dir() {
                if lang == Language::En {
                    return Err(CaptchaError::Asset(format!(
                        "missing required clip directory {}",
                        lang_dir.display()
                    )));
                }
                tracing::debug!(lang = %lang, "No clips for language, using English");
                continue;
            }
            let clips = (0..10)
                .map(|d| read_pcm(&lang_dir.join(format!("{}.wav", d))))
                .collect::<Result<Vec<_>>>()?;
            digits.insert(lang, clips);
        }

        tracing::info!(dir = %dir.display(), languages = digits.len(), "Loaded sound clips");

        Ok(Self { digits, beep })
    }

    fn set_for(&self, language: Language) -> &[Vec<u8>] {
        self.digits
            .get(&language)
            .or_else(|| self.digits.get(&Language::En))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl SoundClips for ClipSet {
    fn clip(&self, digit: u8, language: Language) -> &[u8] {
        &self.set_for(language)[usize::from(digit)]
    }

    fn beep(&self) -> &[u8] {
        &self.beep
    }
}

/// Read a WAV file and return its PCM payload
fn read_pcm(path: &Path) -> Result<Vec<u8>> {
    let data = std::fs::read(path)
        .map_err(|e| CaptchaError::Asset(format!("failed to read {}: {}", path.display(), e)))?;
    parse_pcm(&data)
        .map(<[u8]>::to_vec)
        .map_err(|e| CaptchaError::Asset(format!("{}: {}", path.display(), e)))
}

fn base_pitch(lang: Language) -> f64 {
    match lang {
        Language::En => 140.0,
        Language::Ru => 120.0,
        Language::Zh => 180.0,
        Language::Ja => 200.0,
    }
}

fn to_sample(v: f64) -> u8 {
    (128.0 + v).round().clamp(0.0, 255.0) as u8
}

/// Voiced tone with a few harmonics, shaped by a half-sine envelope
fn syllable(out: &mut Vec<u8>, freq: f64, len: usize, amplitude: f64) {
    for i in 0..len {
        let t = i as f64 / SAMPLE_RATE as f64;
        let env = (PI * i as f64 / len as f64).sin();
        let w = 2.0 * PI * freq * t;
        let wave = w.sin() + 0.5 * (2.0 * w).sin() + 0.25 * (3.0 * w).sin();
        out.push(to_sample(amplitude * env * wave / 1.75));
    }
}

fn synth_digit(digit: u8, base: f64) -> Vec<u8> {
    let d = f64::from(digit);
    let first = 1200 + usize::from(digit) * 60;
    let second = 1000 + usize::from(9 - digit) * 50;
    let mut out = Vec::with_capacity(first + second + 240);
    syllable(&mut out, base * (1.0 + d * 0.09), first, 100.0);
    out.extend(std::iter::repeat_n(128, 240));
    syllable(&mut out, base * (1.6 - d * 0.05), second, 80.0);
    out
}

fn synth_beep() -> Vec<u8> {
    let len = SAMPLE_RATE * 3 / 25;
    let fade = SAMPLE_RATE / 200;
    (0..len)
        .map(|i| {
            let t = i as f64 / SAMPLE_RATE as f64;
            let edge = i.min(len - 1 - i);
            let env = (edge as f64 / fade as f64).min(1.0);
            to_sample(90.0 * env * (2.0 * PI * 1000.0 * t).sin())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wav::wav_header;

    #[test]
    fn test_synthesized_clips_present() {
        let clips = ClipSet::synthesized();
        for lang in Language::ALL {
            for d in 0..10 {
                let clip = clips.clip(d, lang);
                assert!(clip.len() > 2000, "{} {} too short", lang, d);
                assert!(clip.iter().any(|&s| s != 128));
            }
        }
        assert_eq!(clips.beep().len(), 960);
    }

    #[test]
    fn test_languages_differ() {
        let clips = ClipSet::synthesized();
        assert_ne!(clips.clip(3, Language::En), clips.clip(3, Language::Ja));
    }

    #[test]
    fn test_longest_clip() {
        let clips = ClipSet::synthesized();
        let longest = clips.longest_clip(Language::Ru);
        assert!((0..10).all(|d| clips.clip(d, Language::Ru).len() <= longest));
    }

    fn write_wav(path: &Path, pcm: &[u8]) {
        let mut data = wav_header(pcm.len()).to_vec();
        data.extend_from_slice(pcm);
        std::fs::write(path, data).unwrap();
    }

    #[test]
    fn test_from_dir_falls_back_to_english() {
        let dir = std::env::temp_dir().join(format!("captcha-clips-{}", std::process::id()));
        let en = dir.join("en");
        std::fs::create_dir_all(&en).unwrap();
        write_wav(&dir.join("beep.wav"), &[200, 60, 200]);
        for d in 0..10u8 {
            write_wav(&en.join(format!("{}.wav", d)), &[128, d, 128]);
        }

        let clips = ClipSet::from_dir(&dir).unwrap();
        assert_eq!(clips.beep(), &[200, 60, 200]);
        assert_eq!(clips.clip(7, Language::En), &[128, 7, 128]);
        assert_eq!(clips.clip(7, Language::Zh), &[128, 7, 128]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_from_dir_requires_english() {
        let dir = std::env::temp_dir().join(format!("captcha-noen-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        write_wav(&dir.join("beep.wav"), &[128]);

        let err = ClipSet::from_dir(&dir).unwrap_err();
        assert!(matches!(err, CaptchaError::Asset(_)));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_from_dir_rejects_16_bit_clips() {
        let dir = std::env::temp_dir().join(format!("captcha-16bit-{}", std::process::id()));
        let en = dir.join("en");
        std::fs::create_dir_all(&en).unwrap();
        write_wav(&dir.join("beep.wav"), &[128]);
        for d in 0..10u8 {
            write_wav(&en.join(format!("{}.wav", d)), &[128, d, 128, d]);
        }
        // Same payload, but declared as 16-bit samples
        let mut wide = wav_header(4).to_vec();
        wide[32] = 2;
        wide[34] = 16;
        wide.extend_from_slice(&[0, 0, 0, 0]);
        std::fs::write(en.join("5.wav"), wide).unwrap();

        let err = ClipSet::from_dir(&dir).unwrap_err();
        match err {
            CaptchaError::Asset(msg) => assert!(msg.contains("5.wav"), "{}", msg),
            other => panic!("unexpected error {:?}", other),
        }

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
