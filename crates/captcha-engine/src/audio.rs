//! CAPTCHA audio synthesis.
//!
//! Output is unsigned 8-bit mono PCM at 8 kHz. 128 is silence; samples
//! below it are the negative phase, samples above it the positive phase.
//! Each spoken digit is re-pitched and re-leveled at random, then mixed
//! into a bed of static and reversed digit fragments at random intervals.

use std::io::Write;
use std::sync::Arc;

use captcha_common::constants::SAMPLE_RATE;
use captcha_common::{DigitSequence, Language, Result};
use rand::Rng;

use crate::assets::SoundClips;
use crate::random::{rndf, secure_bytes_mod};
use crate::wav::{self, HEADER_LEN};

/// Silence level
pub const SILENCE: u8 = 128;

/// Width of the static noise band centered on silence (124..=132)
const NOISE_BAND: u16 = 9;

/// One background fragment per 800 ms of bed
const FRAGMENT_SPACING: usize = SAMPLE_RATE * 4 / 5;

/// Speed factor of the ending beep
const ENDING_BEEP_SPEED: f64 = 1.4;

/// Combine one sample pair.
///
/// Two negative-phase samples pull each other toward zero multiplicatively;
/// anything else uses a saturating additive blend. Either operand at exactly
/// 128 leaves the other unchanged.
pub fn mix_sample(a: u8, b: u8) -> u8 {
    let (a, b) = (i32::from(a), i32::from(b));
    let v = if a < 128 && b < 128 {
        a * b / 128
    } else {
        2 * (a + b) - a * b / 128 - 256
    };
    v.clamp(0, 255) as u8
}

/// Mix `src` into `dst` sample by sample. Only the overlapping prefix is
/// touched.
pub fn mix_into(dst: &mut [u8], src: &[u8]) {
    for (d, &s) in dst.iter_mut().zip(src) {
        *d = mix_sample(s, *d);
    }
}

/// Scale amplitude relative to silence without crossing it
pub fn set_level(buf: &mut [u8], level: f64) {
    for s in buf.iter_mut() {
        let v = f64::from(*s);
        *s = match *s {
            SILENCE => continue,
            x if x > SILENCE => ((v - 128.0) * level + 128.0).clamp(128.0, 255.0) as u8,
            _ => (128.0 - (128.0 - v) * level).clamp(0.0, 128.0) as u8,
        };
    }
}

/// Change speed and pitch together by repeating or dropping samples.
///
/// The output holds `floor(len * factor)` samples.
pub fn change_speed(buf: &[u8], factor: f64) -> Vec<u8> {
    let len = (buf.len() as f64 * factor).floor() as usize;
    let mut out = vec![SILENCE; len];
    let mut p = 0.0;
    for &v in buf {
        let start = p as usize;
        let end = ((p + factor) as usize).min(len);
        if start < end {
            out[start..end].fill(v);
        }
        p += factor;
    }
    out
}

pub fn reversed(buf: &[u8]) -> Vec<u8> {
    buf.iter().rev().copied().collect()
}

pub fn silence(len: usize) -> Vec<u8> {
    vec![SILENCE; len]
}

/// Uniform static in a narrow band around silence, from the secure source
fn static_noise(len: usize) -> Vec<u8> {
    let offset = SILENCE - (NOISE_BAND / 2) as u8;
    let mut noise = secure_bytes_mod(len, NOISE_BAND);
    for s in noise.iter_mut() {
        *s += offset;
    }
    noise
}

/// A synthesized challenge, ready to be framed as WAV
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptchaAudio {
    pcm: Vec<u8>,
}

impl CaptchaAudio {
    pub fn pcm(&self) -> &[u8] {
        &self.pcm
    }

    /// Exact size of the WAV encoding, for a `Content-Length` header
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.pcm.len()
    }

    /// Write the WAV encoding and return the number of bytes written
    pub fn write_wav<W: Write>(&self, mut w: W) -> Result<u64> {
        Ok(wav::write_wav(&mut w, &self.pcm)?)
    }

    pub fn encode_wav(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&wav::wav_header(self.pcm.len()));
        buf.extend_from_slice(&self.pcm);
        buf
    }
}

/// Turns digit sequences into noisy spoken audio
#[derive(Clone)]
pub struct AudioSynthesizer {
    clips: Arc<dyn SoundClips>,
}

impl AudioSynthesizer {
    pub fn new(clips: Arc<dyn SoundClips>) -> Self {
        Self { clips }
    }

    /// Render `digits` spoken in `language`.
    ///
    /// # Panics
    ///
    /// Panics if the secure random source fails while generating static.
    pub fn render<R: Rng + ?Sized>(
        &self,
        digits: &DigitSequence,
        language: Language,
        rng: &mut R,
    ) -> CaptchaAudio {
        let sounds: Vec<Vec<u8>> = digits
            .iter()
            .map(|d| self.randomized_digit(d, language, rng))
            .collect();

        // Gap 0 precedes the first digit
        let gaps: Vec<usize> = (0..=digits.len())
            .map(|_| rng.random_range(SAMPLE_RATE..=SAMPLE_RATE * 3))
            .collect();
        let gap_total: usize = gaps.iter().sum();

        // Re-pitched clips may outgrow the longest original clip
        let needed = sounds.iter().map(Vec::len).sum::<usize>() + gap_total;
        let bed_len = (self.clips.longest_clip(language) * digits.len() + gap_total).max(needed);
        let mut bed = self.background(bed_len, language, rng);

        let mut pos = gaps[0];
        for (i, snd) in sounds.iter().enumerate() {
            mix_into(&mut bed[pos..], snd);
            pos += snd.len() + gaps[i + 1];
        }

        let beep = self.clips.beep();
        let gap = silence(SAMPLE_RATE / 5);
        let ending = change_speed(beep, ENDING_BEEP_SPEED);

        let mut pcm =
            Vec::with_capacity(beep.len() * 3 + gap.len() * 2 + bed.len() + ending.len());
        pcm.extend_from_slice(beep);
        pcm.extend_from_slice(&gap);
        pcm.extend_from_slice(beep);
        pcm.extend_from_slice(&gap);
        pcm.extend_from_slice(beep);
        pcm.extend_from_slice(&bed);
        pcm.extend_from_slice(&ending);

        tracing::trace!(
            digits = digits.len(),
            lang = %language,
            samples = pcm.len(),
            "Synthesized captcha audio"
        );

        CaptchaAudio { pcm }
    }

    fn randomized_digit<R: Rng + ?Sized>(&self, digit: u8, language: Language, rng: &mut R) -> Vec<u8> {
        let mut snd = change_speed(self.clips.clip(digit, language), rndf(rng, 0.9, 1.2));
        set_level(&mut snd, rndf(rng, 0.7, 1.3));
        snd
    }

    fn background<R: Rng + ?Sized>(&self, len: usize, language: Language, rng: &mut R) -> Vec<u8> {
        let mut bed = static_noise(len);
        for _ in 0..len / FRAGMENT_SPACING {
            let digit = rng.random_range(0..10u8);
            let mut snd = change_speed(
                &reversed(self.clips.clip(digit, language)),
                rndf(rng, 0.8, 1.4),
            );
            if snd.len() >= bed.len() {
                continue;
            }
            let place = rng.random_range(0..bed.len() - snd.len());
            set_level(&mut snd, rndf(rng, 0.5, 1.2));
            mix_into(&mut bed[place..], &snd);
        }
        set_level(&mut bed, rndf(rng, 0.2, 0.3));
        bed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::ClipSet;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    #[test]
    fn test_mix_with_silence_is_identity() {
        let wave: Vec<u8> = (0..=255).collect();
        let mut dst = silence(256);
        mix_into(&mut dst, &wave);
        assert_eq!(dst, wave);

        let mut dst = wave.clone();
        mix_into(&mut dst, &silence(256));
        assert_eq!(dst, wave);
    }

    #[test]
    fn test_mix_negative_phases_toward_silence() {
        assert_eq!(mix_sample(64, 64), 32);
        assert_eq!(mix_sample(0, 100), 0);
        // Saturates at full scale instead of wrapping
        assert_eq!(mix_sample(255, 255), 255);
        // 2 * 400 - 40000 / 128 - 256
        assert_eq!(mix_sample(200, 200), 232);
    }

    #[test]
    fn test_mix_into_shorter_dst() {
        let mut dst = silence(2);
        mix_into(&mut dst, &[10, 20, 30]);
        assert_eq!(dst, vec![10, 20]);
    }

    #[test]
    fn test_set_level_never_crosses_silence() {
        for level in [0.0, 0.2, 0.7, 1.3, 5.0] {
            let mut buf: Vec<u8> = (0..=255).collect();
            set_level(&mut buf, level);
            for (orig, scaled) in (0..=255u8).zip(&buf) {
                match orig.cmp(&SILENCE) {
                    std::cmp::Ordering::Greater => assert!(*scaled >= SILENCE),
                    std::cmp::Ordering::Less => assert!(*scaled <= SILENCE),
                    std::cmp::Ordering::Equal => assert_eq!(*scaled, SILENCE),
                }
            }
        }
    }

    #[test]
    fn test_set_level_values() {
        let mut buf = vec![138, 118, 128, 255, 0];
        set_level(&mut buf, 0.5);
        assert_eq!(buf, vec![133, 123, 128, 191, 64]);

        let mut unchanged: Vec<u8> = (0..=255).collect();
        set_level(&mut unchanged, 1.0);
        assert_eq!(unchanged, (0..=255).collect::<Vec<u8>>());
    }

    #[test]
    fn test_change_speed() {
        assert_eq!(change_speed(&[1, 2, 3], 2.0), vec![1, 1, 2, 2, 3, 3]);
        assert_eq!(change_speed(&[1, 2, 3, 4], 0.5), vec![2, 4]);
        assert_eq!(change_speed(&[9; 10], 1.5).len(), 15);
        assert!(change_speed(&[], 1.2).is_empty());
    }

    #[test]
    fn test_reversed() {
        assert_eq!(reversed(&[1, 2, 3]), vec![3, 2, 1]);
    }

    #[test]
    fn test_static_noise_band() {
        let noise = static_noise(5000);
        assert!(noise.iter().all(|&s| (124..=132).contains(&s)));
        assert!(noise.contains(&124));
        assert!(noise.contains(&132));
    }

    #[test]
    fn test_render_framing() {
        let clips = Arc::new(ClipSet::synthesized());
        let synth = AudioSynthesizer::new(clips.clone());
        let digits = DigitSequence::new(vec![4, 0, 7]).unwrap();
        let audio = synth.render(&digits, Language::En, &mut SmallRng::seed_from_u64(11));
        let pcm = audio.pcm();

        let beep = clips.beep();
        let sil = SAMPLE_RATE / 5;
        assert_eq!(&pcm[..beep.len()], beep);
        assert!(pcm[beep.len()..beep.len() + sil].iter().all(|&s| s == SILENCE));
        let third = 2 * (beep.len() + sil);
        assert_eq!(&pcm[third..third + beep.len()], beep);

        let ending = change_speed(beep, ENDING_BEEP_SPEED);
        assert_eq!(&pcm[pcm.len() - ending.len()..], ending.as_slice());

        // Bed holds at least the four 1-second gaps
        let bed = pcm.len() - 3 * beep.len() - 2 * sil - ending.len();
        assert!(bed >= 4 * SAMPLE_RATE + clips.longest_clip(Language::En) * 3);
        assert!(bed <= 4 * 3 * SAMPLE_RATE + clips.longest_clip(Language::En) * 3 * 12 / 10);
    }

    #[test]
    fn test_encoded_len_matches_wav() {
        let synth = AudioSynthesizer::new(Arc::new(ClipSet::synthesized()));
        let digits = DigitSequence::new(vec![1]).unwrap();
        let audio = synth.render(&digits, Language::Ja, &mut SmallRng::seed_from_u64(2));

        let mut out = Vec::new();
        let n = audio.write_wav(&mut out).unwrap();
        assert_eq!(n as usize, audio.encoded_len());
        assert_eq!(out, audio.encode_wav());
        assert_eq!(
            u32::from_le_bytes([out[40], out[41], out[42], out[43]]) as usize,
            audio.pcm().len()
        );
    }
}
