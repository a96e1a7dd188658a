//! # capgen - batch captcha generator
//!
//! Renders captchas straight to disk, for offline challenge pools or for
//! eyeballing renderer changes. Every run writes `<id>.png` (and optionally
//! `<id>.wav`) per captcha plus a `manifest.json` holding the solutions.
//!
//! ## Usage
//! ```bash
//! # 100 captchas with audio into out/
//! capgen --count 100 --audio --output out/
//!
//! # Russian audio, 8 digits, custom font
//! capgen -n 10 --length 8 --audio --lang ru --font assets/fonts/DejaVuSans.ttf
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::Parser;
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;

use captcha_common::constants::{DEFAULT_LENGTH, STD_HEIGHT, STD_WIDTH};
use captcha_common::{CaptchaId, DigitSequence, Language};
use captcha_engine::random::{fast_rng, random_digits, random_id};
use captcha_engine::{
    AudioSynthesizer, BuiltinGlyphs, ClipSet, DigitGlyphs, FontGlyphs, ImageOptions,
    ImageRenderer, SoundClips,
};

/// Glyph cell used when rasterizing a TrueType font
const FONT_CELL: (usize, usize) = (11, 16);

/// Digit CAPTCHA batch generator
#[derive(Parser, Debug)]
#[command(name = "capgen")]
#[command(author, version, about = "Render digit captchas to files", long_about = None)]
struct Args {
    /// Number of captchas to generate
    #[arg(short = 'n', long, default_value = "10")]
    count: usize,

    /// Output directory
    #[arg(short, long, default_value = "captchas")]
    output: PathBuf,

    /// Digits per captcha
    #[arg(short, long, default_value_t = DEFAULT_LENGTH)]
    length: usize,

    /// Image width in pixels
    #[arg(long, default_value_t = STD_WIDTH)]
    width: u32,

    /// Image height in pixels
    #[arg(long, default_value_t = STD_HEIGHT)]
    height: u32,

    /// Also write WAV audio
    #[arg(long)]
    audio: bool,

    /// Audio language (en, ru, zh, ja)
    #[arg(long, default_value = "en")]
    lang: String,

    /// Skip the wave distortion
    #[arg(long)]
    no_distort: bool,

    /// TrueType font for the digits (built-in dot font otherwise)
    #[arg(long)]
    font: Option<PathBuf>,

    /// Directory with recorded digit clips (synthesized clips otherwise)
    #[arg(long)]
    sounds: Option<PathBuf>,

    /// Number of threads (0 = auto-detect)
    #[arg(short, long, default_value = "0")]
    threads: usize,
}

/// One generated captcha in the manifest
#[derive(Debug, Serialize)]
struct ManifestEntry {
    id: CaptchaId,
    digits: DigitSequence,
    image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio: Option<String>,
}

#[derive(Debug, Serialize)]
struct Manifest {
    generated_at: DateTime<Utc>,
    length: usize,
    width: u32,
    height: u32,
    language: Language,
    captchas: Vec<ManifestEntry>,
}

/// Everything a worker needs to render one captcha
struct Batch {
    output: PathBuf,
    length: usize,
    width: u32,
    height: u32,
    language: Language,
    renderer: ImageRenderer,
    synth: Option<AudioSynthesizer>,
}

impl Batch {
    fn from_args(args: &Args) -> Result<Self> {
        if args.length == 0 {
            bail!("--length must be positive");
        }
        if args.width == 0 || args.height == 0 {
            bail!("--width and --height must be positive");
        }

        let glyphs: Arc<dyn DigitGlyphs> = match &args.font {
            Some(path) => {
                let (w, h) = FONT_CELL;
                Arc::new(
                    FontGlyphs::from_file(path, w, h)
                        .with_context(|| format!("Failed to load font {}", path.display()))?,
                )
            }
            None => Arc::new(BuiltinGlyphs::new()),
        };

        let synth = if args.audio {
            let clips: Arc<dyn SoundClips> = match &args.sounds {
                Some(dir) => Arc::new(
                    ClipSet::from_dir(dir)
                        .with_context(|| format!("Failed to load clips from {}", dir.display()))?,
                ),
                None => Arc::new(ClipSet::synthesized()),
            };
            Some(AudioSynthesizer::new(clips))
        } else {
            None
        };

        Ok(Self {
            output: args.output.clone(),
            length: args.length,
            width: args.width,
            height: args.height,
            language: Language::from_tag(&args.lang),
            renderer: ImageRenderer::new(glyphs).with_options(ImageOptions {
                distort: !args.no_distort,
            }),
            synth,
        })
    }

    /// Render one captcha to disk
    fn generate_one(&self) -> Result<ManifestEntry> {
        let id = random_id();
        let digits = random_digits(self.length);
        let mut rng = fast_rng();

        let image_name = format!("{}.png", id);
        let image = self.renderer.render(&digits, self.width, self.height, &mut rng);
        let mut out = BufWriter::new(create_file(&self.output.join(&image_name))?);
        image
            .write_png(&mut out)
            .with_context(|| format!("Failed to encode {}", image_name))?;
        out.flush()
            .with_context(|| format!("Failed to write {}", image_name))?;

        let audio = match &self.synth {
            Some(synth) => {
                let audio_name = format!("{}.wav", id);
                let mut out = BufWriter::new(create_file(&self.output.join(&audio_name))?);
                synth
                    .render(&digits, self.language, &mut rng)
                    .write_wav(&mut out)
                    .and_then(|_| out.flush().map_err(Into::into))
                    .with_context(|| format!("Failed to write {}", audio_name))?;
                Some(audio_name)
            }
            None => None,
        };

        Ok(ManifestEntry {
            id,
            digits,
            image: image_name,
            audio,
        })
    }

    /// Render `count` captchas in parallel and return the manifest
    fn run(&self, count: usize, progress: ProgressBar) -> Result<Manifest> {
        std::fs::create_dir_all(&self.output)
            .with_context(|| format!("Failed to create {}", self.output.display()))?;

        let captchas = (0..count)
            .into_par_iter()
            .progress_with(progress)
            .map(|_| self.generate_one())
            .collect::<Result<Vec<_>>>()?;

        Ok(Manifest {
            generated_at: Utc::now(),
            length: self.length,
            width: self.width,
            height: self.height,
            language: self.language,
            captchas,
        })
    }
}

fn create_file(path: &Path) -> Result<File> {
    File::create(path).with_context(|| format!("Failed to create {}", path.display()))
}

fn write_manifest(dir: &Path, manifest: &Manifest) -> Result<PathBuf> {
    let path = dir.join("manifest.json");
    let mut out = BufWriter::new(create_file(&path)?);
    serde_json::to_writer_pretty(&mut out, manifest).context("Failed to encode manifest")?;
    out.flush().context("Failed to write manifest")?;
    Ok(path)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let batch = Batch::from_args(&args)?;

    if args.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.threads)
            .build_global()
            .context("Failed to configure thread pool")?;
    }

    println!("Captcha Batch Generator");
    println!("=======================");
    println!("Count: {}", args.count);
    println!("Digits: {}", batch.length);
    println!("Size: {}x{}", batch.width, batch.height);
    if batch.synth.is_some() {
        println!("Audio: {}", batch.language);
    }
    println!("Threads: {}", rayon::current_num_threads());
    println!();

    let pb = ProgressBar::new(args.count as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40}] {pos}/{len} ({per_sec})")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let start = Instant::now();
    let manifest = batch.run(args.count, pb.clone())?;
    pb.finish_and_clear();

    let manifest_path = write_manifest(&batch.output, &manifest)?;

    println!("Generated {} captchas in {:.2?}", manifest.captchas.len(), start.elapsed());
    println!("Manifest: {}", manifest_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(dir: &Path, audio: bool) -> Args {
        let dir = dir.display().to_string();
        let mut argv = vec![
            "capgen", "--output", &dir, "--length", "4", "--width", "160", "--height", "60",
            "--lang", "zh",
        ];
        if audio {
            argv.push("--audio");
        }
        Args::parse_from(argv)
    }

    fn temp_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("capgen-{}-{}", tag, std::process::id()))
    }

    #[test]
    fn test_batch_writes_files_and_manifest() {
        let dir = temp_dir("full");
        let batch = Batch::from_args(&args(&dir, true)).unwrap();
        let manifest = batch.run(3, ProgressBar::hidden()).unwrap();
        assert_eq!(manifest.captchas.len(), 3);
        assert_eq!(manifest.language, Language::Zh);

        for entry in &manifest.captchas {
            assert_eq!(entry.digits.len(), 4);
            let png = std::fs::read(dir.join(&entry.image)).unwrap();
            assert_eq!(&png[1..4], b"PNG");
            let wav = std::fs::read(dir.join(entry.audio.as_ref().unwrap())).unwrap();
            assert_eq!(&wav[..4], b"RIFF");
        }

        let path = write_manifest(&dir, &manifest).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(json["captchas"].as_array().unwrap().len(), 3);
        assert_eq!(json["captchas"][0]["digits"].as_str().unwrap().len(), 4);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_images_only() {
        let dir = temp_dir("img");
        let batch = Batch::from_args(&args(&dir, false)).unwrap();
        let manifest = batch.run(2, ProgressBar::hidden()).unwrap();
        assert!(manifest.captchas.iter().all(|e| e.audio.is_none()));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_rejects_zero_length() {
        let mut a = args(&temp_dir("zero"), false);
        a.length = 0;
        assert!(Batch::from_args(&a).is_err());
    }
}
