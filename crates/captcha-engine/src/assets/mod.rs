//! Static rendering assets behind swappable provider traits.
//!
//! - `glyphs` - dot-matrix digit masks for the image renderer
//! - `clips` - spoken digit PCM clips for the audio synthesizer

mod clips;
mod glyphs;

pub use clips::{ClipSet, SoundClips};
pub use glyphs::{BuiltinGlyphs, DigitGlyphs, FontGlyphs, Glyph};
