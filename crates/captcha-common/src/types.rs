//! Core types shared across CAPTCHA components.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::MAX_ID_LEN;
use crate::error::{CaptchaError, Result};

/// The secret answer of one captcha: an ordered run of digits in 0-9.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DigitSequence(Vec<u8>);

impl DigitSequence {
    /// Create a sequence, rejecting any value above 9
    pub fn new(digits: Vec<u8>) -> Result<Self> {
        if let Some(bad) = digits.iter().find(|&&d| d > 9) {
            return Err(CaptchaError::InvalidInput(format!(
                "digit out of range: {}",
                bad
            )));
        }
        Ok(Self(digits))
    }

    /// Parse a user-typed answer such as `"04 29 17"`.
    ///
    /// ASCII digits are kept, spaces and commas are skipped, anything else
    /// is rejected.
    pub fn parse(input: &str) -> Result<Self> {
        let mut digits = Vec::with_capacity(input.len());
        for c in input.chars() {
            match c {
                '0'..='9' => digits.push(c as u8 - b'0'),
                ' ' | ',' => {}
                other => {
                    return Err(CaptchaError::InvalidInput(format!(
                        "unexpected character in answer: {:?}",
                        other
                    )));
                }
            }
        }
        Ok(Self(digits))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.0.iter().copied()
    }
}

impl fmt::Display for DigitSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for d in &self.0 {
            write!(f, "{}", d)?;
        }
        Ok(())
    }
}

impl TryFrom<String> for DigitSequence {
    type Error = CaptchaError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<DigitSequence> for String {
    fn from(value: DigitSequence) -> Self {
        value.to_string()
    }
}

impl AsRef<[u8]> for DigitSequence {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Opaque public token referencing a stored solution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaptchaId(String);

impl CaptchaId {
    /// Validate an id received from a caller (URL path, form field)
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() || raw.len() > MAX_ID_LEN {
            return Err(CaptchaError::InvalidInput(format!(
                "captcha id must be 1-{} characters",
                MAX_ID_LEN
            )));
        }
        if !raw.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(CaptchaError::InvalidInput(
                "captcha id must be alphanumeric".to_string(),
            ));
        }
        Ok(Self(raw.to_string()))
    }

    /// Wrap an id produced by the random source. Caller guarantees the
    /// characters come from the id alphabet.
    pub fn from_generated(raw: String) -> Self {
        debug_assert!(raw.bytes().all(|b| b.is_ascii_alphanumeric()));
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CaptchaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for CaptchaId {
    type Err = CaptchaError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Language of the spoken digit clips
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Ru,
    Zh,
    Ja,
}

impl Language {
    pub const ALL: [Language; 4] = [Language::En, Language::Ru, Language::Zh, Language::Ja];

    /// Resolve a language tag, falling back to English for anything unknown
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "ru" => Self::Ru,
            "zh" => Self::Zh,
            "ja" => Self::Ja,
            _ => Self::En,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Ru => "ru",
            Self::Zh => "zh",
            Self::Ja => "ja",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}
