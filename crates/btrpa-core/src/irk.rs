//! Identity Resolving Keys.
//!
//! An IRK is a 16-byte secret. Operators paste them in a handful of shapes
//! (plain hex, `0x`-prefixed, colon or dash separated), so parsing is lenient
//! about separators and strict about length and alphabet.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors raised while parsing IRK text.
#[derive(Debug, Error)]
pub enum IrkError {
    /// The key is not 16 bytes long.
    #[error("IRK must be exactly 16 bytes (32 hex chars), got {0} hex chars")]
    WrongLength(usize),

    /// The key contains characters outside `[0-9a-fA-F]`.
    #[error("IRK contains invalid hex characters: {0}")]
    InvalidHex(String),

    /// A line of an IRK file failed to parse.
    #[error("IRK file line {line}: {source}")]
    FileLine {
        /// 1-based line number.
        line: usize,
        /// Parse failure on that line.
        #[source]
        source: Box<IrkError>,
    },
}

/// A 16-byte Identity Resolving Key.
///
/// `Debug` and `Display` never print the full key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Irk([u8; 16]);

impl Irk {
    /// Wrap raw key bytes.
    #[must_use]
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Masked hex form, safe for logs.
    #[must_use]
    pub fn masked(&self) -> String {
        mask_irk(&hex::encode(self.0))
    }
}

impl FromStr for Irk {
    type Err = IrkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let without_prefix = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let digits: String = without_prefix
            .chars()
            .filter(|c| *c != ':' && *c != '-')
            .collect();

        if digits.len() != 32 {
            return Err(IrkError::WrongLength(digits.len()));
        }

        let mut bytes = [0u8; 16];
        hex::decode_to_slice(&digits, &mut bytes)
            .map_err(|_| IrkError::InvalidHex(s.trim().to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for Irk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Irk").field(&self.masked()).finish()
    }
}

impl fmt::Display for Irk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.masked())
    }
}

/// Show only the first and last four characters of a key.
///
/// Strings of eight characters or fewer are returned as-is.
#[must_use]
pub fn mask_irk(irk_hex: &str) -> String {
    let chars: Vec<char> = irk_hex.chars().collect();
    if chars.len() <= 8 {
        return irk_hex.to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

/// Parse IRK file contents: one key per line, `#` comments and blank lines
/// skipped.
///
/// # Errors
///
/// Returns [`IrkError::FileLine`] for the first line that fails to parse.
pub fn parse_irk_list(contents: &str) -> Result<Vec<Irk>, IrkError> {
    contents
        .lines()
        .enumerate()
        .map(|(idx, raw)| (idx + 1, raw.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
        .map(|(line, text)| {
            text.parse::<Irk>().map_err(|source| IrkError::FileLine {
                line,
                source: Box::new(source),
            })
        })
        .collect()
}
