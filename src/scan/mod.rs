//! # Scan
//!
//! This module covers locating code landmarks inside a loaded module by approximate byte signature

pub mod image;

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

pub use image::ModuleImage;

/// A single position in a [`Pattern`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternByte {
    /// Byte that must match exactly
    Exact(u8),
    /// Wildcard that matches any byte
    Any,
}

impl PatternByte {
    /// Checks whether `byte` satisfies this position
    #[inline]
    pub fn matches(self, byte: u8) -> bool {
        match self {
            Self::Exact(b) => b == byte,
            Self::Any => true,
        }
    }
}

/// Byte signature with per-byte wildcards.
///
/// A pattern is never empty; the constructors reject empty input so that scanning can always
/// slide a window of at least one byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern(Vec<PatternByte>);

impl Pattern {
    /// Creates a pattern from already split positions
    pub fn new(bytes: Vec<PatternByte>) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::PatternParse("pattern is empty".into()));
        }
        Ok(Self(bytes))
    }

    /// Creates a pattern that matches `bytes` exactly
    pub fn exact(bytes: &[u8]) -> Result<Self> {
        Self::new(bytes.iter().copied().map(PatternByte::Exact).collect())
    }

    /// Number of bytes a match spans
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; kept alongside [`Pattern::len`] for clippy
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Positions making up this pattern
    pub fn bytes(&self) -> &[PatternByte] {
        &self.0
    }

    /// Checks the pattern against a window of exactly `self.len()` bytes
    fn matches(&self, window: &[u8]) -> bool {
        self.0.iter().zip(window).all(|(p, &b)| p.matches(b))
    }

    /// Returns the offset of the first match in `haystack`, scanning left to right
    pub fn find_in(&self, haystack: &[u8]) -> Option<usize> {
        haystack.windows(self.len()).position(|w| self.matches(w))
    }
}

impl FromStr for Pattern {
    type Err = Error;

    /// Parses the usual `"48 8B ?? ?? 0F"` form. `?` and `??` are wildcards.
    fn from_str(s: &str) -> Result<Self> {
        let bytes = s
            .split_whitespace()
            .map(|token| match token {
                "?" | "??" => Ok(PatternByte::Any),
                hex => u8::from_str_radix(hex, 16)
                    .map(PatternByte::Exact)
                    .map_err(|e| Error::PatternParse(format!("invalid token '{hex}': {e}"))),
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(bytes)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            match b {
                PatternByte::Exact(b) => write!(f, "{b:02X}")?,
                PatternByte::Any => write!(f, "??")?,
            }
        }
        Ok(())
    }
}

/// Scans `size` bytes starting at `base` for the first match of `pattern`.
///
/// Returns the absolute address of the match. A match must lie entirely inside the region.
/// Not finding a match is an ordinary outcome and is reported as `None`.
///
/// # Safety
///
/// `base` must be [valid](https://doc.rust-lang.org/stable/std/ptr/index.html#safety) for reads of `size` bytes
pub unsafe fn scan(base: usize, size: usize, pattern: &Pattern) -> Option<usize> {
    if base == 0 || size == 0 {
        return None;
    }
    // Safety: caller guarantees the region is readable
    let region = std::slice::from_raw_parts(base as *const u8, size);
    pattern.find_in(region).map(|offset| base + offset)
}

/// A named signature together with the distance from the match to the location of interest
#[derive(Debug, Clone)]
pub struct Landmark {
    /// Name used in log lines
    pub name: &'static str,
    /// Signature identifying the landmark
    pub pattern: Pattern,
    /// Offset added to the match address
    pub offset: isize,
}

impl Landmark {
    /// Creates a landmark from a textual pattern
    pub fn new(name: &'static str, pattern: &str, offset: isize) -> Result<Self> {
        Ok(Self {
            name,
            pattern: pattern.parse()?,
            offset,
        })
    }
}
