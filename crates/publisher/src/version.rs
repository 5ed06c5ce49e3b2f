//! Version-string dialects used by the different publishing channels.
//!
//! The channels do not share a single version grammar: stable releases are
//! plain dotted numerics, beta builds append a `b`/`rc` marker, and some
//! release tags wrap the extension version in a prefixed tag name. Each
//! dialect knows how to validate a raw string and how to extract the
//! extension version from it; ordering is shared across dialects.

use std::cmp::Ordering;

use crate::error::{PublishError, Result};

/// A version grammar tied to one publishing channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionDialect {
    /// Plain dotted numerics, e.g. `1.58.0` or `1.58.0.3`.
    Dotted,
    /// Dotted numerics with a trailing beta/rc marker, e.g. `1.58.1b2`.
    BetaTag,
    /// A tag wrapping a four-component version, e.g. `nightly_2024.1.1.100`.
    TagPrefixed {
        /// Literal prefix before the underscore separator.
        prefix: String,
    },
}

impl VersionDialect {
    /// Validate a raw version/tag string against this dialect.
    ///
    /// Returns the extension version embedded in the string. For the
    /// prefixed dialect this strips the tag prefix; for the others the
    /// input is returned unchanged.
    pub fn parse<'a>(&self, raw: &'a str) -> Result<&'a str> {
        match self {
            VersionDialect::Dotted => {
                let ok = split_dotted(raw).is_some();
                if ok {
                    Ok(raw)
                } else {
                    Err(PublishError::InvalidVersion(raw.to_string()))
                }
            }
            VersionDialect::BetaTag => {
                if is_beta_tag(raw) {
                    Ok(raw)
                } else {
                    Err(PublishError::InvalidVersion(raw.to_string()))
                }
            }
            VersionDialect::TagPrefixed { prefix } => {
                let rest = raw
                    .strip_prefix(prefix.as_str())
                    .and_then(|r| r.strip_prefix('_'))
                    .ok_or_else(|| PublishError::InvalidVersion(raw.to_string()))?;
                match split_dotted(rest) {
                    Some(parts) if parts.len() == 4 => Ok(rest),
                    _ => Err(PublishError::InvalidVersion(raw.to_string())),
                }
            }
        }
    }

    /// Total order over two versions of this dialect.
    pub fn cmp(&self, a: &str, b: &str) -> Ordering {
        compare_loose(a, b)
    }
}

fn split_dotted(s: &str) -> Option<Vec<u64>> {
    if s.is_empty() {
        return None;
    }
    s.split('.').map(|p| p.parse::<u64>().ok()).collect()
}

// ^\d+\.\d+\.\d+(b|rc)\d+$
fn is_beta_tag(s: &str) -> bool {
    let (numeric, marker) = match s.find(|c: char| c.is_ascii_alphabetic()) {
        Some(pos) => (&s[..pos], &s[pos..]),
        None => return false,
    };
    let parts = match split_dotted(numeric.trim_end_matches('.')) {
        Some(parts) => parts,
        None => return false,
    };
    if parts.len() != 3 || !numeric.ends_with(|c: char| c.is_ascii_digit()) {
        return false;
    }
    let digits = marker
        .strip_prefix("rc")
        .or_else(|| marker.strip_prefix('b'));
    match digits {
        Some(d) => !d.is_empty() && d.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Num(u64),
    Alpha(String),
}

// Split "1.58.1b2" into [Num(1), Num(58), Num(1), Alpha("b"), Num(2)].
fn segments(s: &str) -> Vec<Segment> {
    let mut out = Vec::new();
    for part in s.split('.') {
        let bytes = part.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            let digit = bytes[i].is_ascii_digit();
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_ascii_digit() == digit {
                j += 1;
            }
            let chunk = &part[i..j];
            match (digit, chunk.parse::<u64>()) {
                (true, Ok(n)) => out.push(Segment::Num(n)),
                _ => out.push(Segment::Alpha(chunk.to_string())),
            }
            i = j;
        }
    }
    out
}

/// Component-wise comparison over dotted version strings.
///
/// Numeric components compare as integers, alphabetic markers compare
/// lexically, and a missing trailing numeric component counts as zero, so
/// `1.2.3` equals `1.2.3.0`. A version with an extra trailing alphabetic
/// marker orders above its plain prefix (`1.2.3b1` > `1.2.3`).
pub fn compare_loose(a: &str, b: &str) -> Ordering {
    let sa = segments(a);
    let sb = segments(b);
    let len = sa.len().max(sb.len());
    for i in 0..len {
        match (sa.get(i), sb.get(i)) {
            (Some(x), Some(y)) => match (x, y) {
                (Segment::Num(x), Segment::Num(y)) => match x.cmp(y) {
                    Ordering::Equal => continue,
                    ord => return ord,
                },
                (Segment::Alpha(x), Segment::Alpha(y)) => match x.cmp(y) {
                    Ordering::Equal => continue,
                    ord => return ord,
                },
                // A numeric component orders above an alphabetic marker in
                // the same position ("1.2.4" > "1.2.3b1" reduces to 4 vs 3
                // earlier, so this only breaks ties like "1.2b" vs "1.2.0").
                (Segment::Num(_), Segment::Alpha(_)) => return Ordering::Greater,
                (Segment::Alpha(_), Segment::Num(_)) => return Ordering::Less,
            },
            (Some(Segment::Num(x)), None) => match x.cmp(&0) {
                Ordering::Equal => continue,
                ord => return ord,
            },
            (None, Some(Segment::Num(y))) => match 0.cmp(y) {
                Ordering::Equal => continue,
                ord => return ord,
            },
            // Trailing alphabetic marker: the longer version is a later
            // build of the same base ("1.2.3b1" > "1.2.3").
            (Some(Segment::Alpha(_)), None) => return Ordering::Greater,
            (None, Some(Segment::Alpha(_))) => return Ordering::Less,
            (None, None) => unreachable!(),
        }
    }
    Ordering::Equal
}
