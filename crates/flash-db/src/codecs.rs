//! Flat text encodings for the structured message fields.
//!
//! These formats are the on-disk layout: reactions as `key:value` pairs joined
//! by `,` with `\`, `:` and `,` backslash-escaped, locations as `"<lat>,<lon>"`,
//! timestamps as epoch milliseconds.

use chrono::{DateTime, Utc};
use flash_types::{Location, Reactions};
use thiserror::Error;
use tracing::warn;

const ESCAPE: char = '\\';
const PAIR_SEPARATOR: char = ':';
const ENTRY_SEPARATOR: char = ',';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("reaction entry '{0}' does not have exactly one key and one value")]
    MalformedEntry(String),

    #[error("dangling escape at end of reaction data")]
    DanglingEscape,
}

// -- Timestamps --

pub fn encode_timestamp(timestamp: Option<DateTime<Utc>>) -> Option<i64> {
    timestamp.map(|t| t.timestamp_millis())
}

/// Millis outside chrono's representable range decode to `None`.
pub fn decode_timestamp(millis: Option<i64>) -> Option<DateTime<Utc>> {
    millis.and_then(DateTime::from_timestamp_millis)
}

// -- Locations --

pub fn encode_location(location: Option<&Location>) -> Option<String> {
    // Debug formatting is the shortest round-trip repr and keeps ".0" on whole degrees
    location.map(|l| format!("{:?},{:?}", l.latitude, l.longitude))
}

pub fn decode_location(value: Option<&str>) -> Option<Location> {
    let value = value?;
    let parsed = value.split_once(ENTRY_SEPARATOR).and_then(|(lat, lon)| {
        let latitude: f64 = lat.trim().parse().ok()?;
        let longitude: f64 = lon.trim().parse().ok()?;
        (latitude.is_finite() && longitude.is_finite()).then(|| Location::new(latitude, longitude))
    });

    if parsed.is_none() {
        warn!("Discarding malformed location '{}'", value);
    }
    parsed
}

// -- Reactions --

pub fn encode_reactions(reactions: &Reactions) -> String {
    let mut out = String::new();
    for (i, (reactor, symbol)) in reactions.iter().enumerate() {
        if i > 0 {
            out.push(ENTRY_SEPARATOR);
        }
        push_escaped(&mut out, reactor);
        out.push(PAIR_SEPARATOR);
        push_escaped(&mut out, symbol);
    }
    out
}

/// Lenient decode used on the read path. Null or empty input is an empty map,
/// and a single malformed entry discards the whole map rather than keeping a
/// partial set of reactions.
pub fn decode_reactions(value: Option<&str>) -> Reactions {
    let Some(value) = value.filter(|v| !v.is_empty()) else {
        return Reactions::new();
    };

    try_decode_reactions(value).unwrap_or_else(|e| {
        warn!("Discarding reactions '{}': {}", value, e);
        Reactions::new()
    })
}

/// Strict decode: fails on the first malformed entry.
pub fn try_decode_reactions(value: &str) -> Result<Reactions, CodecError> {
    let mut reactions = Reactions::new();
    if value.is_empty() {
        return Ok(reactions);
    }

    for entry in split_unescaped(value, ENTRY_SEPARATOR) {
        let parts = split_unescaped(entry, PAIR_SEPARATOR);
        let [reactor, symbol] = parts.as_slice() else {
            return Err(CodecError::MalformedEntry(entry.to_string()));
        };
        reactions.insert(unescape(reactor)?, unescape(symbol)?);
    }

    Ok(reactions)
}

fn push_escaped(out: &mut String, raw: &str) {
    for c in raw.chars() {
        if matches!(c, ESCAPE | PAIR_SEPARATOR | ENTRY_SEPARATOR) {
            out.push(ESCAPE);
        }
        out.push(c);
    }
}

/// Split on `separator` wherever it is not preceded by an escape.
/// Escapes are left in place for `unescape`.
fn split_unescaped(value: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;

    for (i, c) in value.char_indices() {
        if escaped {
            escaped = false;
        } else if c == ESCAPE {
            escaped = true;
        } else if c == separator {
            parts.push(&value[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&value[start..]);
    parts
}

fn unescape(value: &str) -> Result<String, CodecError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c == ESCAPE {
            let next = chars.next().ok_or(CodecError::DanglingEscape)?;
            // Older rows only escaped the two separators; keep any other
            // backslash as written.
            if !matches!(next, ESCAPE | PAIR_SEPARATOR | ENTRY_SEPARATOR) {
                out.push(ESCAPE);
            }
            out.push(next);
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reactions(pairs: &[(&str, &str)]) -> Reactions {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn timestamp_roundtrip_and_absence() {
        let t = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        assert_eq!(encode_timestamp(Some(t)), Some(1_700_000_000_123));
        assert_eq!(decode_timestamp(encode_timestamp(Some(t))), Some(t));
        assert_eq!(encode_timestamp(None), None);
        assert_eq!(decode_timestamp(None), None);
        assert_eq!(decode_timestamp(Some(-5)).map(|t| t.timestamp_millis()), Some(-5));
        assert_eq!(decode_timestamp(Some(i64::MAX)), None);
    }

    #[test]
    fn location_roundtrip() {
        for loc in [
            Location::new(5.6037, -0.187),
            Location::new(0.0, 0.0),
            Location::new(-90.0, 180.0),
            Location::new(51.507_351_8, -0.127_758_3),
        ] {
            let encoded = encode_location(Some(&loc));
            assert_eq!(decode_location(encoded.as_deref()), Some(loc));
        }
        assert_eq!(encode_location(Some(&Location::new(12.0, -3.5))).unwrap(), "12.0,-3.5");
    }

    #[test]
    fn malformed_locations_are_absent() {
        for bad in ["", "12.5", "abc,1.0", "1.0,", ",1.0", "1.0,2.0,3.0", "NaN,1.0", "1.0,inf"] {
            assert_eq!(decode_location(Some(bad)), None, "input {:?}", bad);
        }
        assert_eq!(decode_location(None), None);
        assert_eq!(decode_location(Some(" 1.5 , 2 ")), Some(Location::new(1.5, 2.0)));
    }

    #[test]
    fn reactions_roundtrip_with_delimiters() {
        let map = reactions(&[("alice", "😀"), ("bo:b", "😂")]);
        let encoded = encode_reactions(&map);
        assert_eq!(encoded, "alice:😀,bo\\:b:😂");
        assert_eq!(decode_reactions(Some(&encoded)), map);

        let tricky = reactions(&[
            ("a,b", "c:d"),
            ("back\\slash", "\\"),
            ("", ""),
            ("trailing\\", ",:"),
        ]);
        assert_eq!(try_decode_reactions(&encode_reactions(&tricky)), Ok(tricky));
    }

    #[test]
    fn unescaped_backslashes_in_older_rows_are_kept() {
        assert_eq!(
            decode_reactions(Some("a\\b:c\\d")),
            reactions(&[("a\\b", "c\\d")])
        );
        assert_eq!(
            decode_reactions(Some("a\\b:😀,x\\:y:z")),
            reactions(&[("a\\b", "😀"), ("x:y", "z")])
        );
    }

    #[test]
    fn empty_reactions_decode_to_empty_map() {
        assert_eq!(encode_reactions(&Reactions::new()), "");
        assert!(decode_reactions(Some("")).is_empty());
        assert!(decode_reactions(None).is_empty());
    }

    #[test]
    fn one_bad_entry_discards_all_reactions() {
        assert!(decode_reactions(Some("alice:😀,bob")).is_empty());
        assert!(decode_reactions(Some("alice:😀,a:b:c")).is_empty());
        assert!(decode_reactions(Some("alice:😀,")).is_empty());
        assert!(decode_reactions(Some("alice:😀\\")).is_empty());

        assert_eq!(
            try_decode_reactions("alice:😀,bob"),
            Err(CodecError::MalformedEntry("bob".into()))
        );
        assert_eq!(try_decode_reactions("a:b\\"), Err(CodecError::DanglingEscape));
    }
}
