//! Fingerprint normalization.
//!
//! Every duplicate check in the crate (session dedup, history, library
//! membership, both pipeline passes) goes through [`normalize`], so two names
//! that compare equal in one pass compare equal in all of them.
//!
//! Steps, in order: HTML entity decoding, whitespace trimming and collapsing,
//! case folding.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::models::ArtistAlbum;

static ENTITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(?:#(?P<dec>[0-9]{1,7})|#[xX](?P<hex>[0-9a-fA-F]{1,6})|(?P<name>[a-zA-Z][a-zA-Z0-9]{1,31}));")
        .expect("Invalid entity pattern")
});

/// Named entities seen in model output and tag data.
const NAMED_ENTITIES: &[(&str, &str)] = &[
    ("amp", "&"),
    ("lt", "<"),
    ("gt", ">"),
    ("quot", "\""),
    ("apos", "'"),
    ("nbsp", "\u{a0}"),
    ("ndash", "\u{2013}"),
    ("mdash", "\u{2014}"),
    ("lsquo", "\u{2018}"),
    ("rsquo", "\u{2019}"),
    ("ldquo", "\u{201c}"),
    ("rdquo", "\u{201d}"),
    ("hellip", "\u{2026}"),
    ("aacute", "á"),
    ("agrave", "à"),
    ("auml", "ä"),
    ("aring", "å"),
    ("ccedil", "ç"),
    ("eacute", "é"),
    ("egrave", "è"),
    ("euml", "ë"),
    ("iacute", "í"),
    ("iuml", "ï"),
    ("ntilde", "ñ"),
    ("oacute", "ó"),
    ("ouml", "ö"),
    ("oslash", "ø"),
    ("uacute", "ú"),
    ("uuml", "ü"),
    ("szlig", "ß"),
    ("Aring", "Å"),
    ("Eacute", "É"),
    ("Ouml", "Ö"),
    ("Uuml", "Ü"),
];

/// Decode HTML character references in one pass.
///
/// Unknown names and invalid code points are left as written.
pub fn decode_html_entities(input: &str) -> String {
    if !input.contains('&') {
        return input.to_string();
    }

    ENTITY_RE
        .replace_all(input, |caps: &Captures| {
            let decoded = if let Some(dec) = caps.name("dec") {
                dec.as_str().parse::<u32>().ok().and_then(char::from_u32).map(String::from)
            } else if let Some(hex) = caps.name("hex") {
                u32::from_str_radix(hex.as_str(), 16).ok().and_then(char::from_u32).map(String::from)
            } else if let Some(name) = caps.name("name") {
                NAMED_ENTITIES
                    .iter()
                    .find(|(n, _)| *n == name.as_str())
                    .map(|(_, v)| v.to_string())
            } else {
                None
            };
            decoded.unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Canonical comparison form of a single name.
pub fn normalize(value: &str) -> String {
    let decoded = decode_html_entities(value);
    decoded
        .split(|c: char| c.is_whitespace())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Normalized `artist|album` fingerprint. Album may be empty.
pub fn fingerprint(artist: &str, album: &str) -> String {
    format!("{}|{}", normalize(artist), normalize(album))
}

/// Fingerprint of anything with an artist and album.
pub fn fingerprint_of<T: ArtistAlbum + ?Sized>(item: &T) -> String {
    fingerprint(item.artist(), item.album())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ampersand_entity_matches_literal() {
        assert_eq!(normalize("AC/DC &amp; Friends"), normalize("AC/DC & Friends"));
    }

    #[test]
    fn test_numeric_entities() {
        assert_eq!(decode_html_entities("Sigur R&#243;s"), "Sigur Rós");
        assert_eq!(decode_html_entities("Bj&#xF6;rk"), "Björk");
    }

    #[test]
    fn test_unknown_entity_left_alone() {
        assert_eq!(decode_html_entities("Tom &bogus; Jerry"), "Tom &bogus; Jerry");
        assert_eq!(decode_html_entities("Simon & Garfunkel"), "Simon & Garfunkel");
    }

    #[test]
    fn test_single_pass_decoding() {
        assert_eq!(decode_html_entities("&amp;amp;"), "&amp;");
    }

    #[test]
    fn test_whitespace_and_case_folded() {
        assert_eq!(normalize("  The   National \t"), "the national");
        assert_eq!(fingerprint("Arctic Monkeys", " The Car "), "arctic monkeys|the car");
    }

    #[test]
    fn test_artist_only_fingerprint() {
        assert_eq!(fingerprint("Radiohead", ""), "radiohead|");
    }
}
