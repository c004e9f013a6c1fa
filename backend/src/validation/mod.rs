//! Candidate validation.
//!
//! The pipeline delegates its first stage to a [`Validator`]. The default
//! [`SchemaValidator`] works in three steps per candidate:
//!
//! 1. **Sanitize** - trim strings, clamp confidence into [0, 1], drop
//!    malformed MusicBrainz ids and implausible years. Counted in a
//!    [`SanitizationReport`]; never rejects anything by itself.
//! 2. **Rules** - blank artist, missing album (unless artist-only is
//!    allowed), placeholder names.
//! 3. **Schema** - JSON Schema Draft 7 check against the embedded
//!    `schemas/recommendation.json`.
//!
//! Rejected candidates land in `filtered_recommendations` with one reason
//! each in `filter_details`.
//!
//! # Example
//!
//! ```rust,ignore
//! use brainarr::validation::{SchemaValidator, Validator};
//! use brainarr::Recommendation;
//!
//! let validator = SchemaValidator::new();
//! let result = validator.validate_batch(vec![Recommendation::new("Slowdive", "Souvlaki", 0.9)], false);
//! assert_eq!(result.valid_count, 1);
//! ```

use chrono::Datelike;
use serde_json::Value;

use crate::dedup::normalize;
use crate::models::{FilterDetail, Recommendation, SanitizationReport, ValidationResult};

/// Filter reasons, shared with logs and tests.
pub mod reasons {
    pub const BLANK_ARTIST: &str = "blank artist";
    pub const MISSING_ALBUM: &str = "missing album";
    pub const PLACEHOLDER_ARTIST: &str = "placeholder artist name";
    pub const PLACEHOLDER_ALBUM: &str = "placeholder album title";
    pub const SCHEMA: &str = "schema violation";
}

const PLACEHOLDER_ARTISTS: &[&str] = &[
    "unknown",
    "unknown artist",
    "various artists",
    "various",
    "n/a",
    "na",
    "tbd",
    "none",
    "artist",
];

const PLACEHOLDER_ALBUMS: &[&str] = &["unknown", "unknown album", "untitled", "n/a", "tbd", "none", "album"];

const EARLIEST_YEAR: i32 = 1900;

/// Validator collaborator contract.
pub trait Validator: Send + Sync {
    /// Partition `recommendations` into valid and filtered.
    ///
    /// `allow_artist_only` accepts an empty album (Artists mode).
    fn validate_batch(
        &self,
        recommendations: Vec<Recommendation>,
        allow_artist_only: bool,
    ) -> ValidationResult;
}

/// Default validator backed by the embedded recommendation schema.
pub struct SchemaValidator {
    schema: jsonschema::Validator,
}

impl SchemaValidator {
    pub fn new() -> Self {
        let schema: Value = serde_json::from_str(include_str!("../../schemas/recommendation.json"))
            .expect("Invalid embedded schema");
        let schema = jsonschema::draft7::new(&schema).expect("Invalid embedded schema");
        Self { schema }
    }

    /// Schema errors for one sanitized candidate.
    fn schema_errors(&self, rec: &Recommendation) -> Vec<String> {
        match serde_json::to_value(rec) {
            Ok(value) => self.schema.iter_errors(&value).map(|e| e.to_string()).collect(),
            Err(e) => vec![e.to_string()],
        }
    }

    fn rule_violation(rec: &Recommendation, allow_artist_only: bool) -> Option<&'static str> {
        let artist = normalize(&rec.artist);
        if artist.is_empty() {
            return Some(reasons::BLANK_ARTIST);
        }
        if PLACEHOLDER_ARTISTS.contains(&artist.as_str()) {
            return Some(reasons::PLACEHOLDER_ARTIST);
        }

        let album = normalize(&rec.album);
        if album.is_empty() {
            return (!allow_artist_only).then_some(reasons::MISSING_ALBUM);
        }
        if PLACEHOLDER_ALBUMS.contains(&album.as_str()) {
            return Some(reasons::PLACEHOLDER_ALBUM);
        }
        None
    }
}

impl Default for SchemaValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator for SchemaValidator {
    fn validate_batch(
        &self,
        recommendations: Vec<Recommendation>,
        allow_artist_only: bool,
    ) -> ValidationResult {
        let mut result = ValidationResult {
            total_count: recommendations.len(),
            ..ValidationResult::default()
        };

        for raw in recommendations {
            let rec = sanitize(raw, &mut result.sanitization);

            let reason = match Self::rule_violation(&rec, allow_artist_only) {
                Some(reason) => Some(reason.to_string()),
                None => {
                    let errors = self.schema_errors(&rec);
                    (!errors.is_empty())
                        .then(|| format!("{}: {}", reasons::SCHEMA, errors.join("; ")))
                }
            };

            match reason {
                Some(reason) => {
                    result.filter_details.push(FilterDetail {
                        recommendation: rec.clone(),
                        reason,
                    });
                    result.filtered_recommendations.push(rec);
                }
                None => result.valid_recommendations.push(rec),
            }
        }

        result.valid_count = result.valid_recommendations.len();
        result.filtered_count = result.filtered_recommendations.len();
        result
    }
}

// =============================================================================
// Sanitization
// =============================================================================

/// Clean one candidate's fields, counting every change in `report`.
pub fn sanitize(rec: Recommendation, report: &mut SanitizationReport) -> Recommendation {
    let latest_year = chrono::Utc::now().year() + 1;

    let confidence = if rec.confidence.is_nan() {
        report.clamped_fields += 1;
        0.0
    } else if !(0.0..=1.0).contains(&rec.confidence) {
        report.clamped_fields += 1;
        rec.confidence.clamp(0.0, 1.0)
    } else {
        rec.confidence
    };

    let year = match rec.year {
        Some(y) if !(EARLIEST_YEAR..=latest_year).contains(&y) => {
            report.dropped_fields += 1;
            None
        }
        other => other,
    };

    Recommendation {
        artist: trim_counted(rec.artist, report),
        album: trim_counted(rec.album, report),
        genre: trim_counted(rec.genre, report),
        reason: trim_counted(rec.reason, report),
        confidence,
        year,
        artist_mbid: mbid_counted(rec.artist_mbid, report),
        album_mbid: mbid_counted(rec.album_mbid, report),
    }
}

fn trim_counted(value: String, report: &mut SanitizationReport) -> String {
    let trimmed = value.trim();
    if trimmed.len() == value.len() {
        value
    } else {
        report.trimmed_fields += 1;
        trimmed.to_string()
    }
}

/// Keep well-formed UUIDs (lower-cased), drop anything else.
///
/// Blank values become `None` without counting as a drop.
fn mbid_counted(value: Option<String>, report: &mut SanitizationReport) -> Option<String> {
    let value = value?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    match uuid::Uuid::parse_str(trimmed) {
        Ok(id) => Some(id.hyphenated().to_string()),
        Err(_) => {
            report.dropped_fields += 1;
            None
        }
    }
}
