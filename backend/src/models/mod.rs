//! Domain models for the recommendation pipeline.
//!
//! This module contains the core data structures used throughout the pipeline:
//!
//! - [`Recommendation`] - A candidate produced by the external provider
//! - [`ImportListItemInfo`] - A final, importable output item
//! - [`LibraryProfile`] - Order-insensitive summary of the existing collection
//! - [`ValidationResult`] - Valid/filtered partition of a candidate batch
//! - [`SanitizationReport`] - Advisory counts from field sanitization
//! - [`RecommendationMode`], [`DiscoveryMode`], [`SamplingStrategy`] - Request shape

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// Request Modes
// =============================================================================

/// Whether the run recommends whole artists or specific albums.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum RecommendationMode {
    /// Artist-only recommendations; album may be empty.
    Artists,
    /// Album recommendations.
    Albums,
    /// Album recommendations pinned to specific releases.
    #[default]
    SpecificAlbums,
}

impl RecommendationMode {
    /// True for the artist-only mode.
    pub fn is_artist_mode(&self) -> bool {
        matches!(self, Self::Artists)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Artists => "artists",
            Self::Albums => "albums",
            Self::SpecificAlbums => "specific_albums",
        }
    }
}

/// How far from the existing collection recommendations may stray.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum DiscoveryMode {
    Similar,
    #[default]
    Adjacent,
    Exploratory,
}

impl DiscoveryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Similar => "similar",
            Self::Adjacent => "adjacent",
            Self::Exploratory => "exploratory",
        }
    }
}

/// How much of the library is sampled into the prompt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum SamplingStrategy {
    Minimal,
    #[default]
    Balanced,
    Comprehensive,
}

impl SamplingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Balanced => "balanced",
            Self::Comprehensive => "comprehensive",
        }
    }
}

// =============================================================================
// Recommendation
// =============================================================================

/// A candidate produced by the external provider.
///
/// Transient: created per request, consumed by the pipeline, never persisted
/// as-is. Use the `with_*` helpers to derive a modified copy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub artist: String,
    /// Empty in artist-only mode.
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub genre: String,
    #[serde(default)]
    pub reason: String,
    /// Semantically in [0, 1]; the validator clamps it.
    #[serde(default)]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist_mbid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album_mbid: Option<String>,
}

impl Recommendation {
    /// Create an album recommendation.
    pub fn new(artist: impl Into<String>, album: impl Into<String>, confidence: f64) -> Self {
        Self {
            artist: artist.into(),
            album: album.into(),
            confidence,
            ..Self::default()
        }
    }

    /// Create an artist-only recommendation.
    pub fn artist_only(artist: impl Into<String>, confidence: f64) -> Self {
        Self::new(artist, "", confidence)
    }

    pub fn with_confidence(&self, confidence: f64) -> Self {
        Self {
            confidence,
            ..self.clone()
        }
    }

    pub fn with_year(&self, year: Option<i32>) -> Self {
        Self {
            year,
            ..self.clone()
        }
    }

    pub fn with_artist_mbid(&self, mbid: impl Into<String>) -> Self {
        Self {
            artist_mbid: Some(mbid.into()),
            ..self.clone()
        }
    }

    pub fn with_album_mbid(&self, mbid: impl Into<String>) -> Self {
        Self {
            album_mbid: Some(mbid.into()),
            ..self.clone()
        }
    }

    /// True when the artist identifier is present and not whitespace.
    pub fn has_artist_mbid(&self) -> bool {
        has_text(self.artist_mbid.as_deref())
    }

    /// True when the album identifier is present and not whitespace.
    pub fn has_album_mbid(&self) -> bool {
        has_text(self.album_mbid.as_deref())
    }

    /// Human-readable `Artist|Album` key, as used by the review queue.
    pub fn review_key(&self) -> String {
        format!("{}|{}", self.artist.trim(), self.album.trim())
    }
}

fn has_text(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().is_empty())
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.album.trim().is_empty() {
            write!(f, "{}", self.artist)
        } else {
            write!(f, "{} - {}", self.artist, self.album)
        }
    }
}

// =============================================================================
// Import List Item
// =============================================================================

/// A final, importable output item handed to the host import mechanism.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImportListItemInfo {
    pub artist: String,
    pub album: String,
    /// January 1st of the recommendation year, or [`unknown_release_date`].
    pub release_date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist_mbid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album_mbid: Option<String>,
}

/// Sentinel release date for recommendations without a year (0001-01-01).
pub fn unknown_release_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(1, 1, 1).unwrap_or(NaiveDate::MIN)
}

impl From<&Recommendation> for ImportListItemInfo {
    fn from(rec: &Recommendation) -> Self {
        let release_date = rec
            .year
            .and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1))
            .unwrap_or_else(unknown_release_date);

        Self {
            artist: rec.artist.clone(),
            album: rec.album.clone(),
            release_date,
            artist_mbid: rec.artist_mbid.clone(),
            album_mbid: rec.album_mbid.clone(),
        }
    }
}

// =============================================================================
// Artist/Album access
// =============================================================================

/// Anything carrying an artist and an (optionally empty) album.
///
/// Lets deduplication and library filtering run on both raw candidates and
/// converted items with the same normalization.
pub trait ArtistAlbum {
    fn artist(&self) -> &str;
    fn album(&self) -> &str;
}

impl ArtistAlbum for Recommendation {
    fn artist(&self) -> &str {
        &self.artist
    }

    fn album(&self) -> &str {
        &self.album
    }
}

impl ArtistAlbum for ImportListItemInfo {
    fn artist(&self) -> &str {
        &self.artist
    }

    fn album(&self) -> &str {
        &self.album
    }
}

// =============================================================================
// Library Profile
// =============================================================================

/// Aggregate summary of the existing collection.
///
/// Used for prompt building (external) and to make the cache key sensitive to
/// collection state. Collections are order-insensitive for hashing; see
/// [`LibraryProfile::canonical_string`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct LibraryProfile {
    #[serde(default)]
    pub total_artists: u32,
    #[serde(default)]
    pub total_albums: u32,
    /// Genre -> number of albums.
    #[serde(default)]
    pub genres: Vec<(String, u32)>,
    /// Most represented artists.
    #[serde(default)]
    pub top_artists: Vec<String>,
    /// Style tags present in the collection.
    #[serde(default)]
    pub styles: Vec<String>,
}

impl LibraryProfile {
    /// Deterministic textual form with every multiset sorted.
    ///
    /// Genre counts for the same genre (case-insensitive) are summed so that
    /// equivalent profiles collapse to the same string.
    pub fn canonical_string(&self) -> String {
        let mut genres: BTreeMap<String, u64> = BTreeMap::new();
        for (genre, count) in &self.genres {
            *genres.entry(canonical_token(genre)).or_default() += u64::from(*count);
        }

        let mut artists: Vec<String> = self.top_artists.iter().map(|a| canonical_token(a)).collect();
        artists.sort();

        let mut styles: Vec<String> = self.styles.iter().map(|s| canonical_token(s)).collect();
        styles.sort();
        styles.dedup();

        let genres = genres
            .iter()
            .map(|(g, c)| format!("{}={}", g, c))
            .collect::<Vec<_>>()
            .join(",");

        format!(
            "artists={};albums={};genres=[{}];top=[{}];styles=[{}]",
            self.total_artists,
            self.total_albums,
            genres,
            artists.join(","),
            styles.join(","),
        )
    }
}

fn canonical_token(value: &str) -> String {
    value.trim().to_lowercase()
}

// =============================================================================
// Validation
// =============================================================================

/// Why a single candidate was filtered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FilterDetail {
    pub recommendation: Recommendation,
    pub reason: String,
}

/// Advisory counts from sanitizing untrusted fields. Never blocks processing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SanitizationReport {
    /// Fields removed (malformed identifiers, implausible years).
    pub dropped_fields: usize,
    /// Confidence values forced into [0, 1].
    pub clamped_fields: usize,
    /// String fields with surrounding whitespace removed.
    pub trimmed_fields: usize,
}

impl SanitizationReport {
    pub fn total(&self) -> usize {
        self.dropped_fields + self.clamped_fields + self.trimmed_fields
    }
}

/// Partition of a recommendation batch into valid and filtered candidates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub valid_recommendations: Vec<Recommendation>,
    pub filtered_recommendations: Vec<Recommendation>,
    pub filter_details: Vec<FilterDetail>,
    pub total_count: usize,
    pub valid_count: usize,
    pub filtered_count: usize,
    #[serde(default)]
    pub sanitization: SanitizationReport,
}

impl ValidationResult {
    /// Reasons grouped by text, most frequent first.
    pub fn reason_summary(&self) -> Vec<(String, usize)> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for detail in &self.filter_details {
            *counts.entry(detail.reason.as_str()).or_default() += 1;
        }
        let mut summary: Vec<(String, usize)> =
            counts.into_iter().map(|(r, c)| (r.to_string(), c)).collect();
        summary.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        summary
    }
}
