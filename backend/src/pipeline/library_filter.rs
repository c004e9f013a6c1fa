//! Library membership filter.
//!
//! Both dedup passes (before and after top-up) go through the same
//! [`LibraryIndex`], built once per run, so they share one normalization.

use std::collections::HashSet;

use crate::dedup::{fingerprint, fingerprint_of, normalize};
use crate::models::{ArtistAlbum, RecommendationMode};
use crate::provider::LibraryCollaborator;

/// Normalized snapshot of what the library already holds.
#[derive(Debug, Clone, Default)]
pub struct LibraryIndex {
    artists: HashSet<String>,
    albums: HashSet<String>,
}

impl LibraryIndex {
    pub async fn load(library: &dyn LibraryCollaborator) -> Self {
        let artists = library
            .existing_artists()
            .await
            .iter()
            .map(|a| normalize(a))
            .filter(|a| !a.is_empty())
            .collect();
        let albums = library
            .existing_albums()
            .await
            .iter()
            .map(|a| fingerprint(&a.artist, &a.album))
            .collect();
        Self { artists, albums }
    }

    /// Whether `item` is already owned under `mode`.
    ///
    /// Artists mode matches on the artist alone. Album modes match the
    /// artist/album pair, or the artist when the item has no album.
    pub fn contains<T: ArtistAlbum + ?Sized>(&self, item: &T, mode: RecommendationMode) -> bool {
        let artist = normalize(item.artist());
        if mode.is_artist_mode() {
            return self.artists.contains(&artist);
        }
        if normalize(item.album()).is_empty() {
            return self.artists.contains(&artist);
        }
        self.albums.contains(&fingerprint_of(item))
    }

    /// Drop owned items, preserving order.
    pub fn filter<T: ArtistAlbum>(&self, items: Vec<T>, mode: RecommendationMode) -> Vec<T> {
        items
            .into_iter()
            .filter(|item| !self.contains(item, mode))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.artists.is_empty() && self.albums.is_empty()
    }
}
