//! External collaborators.
//!
//! The orchestration core does not generate recommendations, resolve
//! identifiers or analyse the library itself. It talks to those through the
//! traits here:
//!
//! - [`RecommendationProvider`] - the AI backend (opaque)
//! - [`PromptBuilder`] - turns a library profile into prompt text
//! - [`ArtistResolver`] / [`MbidResolver`] - MusicBrainz identifier lookup
//! - [`LibraryCollaborator`] - what the user already owns
//!
//! Every outbound provider call goes through [`ProviderInvoker`], which adds
//! circuit breaking, a timeout and cancellation.

pub mod invoker;
pub mod prompt;
pub mod replay;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{ProviderError, ProviderResult};
use crate::models::{LibraryProfile, Recommendation};

pub use invoker::{HealthReport, ProviderInvoker};
pub use prompt::{PromptBuilder, TemplatePromptBuilder};
pub use replay::{parse_recommendations, ReplayProvider};

// =============================================================================
// Provider
// =============================================================================

/// Result of a provider connectivity check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProviderHealth {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            detail: None,
        }
    }

    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            detail: Some(detail.into()),
        }
    }
}

/// The AI backend that produces raw recommendations.
#[async_trait]
pub trait RecommendationProvider: Send + Sync {
    /// Display name, used in logs.
    fn name(&self) -> &str;

    /// Legacy entry point without cancellation.
    async fn get_recommendations(&self, prompt: &str) -> ProviderResult<Vec<Recommendation>>;

    /// Cancellable entry point.
    ///
    /// Providers that cannot observe the token get the legacy call raced
    /// against it.
    async fn get_recommendations_cancellable(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> ProviderResult<Vec<Recommendation>> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ProviderError::Cancelled),
            result = self.get_recommendations(prompt) => result,
        }
    }

    async fn test_connection(&self) -> ProviderHealth;
}

/// Boxed future returned by a [`FetchFn`].
pub type FetchFuture = BoxFuture<'static, ProviderResult<Vec<Recommendation>>>;

/// Primary fetch callback: library profile to a cancellable future of raw
/// recommendations.
pub type FetchFn = Arc<dyn Fn(LibraryProfile, CancellationToken) -> FetchFuture + Send + Sync>;

// =============================================================================
// Identifier resolvers
// =============================================================================

/// Adds artist MusicBrainz ids (Artists mode).
#[async_trait]
pub trait ArtistResolver: Send + Sync {
    async fn enrich_artists(
        &self,
        recommendations: Vec<Recommendation>,
        cancel: &CancellationToken,
    ) -> Vec<Recommendation>;
}

/// Adds artist and album MusicBrainz ids (album modes).
#[async_trait]
pub trait MbidResolver: Send + Sync {
    async fn enrich_with_mbids(
        &self,
        recommendations: Vec<Recommendation>,
        cancel: &CancellationToken,
    ) -> Vec<Recommendation>;
}

/// Resolver that returns its input unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughResolver;

#[async_trait]
impl ArtistResolver for PassthroughResolver {
    async fn enrich_artists(
        &self,
        recommendations: Vec<Recommendation>,
        _cancel: &CancellationToken,
    ) -> Vec<Recommendation> {
        recommendations
    }
}

#[async_trait]
impl MbidResolver for PassthroughResolver {
    async fn enrich_with_mbids(
        &self,
        recommendations: Vec<Recommendation>,
        _cancel: &CancellationToken,
    ) -> Vec<Recommendation> {
        recommendations
    }
}

// =============================================================================
// Library
// =============================================================================

/// An album already in the collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryAlbum {
    pub artist: String,
    pub album: String,
}

/// Read access to the existing collection.
#[async_trait]
pub trait LibraryCollaborator: Send + Sync {
    async fn existing_artists(&self) -> Vec<String>;
    async fn existing_albums(&self) -> Vec<LibraryAlbum>;
}

/// Library snapshot loaded from JSON: profile plus membership lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StaticLibrary {
    pub profile: LibraryProfile,
    pub artists: Vec<String>,
    pub albums: Vec<LibraryAlbum>,
}

impl StaticLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an owned album; its artist counts as owned too.
    pub fn with_album(mut self, artist: impl Into<String>, album: impl Into<String>) -> Self {
        let artist = artist.into();
        if !self.artists.contains(&artist) {
            self.artists.push(artist.clone());
        }
        self.albums.push(LibraryAlbum {
            artist,
            album: album.into(),
        });
        self
    }

    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artists.push(artist.into());
        self
    }
}

#[async_trait]
impl LibraryCollaborator for StaticLibrary {
    async fn existing_artists(&self) -> Vec<String> {
        let mut artists = self.artists.clone();
        for album in &self.albums {
            if !artists.contains(&album.artist) {
                artists.push(album.artist.clone());
            }
        }
        artists
    }

    async fn existing_albums(&self) -> Vec<LibraryAlbum> {
        self.albums.clone()
    }
}
