//! Safety gate: confidence and identifier policy, review-queue triage.
//!
//! ```text
//!   approval keys ──► pending queue entries ──────────────► approved ─┐
//!                                                                    │
//!   candidates ──► confidence ──pass──► identifiers ──pass──► kept ──┼──► GateOutcome
//!                      │                     │                       │
//!                      └─fail─► borderline   └─fail─► (Artists mode: │
//!                               (queued)              promote top N)─┘
//! ```
//!
//! The gate never writes to the queue itself. It returns the planned
//! releases and enqueues in [`GateOutcome`], and the pipeline calls
//! [`SafetyGateService::commit`] once the run is known not to be cancelled.

use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

use crate::dedup::fingerprint_of;
use crate::error::StoreResult;
use crate::logs::RunLog;
use crate::models::{Recommendation, RecommendationMode};
use crate::settings::RecommendationSettings;
use crate::store::{parse_approval_key, HistoryStore, ReviewEntry, ReviewQueue};

const STAGE: &str = "gate";

/// Reason recorded on queued entries.
pub const BORDERLINE_REASON: &str = "below confidence threshold";

/// Whether `rec` carries the identifiers `mode` requires.
///
/// Artists mode needs an artist id; album modes need both. Whitespace-only
/// ids count as missing.
pub fn has_required_identifiers(rec: &Recommendation, mode: RecommendationMode) -> bool {
    if mode.is_artist_mode() {
        rec.has_artist_mbid()
    } else {
        rec.has_artist_mbid() && rec.has_album_mbid()
    }
}

/// What the gate decided for one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GateOutcome {
    /// Approved items first, then candidates that passed (or were promoted).
    pub kept: Vec<Recommendation>,
    /// Items released from the review queue by approval keys.
    pub approved: Vec<Recommendation>,
    pub below_confidence: usize,
    pub missing_identifiers: usize,
    pub promoted: usize,
    /// Queue keys to release on commit.
    pub release_keys: Vec<String>,
    /// Borderline entries to enqueue on commit.
    pub to_enqueue: Vec<ReviewEntry>,
}

impl GateOutcome {
    /// Fingerprints of approved items, exempt from history filtering.
    pub fn approved_fingerprints(&self) -> HashSet<String> {
        self.approved.iter().map(fingerprint_of).collect()
    }
}

/// Queue changes applied by [`SafetyGateService::commit`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueChanges {
    pub released: usize,
    pub queued: usize,
}

/// Confidence/identifier gate with review-queue triage.
#[derive(Debug, Clone, Default)]
pub struct SafetyGateService {
    log: RunLog,
}

impl SafetyGateService {
    pub fn new(log: RunLog) -> Self {
        Self { log }
    }

    /// Gate `recommendations` under `settings`.
    ///
    /// Reads the queue and history but mutates neither. Returns an empty
    /// outcome when `cancel` has fired.
    pub async fn apply(
        &self,
        recommendations: Vec<Recommendation>,
        settings: &RecommendationSettings,
        queue: &dyn ReviewQueue,
        history: &dyn HistoryStore,
        cancel: &CancellationToken,
    ) -> StoreResult<GateOutcome> {
        if cancel.is_cancelled() {
            return Ok(GateOutcome::default());
        }

        let mut outcome = GateOutcome::default();
        let per_item = settings.log_per_item_decisions;

        // Approvals
        let approval_keys: Vec<String> = settings
            .review_approve_keys
            .iter()
            .filter_map(|raw| {
                let parsed = parse_approval_key(raw);
                if parsed.is_none() {
                    self.log.debug(STAGE, format!("ignoring malformed approval key '{}'", raw));
                }
                parsed
            })
            .collect();

        if !approval_keys.is_empty() {
            let wanted: HashSet<&str> = approval_keys.iter().map(String::as_str).collect();
            for entry in queue.pending().await? {
                if wanted.contains(entry.key.as_str()) {
                    if per_item {
                        self.log.item(STAGE, format!("approved {}", entry.recommendation));
                    }
                    outcome.release_keys.push(entry.key);
                    outcome.approved.push(entry.recommendation);
                }
            }
        }

        // Confidence
        let threshold = settings.effective_min_confidence();
        let (confident, borderline): (Vec<_>, Vec<_>) = recommendations
            .into_iter()
            .partition(|r| r.confidence >= threshold);
        outcome.below_confidence = borderline.len();

        if settings.queue_borderline_items && !borderline.is_empty() {
            let known = history.fingerprints().await?;
            let approved = outcome.approved_fingerprints();
            for rec in borderline {
                let fp = fingerprint_of(&rec);
                if rec.artist.trim().is_empty() || known.contains(&fp) || approved.contains(&fp) {
                    continue;
                }
                if per_item {
                    self.log.item(STAGE, format!("queued for review: {} ({:.2})", rec, rec.confidence));
                }
                outcome.to_enqueue.push(ReviewEntry::new(rec, BORDERLINE_REASON));
            }
        } else if per_item {
            for rec in &borderline {
                self.log.item(STAGE, format!("dropped {} ({:.2} < {:.2})", rec, rec.confidence, threshold));
            }
        }

        // Identifiers
        let mode = settings.recommendation_mode;
        let passed = if settings.require_mbids {
            let (identified, missing): (Vec<_>, Vec<_>) = confident
                .into_iter()
                .partition(|r| has_required_identifiers(r, mode));
            outcome.missing_identifiers = missing.len();

            if identified.is_empty() && !missing.is_empty() && mode.is_artist_mode() {
                let promoted = promote(missing, settings.target_count());
                outcome.promoted = promoted.len();
                self.log.info(
                    STAGE,
                    format!("no candidate has an artist id; promoting top {}", promoted.len()),
                );
                promoted
            } else {
                if per_item {
                    for rec in &missing {
                        self.log.item(STAGE, format!("dropped {} (missing identifiers)", rec));
                    }
                }
                identified
            }
        } else {
            confident
        };

        let approved = outcome.approved_fingerprints();
        outcome.kept = outcome.approved.clone();
        outcome.kept.extend(
            passed
                .into_iter()
                .filter(|r| !approved.contains(&fingerprint_of(r))),
        );

        self.log.summary(
            settings.enable_debug_logging,
            STAGE,
            format!(
                "{} kept ({} approved, {} promoted), {} below confidence, {} missing ids, {} to queue",
                outcome.kept.len(),
                outcome.approved.len(),
                outcome.promoted,
                outcome.below_confidence,
                outcome.missing_identifiers,
                outcome.to_enqueue.len()
            ),
        );
        Ok(outcome)
    }

    /// Apply the outcome's queue changes.
    pub async fn commit(
        &self,
        outcome: &GateOutcome,
        queue: &dyn ReviewQueue,
    ) -> StoreResult<QueueChanges> {
        let mut changes = QueueChanges::default();
        if !outcome.release_keys.is_empty() {
            changes.released = queue.release(&outcome.release_keys).await?.len();
        }
        if !outcome.to_enqueue.is_empty() {
            changes.queued = queue.enqueue(outcome.to_enqueue.clone()).await?;
        }
        Ok(changes)
    }
}

/// Highest-confidence candidates first, at most `limit`.
fn promote(mut candidates: Vec<Recommendation>, limit: usize) -> Vec<Recommendation> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    candidates.truncate(limit);
    candidates
}
