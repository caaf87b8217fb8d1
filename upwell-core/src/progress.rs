//! Aggregation of per-asset, per-stage progress into one batch metric.
//!
//! Transcode fractions and upload byte deltas arrive from different stages
//! at different rates. The aggregator folds them into a single overall
//! fraction that never decreases once emitted, plus an instantaneous
//! throughput estimate, while bounding how often callers are notified.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::asset::{MediaKind, PostId};
use crate::config::ProgressConfig;

/// Share of an asset's span that the transcoding stage may account for.
///
/// Transcoding is a prerequisite stage, so its fractional progress must
/// move the overall metric, but confirmed upload bytes are the ground
/// truth: capping the credit keeps the fraction from reaching 1.0 while
/// bytes are still in flight.
const TRANSCODE_SHARE: f64 = 0.25;

/// Stage a progress sample originates from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressStage {
    /// Fractional completion reported by the export service
    Transcoding(f64),
    /// Bytes acknowledged by the remote service since the last sample
    Uploading(u64),
}

/// Per-asset progress entry.
///
/// Accounted bytes are the maximum of the scaled transcode credit and the
/// bytes actually uploaded, so the metric stays single-valued when an asset
/// moves from the transcoding stage into upload. The export fraction is
/// stored rather than a byte count so total-size revisions rescale the
/// credit automatically.
#[derive(Debug, Clone)]
struct AssetProgress {
    kind: MediaKind,
    total: u64,
    transcode_fraction: f64,
    uploaded: u64,
}

impl AssetProgress {
    fn accounted(&self) -> u64 {
        let credit = (self.transcode_fraction * TRANSCODE_SHARE * self.total as f64) as u64;
        credit.max(self.uploaded).min(self.total)
    }
}

/// Aggregates heterogeneous progress samples for one batch session.
///
/// Entries are keyed by post id and removed on terminal state; totals of
/// successfully completed assets fold into accumulator fields so the map
/// never grows beyond the in-flight asset count.
#[derive(Debug)]
pub struct ProgressAggregator {
    entries: HashMap<PostId, AssetProgress>,
    completed_photo: u64,
    completed_video: u64,
    last_emitted: f64,
    min_emit_delta: f64,
    throughput_window: Duration,
    window_start: Instant,
    window_bytes: u64,
    throughput_bps: u64,
}

impl ProgressAggregator {
    pub fn new(config: &ProgressConfig) -> Self {
        Self {
            entries: HashMap::new(),
            completed_photo: 0,
            completed_video: 0,
            last_emitted: 0.0,
            min_emit_delta: config.min_emit_delta,
            throughput_window: config.throughput_window,
            window_start: Instant::now(),
            window_bytes: 0,
            throughput_bps: 0,
        }
    }

    /// Registers an asset with its currently known size.
    ///
    /// For videos this is the pre-transcode upper-bound estimate; the total
    /// is revised once the actual transcoded size is known.
    pub fn register(&mut self, post_id: PostId, kind: MediaKind, total: u64) {
        self.entries.insert(
            post_id,
            AssetProgress {
                kind,
                total,
                transcode_fraction: 0.0,
                uploaded: 0,
            },
        );
    }

    /// Pre-credits bytes already acknowledged in a previous run, used when
    /// resuming a persisted record.
    pub fn credit_uploaded(&mut self, post_id: &PostId, bytes: u64) {
        if let Some(entry) = self.entries.get_mut(post_id) {
            entry.uploaded = bytes.min(entry.total);
        }
    }

    /// Revises an asset's total once its transcoded size is known.
    ///
    /// The revision may move the total in either direction; monotonicity of
    /// the emitted fraction is preserved by the emission clamp, not by
    /// restricting revisions.
    pub fn revise_total(&mut self, post_id: &PostId, total: u64) {
        if let Some(entry) = self.entries.get_mut(post_id) {
            entry.total = total;
        }
    }

    /// Applies a progress sample for an asset.
    pub fn sample(&mut self, post_id: &PostId, stage: ProgressStage) {
        let Some(entry) = self.entries.get_mut(post_id) else {
            return;
        };

        match stage {
            ProgressStage::Transcoding(fraction) => {
                // Regressing export fractions never lower the credit.
                entry.transcode_fraction =
                    entry.transcode_fraction.max(fraction.clamp(0.0, 1.0));
            }
            ProgressStage::Uploading(delta) => {
                entry.uploaded = entry.uploaded.saturating_add(delta).min(entry.total);
                self.window_bytes = self.window_bytes.saturating_add(delta);

                let elapsed = self.window_start.elapsed();
                if elapsed >= self.throughput_window {
                    self.throughput_bps =
                        (self.window_bytes as f64 / elapsed.as_secs_f64()) as u64;
                    self.window_bytes = 0;
                    self.window_start = Instant::now();
                }
            }
        }
    }

    /// Folds a successfully finished asset into the completed accumulators
    /// and drops its entry.
    pub fn complete(&mut self, post_id: &PostId) {
        if let Some(entry) = self.entries.remove(post_id) {
            match entry.kind {
                MediaKind::Photo => self.completed_photo += entry.total,
                MediaKind::Video => self.completed_video += entry.total,
            }
        }
    }

    /// Drops a failed or abandoned asset's contribution entirely.
    pub fn remove(&mut self, post_id: &PostId) {
        self.entries.remove(post_id);
    }

    /// Sum of all known asset sizes in the session.
    pub fn total_bytes(&self) -> u64 {
        self.completed_photo
            + self.completed_video
            + self.entries.values().map(|entry| entry.total).sum::<u64>()
    }

    /// Total contributed by video assets (transcoded size once known).
    pub fn video_bytes(&self) -> u64 {
        self.completed_video
            + self
                .entries
                .values()
                .filter(|entry| entry.kind == MediaKind::Video)
                .map(|entry| entry.total)
                .sum::<u64>()
    }

    /// Total contributed by photo assets.
    pub fn photo_bytes(&self) -> u64 {
        self.completed_photo
            + self
                .entries
                .values()
                .filter(|entry| entry.kind == MediaKind::Photo)
                .map(|entry| entry.total)
                .sum::<u64>()
    }

    /// Bytes accounted as done across all stages and assets.
    pub fn accounted_bytes(&self) -> u64 {
        self.completed_photo
            + self.completed_video
            + self
                .entries
                .values()
                .map(|entry| entry.accounted())
                .sum::<u64>()
    }

    /// Current overall fraction in [0, 1]; zero while nothing is known.
    pub fn overall(&self) -> f64 {
        let total = self.total_bytes();
        if total == 0 {
            return 0.0;
        }
        (self.accounted_bytes() as f64 / total as f64).clamp(0.0, 1.0)
    }

    /// Last throughput estimate in bytes per second.
    pub fn throughput_bps(&self) -> u64 {
        self.throughput_bps
    }

    /// Last fraction handed out by `poll_emit`.
    pub fn last_emitted(&self) -> f64 {
        self.last_emitted
    }

    /// Returns `(fraction, throughput)` when the overall fraction has risen
    /// enough past the last emitted value to justify a notification.
    ///
    /// The returned fraction sequence never decreases within a session.
    pub fn poll_emit(&mut self) -> Option<(f64, u64)> {
        let overall = self.overall();
        let crossed_threshold = overall >= self.last_emitted + self.min_emit_delta;
        let reached_end = overall >= 1.0 && self.last_emitted < 1.0;

        if crossed_threshold || reached_end {
            self.last_emitted = overall;
            Some((overall, self.throughput_bps))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn aggregator() -> ProgressAggregator {
        ProgressAggregator::new(&ProgressConfig {
            min_emit_delta: 0.01,
            throughput_window: Duration::from_millis(0),
        })
    }

    #[test]
    fn test_accounted_never_exceeds_total() {
        let mut progress = aggregator();
        let post = PostId::new("post-1");
        progress.register(post.clone(), MediaKind::Photo, 1_000);

        progress.sample(&post, ProgressStage::Uploading(600));
        progress.sample(&post, ProgressStage::Uploading(600));

        assert_eq!(progress.accounted_bytes(), 1_000);
        assert!(progress.accounted_bytes() <= progress.total_bytes());
    }

    #[test]
    fn test_transcode_credit_is_scaled_share() {
        let mut progress = aggregator();
        let post = PostId::new("video-1");
        progress.register(post.clone(), MediaKind::Video, 5_000_000);

        // Half the export done accounts for half the transcode share.
        progress.sample(&post, ProgressStage::Transcoding(0.5));
        assert_eq!(progress.accounted_bytes(), 625_000);

        // Regressing export fractions never lower the credit.
        progress.sample(&post, ProgressStage::Transcoding(0.3));
        assert_eq!(progress.accounted_bytes(), 625_000);

        // A finished export never accounts the asset as done by itself.
        progress.sample(&post, ProgressStage::Transcoding(1.0));
        assert!(progress.accounted_bytes() < 5_000_000);
        assert_eq!(progress.accounted_bytes(), 1_250_000);
    }

    #[test]
    fn test_stage_handoff_is_single_valued() {
        let mut progress = aggregator();
        let post = PostId::new("video-1");
        progress.register(post.clone(), MediaKind::Video, 1_000);

        progress.sample(&post, ProgressStage::Transcoding(1.0));
        assert_eq!(progress.accounted_bytes(), 250);

        // Upload bytes below the credit leave accounted at the credit.
        progress.sample(&post, ProgressStage::Uploading(100));
        assert_eq!(progress.accounted_bytes(), 250);

        // Once confirmed bytes pass the credit they take over.
        progress.sample(&post, ProgressStage::Uploading(500));
        assert_eq!(progress.accounted_bytes(), 600);

        progress.sample(&post, ProgressStage::Uploading(400));
        assert_eq!(progress.accounted_bytes(), 1_000);
    }

    #[test]
    fn test_size_revision_rescales_credit() {
        let mut progress = aggregator();
        let post = PostId::new("video-1");
        progress.register(post.clone(), MediaKind::Video, 4_000);

        progress.sample(&post, ProgressStage::Transcoding(1.0));
        assert_eq!(progress.accounted_bytes(), 1_000);

        // The transcoded size replaces the estimate; the stored fraction
        // re-derives the credit against the new total.
        progress.revise_total(&post, 2_000);
        assert_eq!(progress.total_bytes(), 2_000);
        assert_eq!(progress.accounted_bytes(), 500);
    }

    #[test]
    fn test_mixed_batch_size_revision() {
        let mut progress = aggregator();
        let photo = PostId::new("photo-1");
        let video = PostId::new("video-1");
        progress.register(photo.clone(), MediaKind::Photo, 1_000_000);
        progress.register(video.clone(), MediaKind::Video, 5_000_000);

        // Pre-transcode estimate phase.
        assert_eq!(progress.total_bytes(), 6_000_000);
        assert_eq!(progress.video_bytes(), 5_000_000);
        assert_eq!(progress.photo_bytes(), 1_000_000);

        // Transcoded size known: totals revise downward.
        progress.revise_total(&video, 2_000_000);
        assert_eq!(progress.total_bytes(), 3_000_000);
        assert_eq!(progress.video_bytes(), 2_000_000);

        progress.sample(&photo, ProgressStage::Uploading(1_000_000));
        progress.sample(&video, ProgressStage::Uploading(2_000_000));
        progress.complete(&photo);
        progress.complete(&video);

        assert_eq!(progress.accounted_bytes(), 3_000_000);
        assert_eq!(progress.total_bytes(), 3_000_000);
        assert_eq!(progress.overall(), 1.0);
    }

    #[test]
    fn test_emission_threshold_and_final_emit() {
        let mut progress = aggregator();
        let post = PostId::new("post-1");
        progress.register(post.clone(), MediaKind::Photo, 10_000);

        progress.sample(&post, ProgressStage::Uploading(50));
        assert!(progress.poll_emit().is_none(), "0.5% is below the threshold");

        progress.sample(&post, ProgressStage::Uploading(150));
        let (fraction, _) = progress.poll_emit().expect("2% crosses the threshold");
        assert!(fraction >= 0.02);

        progress.sample(&post, ProgressStage::Uploading(9_800));
        let (fraction, _) = progress.poll_emit().expect("completion always emits");
        assert_eq!(fraction, 1.0);
        assert!(progress.poll_emit().is_none(), "1.0 emits only once");
    }

    #[test]
    fn test_removed_asset_drops_contribution() {
        let mut progress = aggregator();
        let kept = PostId::new("kept");
        let failed = PostId::new("failed");
        progress.register(kept.clone(), MediaKind::Photo, 1_000);
        progress.register(failed.clone(), MediaKind::Video, 9_000);

        progress.remove(&failed);
        assert_eq!(progress.total_bytes(), 1_000);

        progress.sample(&kept, ProgressStage::Uploading(1_000));
        assert_eq!(progress.overall(), 1.0);
    }

    #[test]
    fn test_resume_credit_counts_as_accounted() {
        let mut progress = aggregator();
        let post = PostId::new("post-1");
        progress.register(post.clone(), MediaKind::Photo, 1_000);
        progress.credit_uploaded(&post, 400);

        assert_eq!(progress.accounted_bytes(), 400);
    }

    proptest! {
        /// Emitted fractions never decrease, and accounted bytes never
        /// exceed the tracked total, for arbitrary sample interleavings.
        #[test]
        fn prop_emitted_progress_is_monotonic(
            totals in proptest::collection::vec(1u64..10_000_000, 1..6),
            samples in proptest::collection::vec((0usize..6, 0u64..4_000_000, 0.0f64..1.5), 0..64),
        ) {
            let mut progress = aggregator();
            let posts: Vec<PostId> = totals
                .iter()
                .enumerate()
                .map(|(index, _)| PostId::new(format!("post-{index}")))
                .collect();

            for (post, total) in posts.iter().zip(&totals) {
                let kind = if total % 2 == 0 { MediaKind::Photo } else { MediaKind::Video };
                progress.register(post.clone(), kind, *total);
            }

            let mut last = 0.0f64;
            for (index, delta, fraction) in samples {
                let post = &posts[index % posts.len()];
                if index % 2 == 0 {
                    progress.sample(post, ProgressStage::Uploading(delta));
                } else {
                    progress.sample(post, ProgressStage::Transcoding(fraction));
                }

                prop_assert!(progress.accounted_bytes() <= progress.total_bytes());
                if let Some((emitted, _)) = progress.poll_emit() {
                    prop_assert!(emitted >= last);
                    last = emitted;
                }
            }
        }
    }
}
