//! Single-slot scheduling of transcode sessions.

use std::collections::{HashMap, VecDeque};

use crate::asset::PostId;

/// Per-asset transcoding state machine.
///
/// `Pending → Transcoding → {Transcoded | TranscodeFailed}`; only one asset
/// may be in `Transcoding` at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscodeState {
    Pending,
    Transcoding,
    Transcoded,
    TranscodeFailed,
}

/// Enforces the single-active-transcode discipline for a batch session.
///
/// Assets queue FIFO in dispatch order; the slot is granted to the head of
/// the queue whenever it frees up. The coordinator tracks states only — the
/// engine owns the actual export task.
#[derive(Debug, Default)]
pub struct TranscodeCoordinator {
    queue: VecDeque<PostId>,
    active: Option<PostId>,
    states: HashMap<PostId, TranscodeState>,
}

impl TranscodeCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a video asset for transcoding.
    pub fn enqueue(&mut self, post_id: PostId) {
        self.states.insert(post_id.clone(), TranscodeState::Pending);
        self.queue.push_back(post_id);
    }

    /// Grants the transcoding slot to the next queued asset, if the slot is
    /// free. Returns the asset that should start exporting now.
    pub fn acquire_next(&mut self) -> Option<PostId> {
        if self.active.is_some() {
            return None;
        }

        let next = self.queue.pop_front()?;
        self.states
            .insert(next.clone(), TranscodeState::Transcoding);
        self.active = Some(next.clone());
        Some(next)
    }

    /// Records the terminal outcome for the active asset and frees the slot.
    ///
    /// Ignored when the asset does not hold the slot, which happens if it
    /// was removed (cancellation) while its export was in flight.
    pub fn finish(&mut self, post_id: &PostId, success: bool) {
        if self.active.as_ref() == Some(post_id) {
            self.active = None;
        }
        if let Some(state) = self.states.get_mut(post_id) {
            *state = if success {
                TranscodeState::Transcoded
            } else {
                TranscodeState::TranscodeFailed
            };
        }
    }

    /// Removes an asset from the queue and state tracking.
    ///
    /// Queued assets will never start; the active asset keeps the slot until
    /// its in-flight export reports back.
    pub fn remove(&mut self, post_id: &PostId) {
        self.queue.retain(|queued| queued != post_id);
        self.states.remove(post_id);
    }

    /// Drops all queued assets, returning the assets that will never start.
    pub fn drain_queue(&mut self) -> Vec<PostId> {
        let drained: Vec<PostId> = self.queue.drain(..).collect();
        for post_id in &drained {
            self.states.remove(post_id);
        }
        drained
    }

    pub fn active(&self) -> Option<&PostId> {
        self.active.as_ref()
    }

    pub fn state(&self, post_id: &PostId) -> Option<TranscodeState> {
        self.states.get(post_id).copied()
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }
}
