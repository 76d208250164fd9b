//! Progress reporting
//!
//! Updates go through an injected channel; nothing is global. A reporter
//! with no channel, or whose receiver is gone, silently drops updates.

use crate::types::{Phase, StatusUpdate};
use tokio::sync::mpsc;

/// Progress at the start of planning
pub const PLANNING_START: u8 = 5;
/// Progress once a blueprint is accepted
pub const PLANNING_DONE: u8 = 25;
/// Progress while reference repositories are indexed
pub const INDEXING: u8 = 28;
/// Progress at the start of synthesis
pub const CODING_START: u8 = 30;
/// Progress span covered by synthesis
pub const CODING_SPAN: u8 = 60;
/// Progress at the start of refinement
pub const VERIFYING: u8 = 90;
/// Terminal progress
pub const DONE: u8 = 100;

/// Cloneable progress sink
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    sender: Option<mpsc::UnboundedSender<StatusUpdate>>,
}

impl ProgressReporter {
    /// Reporter backed by a channel
    #[inline]
    #[must_use]
    pub fn new(sender: mpsc::UnboundedSender<StatusUpdate>) -> Self {
        Self { sender: Some(sender) }
    }

    /// Reporter that drops every update
    #[inline]
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Emit an update
    pub fn report(&self, phase: Phase, progress: u8, message: impl Into<String>) {
        let update = StatusUpdate {
            phase,
            progress: progress.min(DONE),
            message: message.into(),
        };
        tracing::debug!(phase = %update.phase, progress = update.progress, "{}", update.message);
        if let Some(sender) = &self.sender {
            let _ = sender.send(update);
        }
    }
}

/// Progress after `completed` of `total` targets have been generated
#[must_use]
pub fn coding_progress(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return CODING_START + CODING_SPAN;
    }
    let done = completed.min(total);
    #[allow(clippy::cast_possible_truncation)]
    let step = (usize::from(CODING_SPAN) * done / total) as u8;
    CODING_START + step
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coding_progress_spans_30_to_90() {
        assert_eq!(coding_progress(0, 5), 30);
        assert_eq!(coding_progress(1, 5), 42);
        assert_eq!(coding_progress(5, 5), 90);
        assert_eq!(coding_progress(9, 5), 90);
        assert_eq!(coding_progress(0, 0), 90);
    }

    #[test]
    fn updates_reach_the_channel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let reporter = ProgressReporter::new(tx);
        reporter.report(Phase::Planning, PLANNING_START, "planning");
        let update = rx.try_recv().unwrap();
        assert_eq!(update.phase, Phase::Planning);
        assert_eq!(update.progress, 5);
    }

    #[test]
    fn closed_channel_is_ignored() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        ProgressReporter::new(tx).report(Phase::Finished, 250, "done");
        ProgressReporter::disabled().report(Phase::Finished, DONE, "done");
    }
}
