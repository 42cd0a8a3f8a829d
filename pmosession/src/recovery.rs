//! Retry/recovery decision logic.
//!
//! Pure: given the playback telemetry of the moment, decide whether an
//! ended stream was a premature interruption worth replaying or a natural
//! completion (or unrecoverable fault) that should advance the queue. The
//! session applies the decision; nothing here touches transport or timers.

use std::time::Duration;

use crate::config::SessionConfig;

/// Thresholds governing replay of an interrupted track.
#[derive(Clone, Copy, Debug)]
pub struct RecoveryPolicy {
    /// Playback shorter than this counts as a premature interruption.
    pub min_play: Duration,
    /// Replay attempts allowed per track.
    pub max_retries: u32,
    /// Wait before re-issuing the same track.
    pub backoff: Duration,
}

impl RecoveryPolicy {
    pub fn from_config(cfg: &SessionConfig) -> Self {
        Self {
            min_play: cfg.min_play(),
            max_retries: cfg.max_track_retries,
            backoff: cfg.retry_backoff(),
        }
    }

    /// Classify an end-of-playback report.
    ///
    /// `elapsed` is the time since the current track last successfully
    /// started, `None` when no track ever started. Retries already spent on
    /// this track come in as `retry_count`.
    pub fn classify(
        &self,
        elapsed: Option<Duration>,
        retry_count: u32,
        has_track: bool,
    ) -> RecoveryDecision {
        match elapsed {
            Some(e) if has_track && e < self.min_play && retry_count < self.max_retries => {
                RecoveryDecision::RetrySame {
                    attempt: retry_count + 1,
                }
            }
            _ => RecoveryDecision::AdvanceNext,
        }
    }
}

/// Outcome of [`RecoveryPolicy::classify`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryDecision {
    /// Premature interruption: re-issue the same track after the backoff.
    /// `attempt` is the retry counter value after this decision.
    RetrySame { attempt: u32 },
    /// Natural completion or retries exhausted: move to the next track.
    AdvanceNext,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RecoveryPolicy {
        RecoveryPolicy {
            min_play: Duration::from_millis(10_000),
            max_retries: 3,
            backoff: Duration::from_millis(3_000),
        }
    }

    #[test]
    fn early_end_with_retries_left_replays() {
        let decision = policy().classify(Some(Duration::from_millis(0)), 0, true);
        assert_eq!(decision, RecoveryDecision::RetrySame { attempt: 1 });
        let decision = policy().classify(Some(Duration::from_millis(9_999)), 2, true);
        assert_eq!(decision, RecoveryDecision::RetrySame { attempt: 3 });
    }

    #[test]
    fn reaching_min_play_is_natural_completion() {
        let decision = policy().classify(Some(Duration::from_millis(10_000)), 0, true);
        assert_eq!(decision, RecoveryDecision::AdvanceNext);
    }

    #[test]
    fn exhausted_retries_advance() {
        let decision = policy().classify(Some(Duration::from_millis(100)), 3, true);
        assert_eq!(decision, RecoveryDecision::AdvanceNext);
    }

    #[test]
    fn no_track_or_no_start_advances() {
        assert_eq!(
            policy().classify(None, 0, false),
            RecoveryDecision::AdvanceNext
        );
        assert_eq!(
            policy().classify(Some(Duration::from_millis(100)), 0, false),
            RecoveryDecision::AdvanceNext
        );
    }
}
