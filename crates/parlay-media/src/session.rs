//! Audio session negotiation.
//!
//! Some devices and output routes reject the default playback configuration.
//! The negotiator walks an ordered list of candidate configurations and keeps
//! the first one the platform accepts. If none is accepted, playback is still
//! attempted once with the last candidate because some platforms report a
//! configuration failure and then play fine.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{MediaError, Result};
use crate::lease::{AudioHardware, AudioLease, LeaseKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionCategory {
    Playback,
    Record,
    PlayAndRecord,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOptions {
    /// Route output to the built-in speaker instead of the receiver.
    pub default_to_speaker: bool,
    /// Allow high quality Bluetooth output.
    pub allow_bluetooth_a2dp: bool,
    /// Do not interrupt other audio.
    pub mix_with_others: bool,
}

/// One candidate audio session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionConfig {
    pub name: String,
    pub category: SessionCategory,
    pub options: SessionOptions,
}

impl SessionConfig {
    pub fn new(
        name: impl Into<String>,
        category: SessionCategory,
        options: SessionOptions,
    ) -> Self {
        Self {
            name: name.into(),
            category,
            options,
        }
    }

    /// The default playback fallback order, most specific first.
    pub fn playback_candidates() -> Vec<Self> {
        vec![
            Self::new("playback", SessionCategory::Playback, SessionOptions::default()),
            Self::new(
                "playback-speaker",
                SessionCategory::Playback,
                SessionOptions {
                    default_to_speaker: true,
                    ..Default::default()
                },
            ),
            Self::new(
                "playback-bluetooth",
                SessionCategory::Playback,
                SessionOptions {
                    allow_bluetooth_a2dp: true,
                    ..Default::default()
                },
            ),
            Self::new(
                "playback-combined",
                SessionCategory::Playback,
                SessionOptions {
                    default_to_speaker: true,
                    allow_bluetooth_a2dp: true,
                    mix_with_others: true,
                },
            ),
            Self::new(
                "play-and-record",
                SessionCategory::PlayAndRecord,
                SessionOptions {
                    default_to_speaker: true,
                    ..Default::default()
                },
            ),
        ]
    }

    pub fn capture() -> Self {
        Self::new(
            "record",
            SessionCategory::Record,
            SessionOptions::default(),
        )
    }
}

impl std::fmt::Display for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Platform hook that activates a session configuration.
pub trait SessionPlatform: Send + Sync {
    fn apply(&self, config: &SessionConfig) -> std::result::Result<(), String>;
}

/// Every playback candidate was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationFailure {
    pub last_tried: SessionConfig,
    pub errors: Vec<(String, String)>,
}

/// A playback lease plus the configuration it runs under.
#[derive(Debug)]
pub struct PlaybackSession {
    pub lease: AudioLease,
    pub config: SessionConfig,
    /// False when no candidate was accepted and `config` is only the last
    /// one tried.
    pub accepted: bool,
}

pub struct AudioSessionNegotiator {
    hardware: AudioHardware,
    platform: Arc<dyn SessionPlatform>,
    candidates: Vec<SessionConfig>,
}

impl AudioSessionNegotiator {
    pub fn new(hardware: AudioHardware, platform: Arc<dyn SessionPlatform>) -> Self {
        Self {
            hardware,
            platform,
            candidates: SessionConfig::playback_candidates(),
        }
    }

    /// Replace the playback candidate list. An empty list keeps the default.
    pub fn with_candidates(mut self, candidates: Vec<SessionConfig>) -> Self {
        if !candidates.is_empty() {
            self.candidates = candidates;
        }
        self
    }

    /// Try each candidate in order and stop at the first accepted one.
    pub fn negotiate_playback(&self) -> std::result::Result<SessionConfig, NegotiationFailure> {
        let mut errors = Vec::new();
        for candidate in &self.candidates {
            match self.platform.apply(candidate) {
                Ok(()) => {
                    info!(
                        config = %candidate,
                        attempts = errors.len() + 1,
                        "Audio session configured"
                    );
                    return Ok(candidate.clone());
                }
                Err(e) => {
                    debug!(config = %candidate, error = %e, "Audio session candidate rejected");
                    errors.push((candidate.name.clone(), e));
                }
            }
        }

        // candidates is never empty, see with_candidates
        let last_tried = self
            .candidates
            .last()
            .cloned()
            .unwrap_or_else(|| SessionConfig::playback_candidates().remove(0));
        warn!(
            last = %last_tried,
            tried = errors.len(),
            "No audio session candidate accepted"
        );
        Err(NegotiationFailure { last_tried, errors })
    }

    /// Lease the device for playback and negotiate its configuration.
    ///
    /// Only a busy device is an error here. A failed negotiation still
    /// returns a session with `accepted == false` so the caller can make its
    /// best-effort attempt.
    pub fn acquire_playback(&self) -> Result<PlaybackSession> {
        let lease = self.hardware.try_acquire(LeaseKind::Playback)?;
        Ok(match self.negotiate_playback() {
            Ok(config) => PlaybackSession {
                lease,
                config,
                accepted: true,
            },
            Err(failure) => PlaybackSession {
                lease,
                config: failure.last_tried,
                accepted: false,
            },
        })
    }

    /// Lease the device for recording. A rejected record configuration
    /// (usually a denied microphone permission) releases the lease.
    pub fn acquire_capture(&self) -> Result<(AudioLease, SessionConfig)> {
        let lease = self.hardware.try_acquire(LeaseKind::Capture)?;
        let config = SessionConfig::capture();
        self.platform.apply(&config).map_err(|e| {
            warn!(error = %e, "Record session rejected");
            MediaError::ResourceUnavailable(e)
        })?;
        Ok((lease, config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedPlatform;

    fn abc() -> Vec<SessionConfig> {
        ["A", "B", "C"]
            .iter()
            .map(|n| SessionConfig::new(*n, SessionCategory::Playback, SessionOptions::default()))
            .collect()
    }

    #[test]
    fn test_tries_candidates_in_declared_order() {
        let platform = Arc::new(ScriptedPlatform::accepting(&["C"]));
        let negotiator = AudioSessionNegotiator::new(AudioHardware::new(), platform.clone())
            .with_candidates(abc());

        let config = negotiator.negotiate_playback().unwrap();
        assert_eq!(config.name, "C");
        assert_eq!(platform.attempts(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_stops_at_first_accepted() {
        let platform = Arc::new(ScriptedPlatform::accepting(&["B", "C"]));
        let negotiator = AudioSessionNegotiator::new(AudioHardware::new(), platform.clone())
            .with_candidates(abc());

        assert_eq!(negotiator.negotiate_playback().unwrap().name, "B");
        assert_eq!(platform.attempts(), vec!["A", "B"]);
    }

    #[test]
    fn test_reports_last_tried_when_all_fail() {
        let platform = Arc::new(ScriptedPlatform::accepting(&[]));
        let negotiator = AudioSessionNegotiator::new(AudioHardware::new(), platform.clone())
            .with_candidates(abc());

        let failure = negotiator.negotiate_playback().unwrap_err();
        assert_eq!(failure.last_tried.name, "C");
        assert_eq!(failure.errors.len(), 3);
    }

    #[test]
    fn test_default_candidates_end_with_capture_capable_fallback() {
        let candidates = SessionConfig::playback_candidates();
        assert_eq!(candidates.len(), 5);
        assert_eq!(candidates[0].category, SessionCategory::Playback);
        assert_eq!(candidates[4].category, SessionCategory::PlayAndRecord);
    }

    #[test]
    fn test_acquire_playback_keeps_lease_on_negotiation_failure() {
        let hw = AudioHardware::new();
        let negotiator =
            AudioSessionNegotiator::new(hw.clone(), Arc::new(ScriptedPlatform::accepting(&[])));

        let session = negotiator.acquire_playback().unwrap();
        assert!(!session.accepted);
        assert_eq!(session.config.name, "play-and-record");
        assert_eq!(hw.current(), Some(LeaseKind::Playback));
    }

    #[test]
    fn test_acquire_capture_denied_releases_lease() {
        let hw = AudioHardware::new();
        let negotiator =
            AudioSessionNegotiator::new(hw.clone(), Arc::new(ScriptedPlatform::accepting(&[])));

        let err = negotiator.acquire_capture().unwrap_err();
        assert!(matches!(err, MediaError::ResourceUnavailable(_)));
        assert!(hw.is_free());
    }

    #[test]
    fn test_acquire_while_busy_fails_fast() {
        let hw = AudioHardware::new();
        let negotiator = AudioSessionNegotiator::new(
            hw.clone(),
            Arc::new(ScriptedPlatform::accepting(&["playback", "record"])),
        );
        let _capture = negotiator.acquire_capture().unwrap();
        assert!(matches!(
            negotiator.acquire_playback(),
            Err(MediaError::ResourceUnavailable(_))
        ));
    }
}
