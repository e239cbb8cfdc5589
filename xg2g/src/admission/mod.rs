//! The admission controller (C5): a pure decision function over a runtime
//! snapshot, plus the state collector that produces that snapshot with
//! fail-closed semantics.

use std::sync::Arc;

use tracing::{error, warn};

use crate::config::Config;
use crate::models::{RuntimeState, SessionState};
use crate::session_store::SessionStore;

/// Denial taxonomy (§4.5). Check order is fixed and first-denial-wins.
pub fn decide(config: &Config, wants_transcode: bool, state: RuntimeState) -> crate::models::AdmissionDecision {
    use crate::models::AdmissionDecision as Decision;

    if !config.engine.enabled {
        return Decision::denied("ENGINE_DISABLED", 0);
    }
    if state.is_unknown() {
        return Decision::denied("STATE_UNKNOWN", 0);
    }
    if config.engine.tuner_slots.is_empty() || state.tuner_slots_available <= 0 {
        return Decision::denied("NO_TUNERS", 0);
    }
    if state.sessions_active >= config.limits.max_sessions as i64 {
        // SESSIONS_FULL overrides any default Retry-After with 5 (§4.5).
        return Decision::denied("SESSIONS_FULL", 5);
    }
    if wants_transcode && state.transcodes_active >= config.limits.max_transcodes as i64 {
        return Decision::denied("TRANSCODES_FULL", 0);
    }
    Decision::allowed()
}

/// Snapshots the runtime state from the session store with a short
/// collector deadline (§5): collector failure or timeout returns
/// `RuntimeState::UNKNOWN` and logs, rather than propagating the error.
pub struct StateCollector<S: SessionStore> {
    store: Arc<S>,
    tuner_slot_count: usize,
    deadline: std::time::Duration,
}

impl<S: SessionStore> StateCollector<S> {
    pub fn new(store: Arc<S>, tuner_slot_count: usize, deadline: std::time::Duration) -> Self {
        Self {
            store,
            tuner_slot_count,
            deadline,
        }
    }

    pub async fn snapshot(&self) -> RuntimeState {
        match tokio::time::timeout(self.deadline, self.store.list_active()).await {
            Ok(Ok(sessions)) => {
                let sessions_active = sessions
                    .iter()
                    .filter(|s| s.state.is_resource_occupying())
                    .count() as i64;
                let transcodes_active = sessions
                    .iter()
                    .filter(|s| {
                        s.state.is_resource_occupying() && s.profile.transcodes_video
                    })
                    .count() as i64;
                let tuner_slots_available =
                    (self.tuner_slot_count as i64 - sessions_active).max(0);
                RuntimeState {
                    tuner_slots_available,
                    sessions_active,
                    transcodes_active,
                }
            }
            Ok(Err(e)) => {
                error!(error = %e, "state collector: store read failed, failing closed");
                RuntimeState::UNKNOWN
            }
            Err(_) => {
                warn!("state collector: deadline exceeded, failing closed");
                RuntimeState::UNKNOWN
            }
        }
    }
}

#[allow(dead_code)]
fn _assert_state_filter(s: &SessionState) -> bool {
    s.is_resource_occupying()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use rstest::rstest;

    fn config_with(enabled: bool, tuner_slots: Vec<u32>, max_sessions: u32, max_transcodes: u32) -> Config {
        let mut c = Config::default();
        c.engine.enabled = enabled;
        c.engine.tuner_slots = tuner_slots;
        c.limits.max_sessions = max_sessions;
        c.limits.max_transcodes = max_transcodes;
        c
    }

    #[test]
    fn unknown_state_denies_irrespective_of_other_fields() {
        let config = config_with(true, vec![0, 1], 100, 100);
        for state in [
            RuntimeState { tuner_slots_available: -1, sessions_active: 0, transcodes_active: 0 },
            RuntimeState { tuner_slots_available: 5, sessions_active: -1, transcodes_active: 0 },
            RuntimeState { tuner_slots_available: 5, sessions_active: 0, transcodes_active: -1 },
        ] {
            let decision = decide(&config, false, state);
            assert!(!decision.allow);
            assert_eq!(decision.code, "STATE_UNKNOWN");
        }
    }

    #[test]
    fn engine_disabled_wins_over_everything() {
        let config = config_with(false, vec![], 100, 100);
        let decision = decide(&config, false, RuntimeState::UNKNOWN);
        assert_eq!(decision.code, "ENGINE_DISABLED");
    }

    #[test]
    fn no_tuners_when_slots_empty() {
        let config = config_with(true, vec![], 100, 100);
        let state = RuntimeState { tuner_slots_available: 0, sessions_active: 0, transcodes_active: 0 };
        let decision = decide(&config, false, state);
        assert_eq!(decision.code, "NO_TUNERS");
    }

    #[test]
    fn sessions_full_sets_retry_after_5() {
        let config = config_with(true, vec![0], 1, 100);
        let state = RuntimeState { tuner_slots_available: 1, sessions_active: 1, transcodes_active: 0 };
        let decision = decide(&config, false, state);
        assert_eq!(decision.code, "SESSIONS_FULL");
        assert_eq!(decision.retry_after_seconds, 5);
    }

    #[test]
    fn transcodes_full_only_applies_when_transcode_requested() {
        let config = config_with(true, vec![0, 1], 100, 1);
        let state = RuntimeState { tuner_slots_available: 2, sessions_active: 0, transcodes_active: 1 };
        assert!(decide(&config, false, state).allow);
        let decision = decide(&config, true, state);
        assert_eq!(decision.code, "TRANSCODES_FULL");
    }

    #[rstest]
    #[case(false, vec![0], 100, 100, 0, 0, 0, "ENGINE_DISABLED")]
    #[case(true, vec![], 100, 100, 0, 0, 0, "NO_TUNERS")]
    #[case(true, vec![0], 1, 100, 1, 1, 0, "SESSIONS_FULL")]
    fn check_order_is_stable(
        #[case] enabled: bool,
        #[case] slots: Vec<u32>,
        #[case] max_sessions: u32,
        #[case] max_transcodes: u32,
        #[case] tuner_avail: i64,
        #[case] sessions_active: i64,
        #[case] transcodes_active: i64,
        #[case] expected: &str,
    ) {
        let config = config_with(enabled, slots, max_sessions, max_transcodes);
        let state = RuntimeState { tuner_slots_available: tuner_avail, sessions_active, transcodes_active };
        assert_eq!(decide(&config, false, state).code, expected);
    }
}
