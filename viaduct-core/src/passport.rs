//! Per-channel diagnostic trace of lifecycle state transitions.

use std::time::Instant;

/// Recognized lifecycle state symbols. New variants should stay in lockstep
/// with the symbols named in the external interface contract — adding a
/// state here is a deliberate, documented decision, not a typo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassportState {
    OriginChConnecting,
    OriginChConnected,
    OriginChPoolReturned,
    InReqCancelled,
    OutRespLastContentSent,
}

impl PassportState {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::OriginChConnecting => "ORIGIN_CH_CONNECTING",
            Self::OriginChConnected => "ORIGIN_CH_CONNECTED",
            Self::OriginChPoolReturned => "ORIGIN_CH_POOL_RETURNED",
            Self::InReqCancelled => "IN_REQ_CANCELLED",
            Self::OutRespLastContentSent => "OUT_RESP_LAST_CONTENT_SENT",
        }
    }
}

/// Append-only ordered log of `(state, timestamp)` pairs attached to one
/// channel. Lookup returns the first occurrence: a state recorded twice
/// (e.g. a connection reused many times) does not overwrite its original
/// entry.
#[derive(Debug, Default)]
pub struct PassportTrace {
    entries: Vec<(PassportState, Instant)>,
}

impl PassportTrace {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a state transition, stamped with the current time.
    pub fn record(&mut self, state: PassportState) {
        self.entries.push((state, Instant::now()));
    }

    /// First recorded timestamp for `state`, or `None` if it never fired.
    #[must_use]
    pub fn first_occurrence(&self, state: PassportState) -> Option<Instant> {
        self.entries
            .iter()
            .find(|(s, _)| *s == state)
            .map(|(_, t)| *t)
    }

    #[must_use]
    pub fn has_recorded(&self, state: PassportState) -> bool {
        self.first_occurrence(state).is_some()
    }

    /// All entries in recording order, for logging/debug dumps.
    #[must_use]
    pub fn entries(&self) -> &[(PassportState, Instant)] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_occurrence_is_stable_across_repeats() {
        let mut trace = PassportTrace::new();
        assert!(!trace.has_recorded(PassportState::OriginChConnected));

        trace.record(PassportState::OriginChConnecting);
        trace.record(PassportState::OriginChConnected);
        let first = trace.first_occurrence(PassportState::OriginChConnected).unwrap();

        // A later reuse re-enters "connected" semantics via pool return/acquire,
        // not via re-recording connect; but even if something recorded it twice,
        // first_occurrence must still report the earliest timestamp.
        trace.record(PassportState::OriginChConnected);
        assert_eq!(
            trace.first_occurrence(PassportState::OriginChConnected),
            Some(first)
        );
    }

    #[test]
    fn absent_state_reports_none() {
        let trace = PassportTrace::new();
        assert_eq!(trace.first_occurrence(PassportState::InReqCancelled), None);
    }
}
