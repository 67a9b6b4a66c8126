//! Optics layer: gobo, prism and zoom with mechanical debounce
//!
//! Each (fixture, mechanism) pair keeps its own clock. A change is committed
//! immediately when the previous commit is at least `debounce_ms` old;
//! otherwise it is parked as the single pending value and committed by
//! [`OpticsLayer::tick`] once the window has passed. Later requests replace
//! the pending value, and asking for the value that is already committed
//! cancels it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use tracing::debug;

use super::layers::ChannelLevels;
use crate::dmx::{to_dmx, ChannelType};

/// A motor-driven optical part of a fixture
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mechanism {
    Gobo,
    Prism,
    Zoom,
}

impl Mechanism {
    pub const ALL: [Mechanism; 3] = [Mechanism::Gobo, Mechanism::Prism, Mechanism::Zoom];

    pub fn channel_type(self) -> ChannelType {
        match self {
            Mechanism::Gobo => ChannelType::Gobo,
            Mechanism::Prism => ChannelType::Prism,
            Mechanism::Zoom => ChannelType::Zoom,
        }
    }

    pub fn from_channel(channel: ChannelType) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.channel_type() == channel)
    }
}

/// What happened to an optics request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpticsOutcome {
    /// Written now
    Committed,
    /// Held until the debounce window closes
    Deferred { commit_at_ms: u64 },
    /// Already at that value; any pending change was dropped
    Unchanged,
}

/// One change that reached the output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpticsCommit {
    pub fixture_id: u32,
    pub mechanism: Mechanism,
    pub value: f32,
    pub at_ms: u64,
    /// Blackout bypassed the debounce
    pub forced: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct MechanismState {
    committed: Option<f32>,
    changed_at_ms: Option<u64>,
    pending: Option<f32>,
}

impl MechanismState {
    fn ready_at(&self, debounce_ms: u64) -> u64 {
        self.changed_at_ms.map_or(0, |t| t.saturating_add(debounce_ms))
    }
}

/// Same value as far as the wire is concerned
fn same_level(a: f32, b: f32) -> bool {
    to_dmx(a) == to_dmx(b)
}

#[derive(Debug, Clone)]
pub struct OpticsLayer {
    debounce_ms: u64,
    states: BTreeMap<(u32, Mechanism), MechanismState>,
    commits: u64,
    log: VecDeque<OpticsCommit>,
    log_len: usize,
}

impl OpticsLayer {
    pub fn new(debounce_ms: u64, log_len: usize) -> Self {
        Self {
            debounce_ms,
            states: BTreeMap::new(),
            commits: 0,
            log: VecDeque::with_capacity(log_len),
            log_len,
        }
    }

    pub fn debounce_ms(&self) -> u64 {
        self.debounce_ms
    }

    /// Ask for a mechanism position in [0, 1]
    pub fn request(
        &mut self,
        fixture_id: u32,
        mechanism: Mechanism,
        value: f32,
        now_ms: u64,
    ) -> OpticsOutcome {
        let value = if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 };
        let debounce_ms = self.debounce_ms;
        let state = self.states.entry((fixture_id, mechanism)).or_default();

        if state.committed.is_some_and(|c| same_level(c, value)) {
            if state.pending.take().is_some() {
                debug!(fixture_id, ?mechanism, "Pending optics change cancelled");
            }
            return OpticsOutcome::Unchanged;
        }

        let ready_at = state.ready_at(debounce_ms);
        if state.changed_at_ms.is_none() || now_ms >= ready_at {
            state.pending = None;
            self.commit(fixture_id, mechanism, value, now_ms, false);
            OpticsOutcome::Committed
        } else {
            if let Some(previous) = state.pending.replace(value) {
                debug!(fixture_id, ?mechanism, previous, value, "Pending optics change replaced");
            } else {
                debug!(fixture_id, ?mechanism, value, ready_at, "Optics change debounced");
            }
            OpticsOutcome::Deferred {
                commit_at_ms: ready_at,
            }
        }
    }

    /// Commit every pending change whose window has closed
    pub fn tick(&mut self, now_ms: u64) -> usize {
        let debounce_ms = self.debounce_ms;
        let due: Vec<((u32, Mechanism), f32)> = self
            .states
            .iter()
            .filter(|(_, s)| s.pending.is_some() && now_ms >= s.ready_at(debounce_ms))
            .filter_map(|(key, s)| s.pending.map(|v| (*key, v)))
            .collect();
        for ((fixture_id, mechanism), value) in &due {
            self.commit(*fixture_id, *mechanism, *value, now_ms, false);
        }
        due.len()
    }

    /// Zero every known mechanism now, dropping pending changes
    pub fn force_zero(&mut self, now_ms: u64) {
        let keys: Vec<(u32, Mechanism)> = self.states.keys().copied().collect();
        for (fixture_id, mechanism) in keys {
            self.commit(fixture_id, mechanism, 0.0, now_ms, true);
        }
    }

    fn commit(&mut self, fixture_id: u32, mechanism: Mechanism, value: f32, now_ms: u64, forced: bool) {
        let state = self.states.entry((fixture_id, mechanism)).or_default();
        state.committed = Some(value);
        state.changed_at_ms = Some(now_ms);
        state.pending = None;
        if !forced {
            self.commits += 1;
        }
        debug!(fixture_id, ?mechanism, value, forced, "Optics committed");
        if self.log_len > 0 {
            if self.log.len() == self.log_len {
                self.log.pop_front();
            }
            self.log.push_back(OpticsCommit {
                fixture_id,
                mechanism,
                value,
                at_ms: now_ms,
                forced,
            });
        }
    }

    pub fn committed(&self, fixture_id: u32, mechanism: Mechanism) -> Option<f32> {
        self.states.get(&(fixture_id, mechanism)).and_then(|s| s.committed)
    }

    pub fn pending(&self, fixture_id: u32, mechanism: Mechanism) -> Option<f32> {
        self.states.get(&(fixture_id, mechanism)).and_then(|s| s.pending)
    }

    /// Debounced commits so far; blackout commits are not counted
    pub fn commit_count(&self) -> u64 {
        self.commits
    }

    /// Recent commits, oldest first
    pub fn commit_log(&self) -> impl Iterator<Item = &OpticsCommit> {
        self.log.iter()
    }

    /// Write committed positions for one fixture
    pub fn contribute(&self, fixture_id: u32, levels: &mut ChannelLevels) {
        for mechanism in Mechanism::ALL {
            if let Some(value) = self.committed(fixture_id, mechanism) {
                levels.set(mechanism.channel_type(), value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unbounded_debounce_defers_forever() {
        let mut optics = OpticsLayer::new(u64::MAX, 8);
        assert_eq!(optics.request(1, Mechanism::Gobo, 0.5, 1000), OpticsOutcome::Committed);
        assert_eq!(
            optics.request(1, Mechanism::Gobo, 1.0, 1100),
            OpticsOutcome::Deferred {
                commit_at_ms: u64::MAX
            }
        );
        assert_eq!(optics.tick(u64::MAX - 1), 0);
        assert_eq!(optics.committed(1, Mechanism::Gobo), Some(0.5));
    }

    #[test]
    fn test_first_request_commits_immediately() {
        let mut optics = OpticsLayer::new(2000, 8);
        assert_eq!(optics.request(1, Mechanism::Gobo, 0.5, 100), OpticsOutcome::Committed);
        assert_eq!(optics.committed(1, Mechanism::Gobo), Some(0.5));
        assert_eq!(optics.commit_count(), 1);
    }

    #[test]
    fn test_last_request_wins() {
        let mut optics = OpticsLayer::new(2000, 8);
        optics.request(1, Mechanism::Gobo, 0.1, 0);
        assert_eq!(
            optics.request(1, Mechanism::Gobo, 0.4, 100),
            OpticsOutcome::Deferred { commit_at_ms: 2000 }
        );
        optics.request(1, Mechanism::Gobo, 0.7, 600);

        assert_eq!(optics.tick(1999), 0);
        assert_eq!(optics.committed(1, Mechanism::Gobo), Some(0.1));
        assert_eq!(optics.tick(2000), 1);
        assert_eq!(optics.committed(1, Mechanism::Gobo), Some(0.7));
        assert_eq!(optics.commit_count(), 2);
        assert_eq!(optics.tick(2500), 0);
    }

    #[test]
    fn test_requesting_committed_value_cancels_pending() {
        let mut optics = OpticsLayer::new(2000, 8);
        optics.request(1, Mechanism::Prism, 1.0, 0);
        optics.request(1, Mechanism::Prism, 0.0, 500);
        assert_eq!(optics.pending(1, Mechanism::Prism), Some(0.0));
        assert_eq!(optics.request(1, Mechanism::Prism, 1.0, 900), OpticsOutcome::Unchanged);
        assert_eq!(optics.pending(1, Mechanism::Prism), None);
        assert_eq!(optics.tick(3000), 0);
        assert_eq!(optics.commit_count(), 1);
    }

    #[test]
    fn test_clocks_are_per_mechanism() {
        let mut optics = OpticsLayer::new(2000, 8);
        optics.request(1, Mechanism::Gobo, 0.2, 0);
        assert_eq!(optics.request(1, Mechanism::Zoom, 0.2, 10), OpticsOutcome::Committed);
        assert_eq!(optics.request(2, Mechanism::Gobo, 0.2, 20), OpticsOutcome::Committed);
        assert!(matches!(
            optics.request(1, Mechanism::Gobo, 0.9, 30),
            OpticsOutcome::Deferred { .. }
        ));
    }

    #[test]
    fn test_force_zero_bypasses_debounce() {
        let mut optics = OpticsLayer::new(2000, 8);
        optics.request(1, Mechanism::Gobo, 0.6, 0);
        optics.request(1, Mechanism::Gobo, 0.9, 500);
        optics.force_zero(700);

        assert_eq!(optics.committed(1, Mechanism::Gobo), Some(0.0));
        assert_eq!(optics.pending(1, Mechanism::Gobo), None);
        assert_eq!(optics.commit_count(), 1);
        let last = optics.commit_log().last().copied().unwrap();
        assert!(last.forced);
        // The forced move restarts the clock
        assert!(matches!(
            optics.request(1, Mechanism::Gobo, 0.9, 1000),
            OpticsOutcome::Deferred { commit_at_ms: 2700 }
        ));
    }

    #[test]
    fn test_commit_log_is_bounded() {
        let mut optics = OpticsLayer::new(0, 2);
        for i in 0..5 {
            optics.request(1, Mechanism::Zoom, i as f32 / 10.0 + 0.1, i * 10);
        }
        let log: Vec<_> = optics.commit_log().collect();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].at_ms, 40);
        assert_eq!(optics.commit_count(), 5);
    }
}
