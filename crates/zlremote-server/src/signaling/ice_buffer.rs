//! ICE candidates held back until the recipient can use them.
//!
//! Each (session, viewer) pair has two independent directions. Host
//! candidates for a viewer are held until the offer reached that viewer;
//! viewer candidates are held until the viewer's answer reached the host.
//! Once a direction is ready its queue is drained in arrival order and later
//! candidates bypass the buffer.

use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use zlremote_protocol::{ConnectionId, SessionId};

/// Per direction. A peer that never completes its handshake should not grow
/// the buffer without bound.
pub const MAX_PENDING_PER_DIRECTION: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PairKey {
    pub session_id: SessionId,
    pub viewer_id: ConnectionId,
}

impl PairKey {
    pub fn new(session_id: SessionId, viewer_id: ConnectionId) -> Self {
        Self {
            session_id,
            viewer_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host candidate, gated on the offer
    ToViewer,
    /// Viewer candidate, gated on the answer
    ToHost,
}

#[derive(Debug, Clone)]
pub struct PendingCandidate {
    pub recipient: ConnectionId,
    pub sender: ConnectionId,
    pub candidate: Value,
    pub queued_at: Instant,
}

impl PendingCandidate {
    /// Time spent in the buffer as of `now`
    pub fn waited(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.queued_at)
    }
}

#[derive(Debug, Default)]
struct Lane {
    ready: bool,
    pending: VecDeque<PendingCandidate>,
}

#[derive(Debug, Default)]
struct PairQueue {
    to_viewer: Lane,
    to_host: Lane,
}

impl PairQueue {
    fn lane(&self, direction: Direction) -> &Lane {
        match direction {
            Direction::ToViewer => &self.to_viewer,
            Direction::ToHost => &self.to_host,
        }
    }

    fn lane_mut(&mut self, direction: Direction) -> &mut Lane {
        match direction {
            Direction::ToViewer => &mut self.to_viewer,
            Direction::ToHost => &mut self.to_host,
        }
    }
}

#[derive(Debug, Default)]
pub struct IceCandidateBuffer {
    pairs: HashMap<PairKey, PairQueue>,
}

impl IceCandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self, key: &PairKey, direction: Direction) -> bool {
        self.pairs
            .get(key)
            .is_some_and(|pair| pair.lane(direction).ready)
    }

    /// Queue a candidate for a direction that is not ready yet.
    ///
    /// Returns false if the lane is full and the candidate was dropped.
    pub fn push(&mut self, key: PairKey, direction: Direction, candidate: PendingCandidate) -> bool {
        let lane = self.pairs.entry(key).or_default().lane_mut(direction);
        if lane.pending.len() >= MAX_PENDING_PER_DIRECTION {
            return false;
        }
        lane.pending.push_back(candidate);
        true
    }

    /// Mark a direction ready and take everything queued for it, oldest first
    pub fn mark_ready(&mut self, key: PairKey, direction: Direction) -> Vec<PendingCandidate> {
        let lane = self.pairs.entry(key).or_default().lane_mut(direction);
        lane.ready = true;
        lane.pending.drain(..).collect()
    }

    pub fn pending(&self, key: &PairKey, direction: Direction) -> usize {
        self.pairs
            .get(key)
            .map_or(0, |pair| pair.lane(direction).pending.len())
    }

    /// Forget a pair, e.g. when its viewer leaves
    pub fn remove_pair(&mut self, key: &PairKey) -> usize {
        self.pairs
            .remove(key)
            .map_or(0, |pair| pair.to_viewer.pending.len() + pair.to_host.pending.len())
    }

    /// Forget every pair of a session. Returns the number of discarded candidates.
    pub fn remove_session(&mut self, session_id: &SessionId) -> usize {
        let mut discarded = 0;
        self.pairs.retain(|key, pair| {
            if &key.session_id == session_id {
                discarded += pair.to_viewer.pending.len() + pair.to_host.pending.len();
                false
            } else {
                true
            }
        });
        discarded
    }

    /// Total candidates waiting across all pairs
    pub fn len(&self) -> usize {
        self.pairs
            .values()
            .map(|pair| pair.to_viewer.pending.len() + pair.to_host.pending.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
