//! Build run state machine

use crate::error::{WheelsmithError, WheelsmithResult};
use serde::Serialize;
use std::fmt;
use tracing::debug;
use uuid::Uuid;

/// Phase of a single build run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    Pending,
    Resolving,
    CacheLookup,
    CacheHit,
    CacheMiss,
    Fetching,
    Building,
    Validating,
    CacheInsert,
    Publishing,
    Done,
    Failed,
}

impl BuildState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether `next` may follow this state
    pub fn can_transition_to(&self, next: BuildState) -> bool {
        use BuildState::*;
        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Pending, Resolving)
                | (Resolving, CacheLookup)
                | (CacheLookup, CacheHit)
                | (CacheLookup, CacheMiss)
                | (CacheHit, Done)
                | (CacheMiss, Fetching)
                | (CacheMiss, Building)
                | (Fetching, CacheInsert)
                | (Fetching, Building)
                | (Building, Validating)
                | (Validating, CacheInsert)
                | (CacheInsert, Publishing)
                | (CacheInsert, Done)
                | (Publishing, Done)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolving => "resolving",
            Self::CacheLookup => "cache_lookup",
            Self::CacheHit => "cache_hit",
            Self::CacheMiss => "cache_miss",
            Self::Fetching => "fetching",
            Self::Building => "building",
            Self::Validating => "validating",
            Self::CacheInsert => "cache_insert",
            Self::Publishing => "publishing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks one build run through its states
#[derive(Debug, Clone)]
pub struct BuildTracker {
    id: Uuid,
    state: BuildState,
    history: Vec<BuildState>,
}

impl BuildTracker {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: BuildState::Pending,
            history: vec![BuildState::Pending],
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    /// Every state visited, in order
    pub fn history(&self) -> &[BuildState] {
        &self.history
    }

    /// Move to `next`; illegal transitions are internal errors
    pub fn advance(&mut self, next: BuildState) -> WheelsmithResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(WheelsmithError::IllegalTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        debug!(build_id = %self.id, from = %self.state, to = %next, "Build state");
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Mark the run failed; a no-op once terminal
    pub fn fail(&mut self) {
        if !self.state.is_terminal() {
            self.state = BuildState::Failed;
            self.history.push(BuildState::Failed);
        }
    }
}

impl Default for BuildTracker {
    fn default() -> Self {
        Self::new()
    }
}
