//! Client-side availability state and its reducer.
//!
//! DESIGN
//! ======
//! `SyncState` is a plain value updated only through [`SyncState::apply`].
//! It holds two copies of the catalog: the live set maintained from
//! SNAPSHOT/DELTA messages and the set last pulled over HTTP. While the
//! live channel is open the live set is authoritative. Once it is lost the
//! live set is kept as a degraded cache and the fresher of the two is served.
//!
//! A DELTA that skips a version cannot be patched in; the reducer reports
//! [`ApplyOutcome::Resync`] and the runtime reconnects for a fresh snapshot.

use std::collections::BTreeMap;

use wire::{Space, SpaceType};

// =============================================================================
// SPACE SET
// =============================================================================

/// A version-stamped catalog keyed by space ID.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpaceSet {
    version: u64,
    spaces: BTreeMap<i64, Space>,
}

impl SpaceSet {
    #[must_use]
    pub fn new(version: u64, spaces: Vec<Space>) -> Self {
        Self { version, spaces: spaces.into_iter().map(|s| (s.id, s)).collect() }
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[must_use]
    pub fn get(&self, space_id: i64) -> Option<&Space> {
        self.spaces.get(&space_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Space> {
        self.spaces.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }

    fn merge(&mut self, version: u64, changed: Vec<Space>) {
        for space in changed {
            self.spaces.insert(space.id, space);
        }
        self.version = version;
    }
}

// =============================================================================
// EVENTS
// =============================================================================

/// Input to the reducer.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncEvent {
    /// Live channel opened with a full snapshot.
    Snapshot { version: u64, spaces: Vec<Space> },
    /// Incremental change on the open live channel.
    Delta { version: u64, spaces: Vec<Space> },
    /// Live channel closed, errored or timed out.
    ChannelLost,
    /// Result of `GET /api/spaces`. A missing version header counts as 0.
    Pulled { version: Option<u64>, spaces: Vec<Space> },
}

impl From<wire::ServerMessage> for SyncEvent {
    fn from(message: wire::ServerMessage) -> Self {
        match message {
            wire::ServerMessage::Snapshot { version, spaces } => Self::Snapshot { version, spaces },
            wire::ServerMessage::Delta { version, spaces } => Self::Delta { version, spaces },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Stale or out-of-context input; state unchanged.
    Ignored,
    /// A version gap was detected; the live channel must be re-established.
    Resync,
}

// =============================================================================
// FILTER
// =============================================================================

/// Client-side narrowing of the catalog, as offered by the spaces page.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpaceFilter {
    /// Case-insensitive substring of the name or type.
    pub search: Option<String>,
    pub kind: Option<SpaceType>,
    pub wifi: bool,
    pub quiet: bool,
    pub power: bool,
    pub groups: bool,
    /// Only spaces with at least one free seat.
    pub available_only: bool,
}

impl SpaceFilter {
    #[must_use]
    pub fn matches(&self, space: &Space) -> bool {
        if let Some(query) = self.search.as_deref().map(str::to_lowercase).filter(|q| !q.is_empty()) {
            let in_name = space.name.to_lowercase().contains(&query);
            let in_type = space.kind.as_str().contains(&query);
            if !in_name && !in_type {
                return false;
            }
        }
        if self.kind.is_some_and(|kind| kind != space.kind) {
            return false;
        }
        let amenities = space.amenities;
        if (self.wifi && !amenities.wifi)
            || (self.quiet && !amenities.quiet_zone)
            || (self.power && !amenities.power)
            || (self.groups && !amenities.group_space)
        {
            return false;
        }
        !self.available_only || space.available_seats > 0
    }
}

// =============================================================================
// SYNC STATE
// =============================================================================

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncState {
    live: Option<SpaceSet>,
    pulled: Option<SpaceSet>,
    connected: bool,
}

impl SyncState {
    /// Fold one event into the state.
    pub fn apply(&mut self, event: SyncEvent) -> ApplyOutcome {
        match event {
            SyncEvent::Snapshot { version, spaces } => {
                self.live = Some(SpaceSet::new(version, spaces));
                self.pulled = None;
                self.connected = true;
                ApplyOutcome::Applied
            }
            SyncEvent::Delta { version, spaces } => {
                if !self.connected {
                    return ApplyOutcome::Ignored;
                }
                let Some(live) = self.live.as_mut() else {
                    return ApplyOutcome::Resync;
                };
                if version <= live.version {
                    return ApplyOutcome::Ignored;
                }
                if version > live.version + 1 {
                    return ApplyOutcome::Resync;
                }
                live.merge(version, spaces);
                ApplyOutcome::Applied
            }
            SyncEvent::ChannelLost => {
                if !self.connected {
                    return ApplyOutcome::Ignored;
                }
                self.connected = false;
                ApplyOutcome::Applied
            }
            SyncEvent::Pulled { version, spaces } => {
                self.pulled = Some(SpaceSet::new(version.unwrap_or(0), spaces));
                ApplyOutcome::Applied
            }
        }
    }

    #[must_use]
    pub fn connected(&self) -> bool {
        self.connected
    }

    /// The set views are served from, if any data has arrived yet.
    #[must_use]
    pub fn authoritative(&self) -> Option<&SpaceSet> {
        if self.connected {
            return self.live.as_ref();
        }
        match (&self.live, &self.pulled) {
            (Some(live), Some(pulled)) => Some(if pulled.version >= live.version { pulled } else { live }),
            (live, pulled) => live.as_ref().or(pulled.as_ref()),
        }
    }

    #[must_use]
    pub fn version(&self) -> Option<u64> {
        self.authoritative().map(SpaceSet::version)
    }

    /// Every space of the authoritative set, ordered by ID.
    #[must_use]
    pub fn spaces(&self) -> Vec<Space> {
        self.authoritative().map(|set| set.iter().cloned().collect()).unwrap_or_default()
    }

    #[must_use]
    pub fn get_by_id(&self, space_id: i64) -> Option<&Space> {
        self.authoritative()?.get(space_id)
    }

    #[must_use]
    pub fn get_by_type(&self, kind: SpaceType) -> Vec<&Space> {
        self.filter(&SpaceFilter { kind: Some(kind), ..SpaceFilter::default() })
    }

    #[must_use]
    pub fn filter(&self, filter: &SpaceFilter) -> Vec<&Space> {
        self.authoritative().map(|set| set.iter().filter(|s| filter.matches(s)).collect()).unwrap_or_default()
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
