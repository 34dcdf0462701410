//! `DomainRegistered` notifications for external observers.

use crate::crypto::Principal;
use crate::name::DomainName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Emitted once per successful purchase. Sequence numbers start at 1 and
/// increase by one per event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRegistered {
    pub sequence: u64,
    /// The caller that paid for the name
    pub registrant: Principal,
    pub timestamp: DateTime<Utc>,
    pub name: DomainName,
    pub beneficiary: Principal,
}

/// Query over the event log. `to_sequence = None` means "up to latest";
/// both bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    pub registrant: Option<Principal>,
    #[serde(default)]
    pub from_sequence: u64,
    pub to_sequence: Option<u64>,
}

impl EventFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_registrant(registrant: Principal) -> Self {
        EventFilter {
            registrant: Some(registrant),
            ..Self::default()
        }
    }

    pub fn from(mut self, sequence: u64) -> Self {
        self.from_sequence = sequence;
        self
    }

    pub fn to(mut self, sequence: u64) -> Self {
        self.to_sequence = Some(sequence);
        self
    }

    pub fn matches(&self, event: &DomainRegistered) -> bool {
        if event.sequence < self.from_sequence {
            return false;
        }
        if let Some(to) = self.to_sequence {
            if event.sequence > to {
                return false;
            }
        }
        self.registrant
            .map_or(true, |registrant| registrant == event.registrant)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<DomainRegistered>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events(mut events: Vec<DomainRegistered>) -> Self {
        events.sort_by_key(|e| e.sequence);
        EventLog { events }
    }

    pub fn next_sequence(&self) -> u64 {
        self.events.last().map_or(1, |e| e.sequence + 1)
    }

    /// Append a new event, assigning the next sequence number.
    pub fn record(
        &mut self,
        registrant: Principal,
        timestamp: DateTime<Utc>,
        name: DomainName,
        beneficiary: Principal,
    ) -> DomainRegistered {
        let event = DomainRegistered {
            sequence: self.next_sequence(),
            registrant,
            timestamp,
            name,
            beneficiary,
        };
        self.push(event.clone());
        event
    }

    /// Append an event built elsewhere. Events at or below the current
    /// sequence are ignored so the log stays strictly ordered.
    pub(crate) fn push(&mut self, event: DomainRegistered) -> bool {
        if event.sequence < self.next_sequence() {
            return false;
        }
        self.events.push(event);
        true
    }

    pub fn query(&self, filter: &EventFilter) -> Vec<DomainRegistered> {
        // Events are sorted by sequence, so skip straight to the lower bound.
        let start = self
            .events
            .partition_point(|e| e.sequence < filter.from_sequence);
        self.events[start..]
            .iter()
            .take_while(|e| filter.to_sequence.map_or(true, |to| e.sequence <= to))
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DomainRegistered> {
        self.events.iter()
    }
}
