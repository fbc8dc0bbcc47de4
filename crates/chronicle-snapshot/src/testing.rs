//! Small aggregate used by this crate's unit tests.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use chronicle_core::aggregate::{AggregateRoot, AggregateState};
use chronicle_core::error::DomainError;
use chronicle_core::event::{DomainEvent, EventMetadata};
use chronicle_core::event_store::StoredEvent;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum LedgerEventKind {
    Opened,
    Deposited { amount: i64 },
}

impl LedgerEventKind {
    fn tag(&self) -> &'static str {
        match self {
            Self::Opened => "ledger.opened",
            Self::Deposited { .. } => "ledger.deposited",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct LedgerEvent {
    pub metadata: EventMetadata,
    pub kind: LedgerEventKind,
}

impl DomainEvent for LedgerEvent {
    fn event_type(&self) -> &'static str {
        self.kind.tag()
    }

    fn to_payload(&self) -> Result<serde_json::Value, DomainError> {
        match &self.kind {
            LedgerEventKind::Opened => Ok(serde_json::json!({})),
            LedgerEventKind::Deposited { amount } => Ok(serde_json::json!({ "amount": amount })),
        }
    }

    fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    fn from_stored(stored: &StoredEvent) -> Result<Self, DomainError> {
        let kind = match stored.event_type.as_str() {
            "ledger.opened" => LedgerEventKind::Opened,
            "ledger.deposited" => LedgerEventKind::Deposited {
                amount: stored.payload["amount"]
                    .as_i64()
                    .ok_or_else(|| DomainError::Deserialization("missing amount".into()))?,
            },
            other => {
                return Err(DomainError::UnknownEventType {
                    aggregate_type: Ledger::AGGREGATE_TYPE.to_owned(),
                    event_type: other.to_owned(),
                });
            }
        };
        Ok(Self {
            metadata: EventMetadata::from_stored(stored),
            kind,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Ledger {
    state: AggregateState<LedgerEvent>,
    opened: bool,
    balance: i64,
    entries: Vec<i64>,
}

impl Ledger {
    /// Opens a ledger; the result is at version 1 with one uncommitted event.
    pub(crate) fn open(id: Uuid) -> Self {
        let mut ledger = Self::empty(id);
        ledger.emit(LedgerEventKind::Opened);
        ledger
    }

    /// Opens a ledger and deposits `1` until it reaches `version`, committed.
    pub(crate) fn committed_at(id: Uuid, version: i64) -> Self {
        let mut ledger = Self::open(id);
        for _ in 1..version {
            ledger.deposit(1);
        }
        ledger.mark_committed();
        ledger
    }

    pub(crate) fn deposit(&mut self, amount: i64) {
        self.emit(LedgerEventKind::Deposited { amount });
    }

    pub(crate) fn balance(&self) -> i64 {
        self.balance
    }

    pub(crate) fn entries(&self) -> &[i64] {
        &self.entries
    }

    fn emit(&mut self, kind: LedgerEventKind) {
        let metadata = EventMetadata::new(
            kind.tag(),
            self.state.id(),
            Self::AGGREGATE_TYPE,
            self.state.next_version(),
            Uuid::new_v4(),
            Utc::now(),
        );
        self.raise(LedgerEvent { metadata, kind });
    }
}

impl AggregateRoot for Ledger {
    type Event = LedgerEvent;

    const AGGREGATE_TYPE: &'static str = "ledger";

    fn empty(id: Uuid) -> Self {
        Self {
            state: AggregateState::new(id, Self::AGGREGATE_TYPE),
            opened: false,
            balance: 0,
            entries: Vec::new(),
        }
    }

    fn state(&self) -> &AggregateState<LedgerEvent> {
        &self.state
    }

    fn state_mut(&mut self) -> &mut AggregateState<LedgerEvent> {
        &mut self.state
    }

    fn mutate(&mut self, event: &LedgerEvent) {
        match &event.kind {
            LedgerEventKind::Opened => self.opened = true,
            LedgerEventKind::Deposited { amount } => {
                self.balance += amount;
                self.entries.push(*amount);
            }
        }
    }
}
