//! Phase taxonomy: the fixed operation-execution timeline.
//!
//! Phases are totally ordered by declaration; the order is immutable
//! process-wide state. Every chain slot is either a main phase, that
//! phase's dedicated error slot, the generic error slot, or the
//! rollback slot.

use serde::Serialize;
use strum::{Display, EnumCount};

/// One stage of the canonical execution timeline.
///
/// Declaration order is the canonical total order; `as usize` is the
/// phase index used for chain tables.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumCount, Serialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    PreTxBegin,
    StartTx,
    PreHandler,
    Handler,
    PostHandler,
    PreCommit,
    EndTx,
    PostCommit,
    PostResponse,
}

impl Phase {
    /// All phases in canonical order.
    pub const ALL: [Phase; 9] = [
        Phase::PreTxBegin,
        Phase::StartTx,
        Phase::PreHandler,
        Phase::Handler,
        Phase::PostHandler,
        Phase::PreCommit,
        Phase::EndTx,
        Phase::PostCommit,
        Phase::PostResponse,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::PreTxBegin => "PRE_TX_BEGIN",
            Phase::StartTx => "START_TX",
            Phase::PreHandler => "PRE_HANDLER",
            Phase::Handler => "HANDLER",
            Phase::PostHandler => "POST_HANDLER",
            Phase::PreCommit => "PRE_COMMIT",
            Phase::EndTx => "END_TX",
            Phase::PostCommit => "POST_COMMIT",
            Phase::PostResponse => "POST_RESPONSE",
        }
    }

    /// Pre-like phases merge hook sources api -> entity -> op; all other
    /// slots merge in the reverse direction.
    pub fn is_pre_like(self) -> bool {
        matches!(
            self,
            Phase::PreTxBegin | Phase::StartTx | Phase::PreHandler | Phase::PreCommit
        )
    }

    /// Phases that execute inside the transaction window of a persistent
    /// operation. A failure here triggers rollback-if-owned.
    pub fn in_tx_window(self) -> bool {
        matches!(
            self,
            Phase::PreHandler | Phase::Handler | Phase::PostHandler | Phase::PreCommit | Phase::EndTx
        )
    }
}

/// Addressable slot in a chain table: a main phase, its dedicated error
/// slot, the generic error fallback, or the rollback slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseSlot {
    Main(Phase),
    OnError(Phase),
    OnAnyError,
    OnRollback,
}

impl std::fmt::Display for PhaseSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseSlot::Main(ph) => write!(f, "{}", ph.as_str()),
            PhaseSlot::OnError(ph) => write!(f, "ON_{}_ERROR", ph.as_str()),
            PhaseSlot::OnAnyError => write!(f, "ON_ERROR"),
            PhaseSlot::OnRollback => write!(f, "ON_ROLLBACK"),
        }
    }
}
