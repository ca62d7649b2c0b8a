//! Anchor taxonomy: named event points nested inside phases.
//!
//! Each anchor lives in exactly one phase and carries a persist-tied
//! flag: persist-tied anchors are only meaningful when the operation
//! writes to storage, and are pruned from chains for ephemeral ops.
//!
//! Declaration order is the canonical total order (phase-major, with a
//! fixed intra-phase tie-break), which is what "next anchor" queries
//! and chain assembly rely on.

use serde::Serialize;
use strum::EnumCount;

use crate::phase::Phase;

/// A named event point within a phase where atoms attach.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumCount, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Anchor {
    // PRE_HANDLER
    SchemaCollectIn,
    InValidate,
    ResolveValues,
    // HANDLER
    PreFlush,
    EmitAliasesPre,
    // POST_HANDLER
    PostFlush,
    EmitAliasesPost,
    SchemaCollectOut,
    OutBuild,
    // POST_RESPONSE
    EmitAliasesRead,
    OutDump,
}

impl Anchor {
    /// All anchors in canonical order.
    pub const ALL: [Anchor; 11] = [
        Anchor::SchemaCollectIn,
        Anchor::InValidate,
        Anchor::ResolveValues,
        Anchor::PreFlush,
        Anchor::EmitAliasesPre,
        Anchor::PostFlush,
        Anchor::EmitAliasesPost,
        Anchor::SchemaCollectOut,
        Anchor::OutBuild,
        Anchor::EmitAliasesRead,
        Anchor::OutDump,
    ];

    /// The phase this anchor is nested in.
    pub fn phase(self) -> Phase {
        match self {
            Anchor::SchemaCollectIn | Anchor::InValidate | Anchor::ResolveValues => {
                Phase::PreHandler
            }
            Anchor::PreFlush | Anchor::EmitAliasesPre => Phase::Handler,
            Anchor::PostFlush
            | Anchor::EmitAliasesPost
            | Anchor::SchemaCollectOut
            | Anchor::OutBuild => Phase::PostHandler,
            Anchor::EmitAliasesRead | Anchor::OutDump => Phase::PostResponse,
        }
    }

    /// Whether this anchor is only meaningful when the operation writes
    /// to storage (the flush window and its alias emissions).
    pub fn persist_tied(self) -> bool {
        matches!(
            self,
            Anchor::PreFlush | Anchor::EmitAliasesPre | Anchor::PostFlush | Anchor::EmitAliasesPost
        )
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Wire name, `domain:event` style.
    pub fn as_str(self) -> &'static str {
        match self {
            Anchor::SchemaCollectIn => "schema:collect_in",
            Anchor::InValidate => "wire:in_validate",
            Anchor::ResolveValues => "resolve:values",
            Anchor::PreFlush => "storage:pre_flush",
            Anchor::EmitAliasesPre => "emit:aliases_pre",
            Anchor::PostFlush => "storage:post_flush",
            Anchor::EmitAliasesPost => "emit:aliases_post",
            Anchor::SchemaCollectOut => "schema:collect_out",
            Anchor::OutBuild => "wire:out_build",
            Anchor::EmitAliasesRead => "emit:aliases_read",
            Anchor::OutDump => "wire:out_dump",
        }
    }

    /// Resolve a wire name back to an anchor. Registration paths use
    /// this; an unresolvable name is a `ConfigError` at build time.
    pub fn parse(name: &str) -> Option<Anchor> {
        Anchor::ALL.iter().copied().find(|a| a.as_str() == name)
    }
}

impl std::fmt::Display for Anchor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Pure event-ordering queries ───────────────────────────────

/// Return the given anchors in canonical order, de-duplicated.
pub fn order_events(anchors: &[Anchor]) -> Vec<Anchor> {
    let mut seen = [false; Anchor::ALL.len()];
    for a in anchors {
        seen[a.index()] = true;
    }
    Anchor::ALL.iter().copied().filter(|a| seen[a.index()]).collect()
}

/// Drop persist-tied anchors when the operation does not persist.
pub fn prune_events_for_persist(anchors: &[Anchor], persist: bool) -> Vec<Anchor> {
    anchors
        .iter()
        .copied()
        .filter(|a| persist || !a.persist_tied())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_anchor_has_a_phase_in_canonical_order() {
        // Phase-major: anchor order must be non-decreasing in phase order.
        for pair in Anchor::ALL.windows(2) {
            assert!(pair[0].phase() <= pair[1].phase(), "{:?} vs {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn wire_names_round_trip() {
        for a in Anchor::ALL {
            assert_eq!(Anchor::parse(a.as_str()), Some(a));
        }
        assert_eq!(Anchor::parse("schema:does_not_exist"), None);
    }

    #[test]
    fn order_events_is_canonical_and_deduped() {
        let scrambled = [
            Anchor::OutDump,
            Anchor::SchemaCollectIn,
            Anchor::PreFlush,
            Anchor::SchemaCollectIn,
        ];
        assert_eq!(
            order_events(&scrambled),
            vec![Anchor::SchemaCollectIn, Anchor::PreFlush, Anchor::OutDump]
        );
    }

    #[test]
    fn prune_drops_only_persist_tied() {
        let all: Vec<Anchor> = Anchor::ALL.to_vec();
        let pruned = prune_events_for_persist(&all, false);
        assert!(pruned.iter().all(|a| !a.persist_tied()));
        assert_eq!(pruned.len(), all.len() - 4);
        assert_eq!(prune_events_for_persist(&all, true), all);
    }

    #[test]
    fn flush_window_is_persist_tied() {
        assert!(Anchor::PreFlush.persist_tied());
        assert!(Anchor::PostFlush.persist_tied());
        assert!(!Anchor::SchemaCollectIn.persist_tied());
        assert!(!Anchor::OutDump.persist_tied());
    }
}
