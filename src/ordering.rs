//! Ordering engine: deterministic linear order for labels sharing an
//! anchor, and the full cross-phase flatten.
//!
//! Nodes are individual labels; edges are lifted from token-level rules
//! where token = `domain:subject`. When multiple labels share a token
//! (per-field instances), edges fan out pairwise to all matching nodes.
//! A stable Kahn sort with a fixed tie-break key makes the result
//! reproducible across calls and across process restarts.

use std::collections::BTreeMap;

use tracing::warn;

use crate::anchor::{self, Anchor};
use crate::label::{Label, LabelKind};
use crate::phase::Phase;

// ── Default in-anchor preferences ─────────────────────────────
//
// Each entry lists "domain:subject" tokens in desired order; consecutive
// tokens become edges (u -> v). Tokens absent from the label population
// are ignored.

static DEFAULT_PREF: &[(Anchor, &[&str])] = &[
    (Anchor::SchemaCollectIn, &["schema:collect_in"]),
    (Anchor::InValidate, &["wire:build_in", "wire:validate_in"]),
    (Anchor::ResolveValues, &["resolve:assemble", "resolve:paired_gen"]),
    (Anchor::PreFlush, &["storage:to_stored"]),
    (Anchor::EmitAliasesPre, &["emit:paired_pre"]),
    (Anchor::PostFlush, &["refresh:demand"]),
    (Anchor::EmitAliasesPost, &["emit:paired_post"]),
    (Anchor::SchemaCollectOut, &["schema:collect_out"]),
    (Anchor::OutBuild, &["wire:build_out"]),
    (Anchor::EmitAliasesRead, &["emit:readtime_alias"]),
    (Anchor::OutDump, &["wire:dump", "out:masking"]),
];

/// Default preference token order for an anchor.
pub fn default_preferences(anchor: Anchor) -> &'static [&'static str] {
    DEFAULT_PREF
        .iter()
        .find(|(a, _)| *a == anchor)
        .map(|(_, toks)| *toks)
        .unwrap_or(&[])
}

/// Extra ordering rules for a specific anchor.
///
/// - `edges`: `(u, v)` means "u before v" where u/v are
///   `domain:subject` tokens.
/// - `prefer`: stable tie-break priority list of tokens.
#[derive(Debug, Clone, Default)]
pub struct AnchorPolicy {
    pub edges: Vec<(String, String)>,
    pub prefer: Vec<String>,
}

/// Result of an in-anchor sort. `fallback_used` is true when a cycle
/// forced the rank-order fallback; the kernel surfaces this through
/// diagnostics rather than failing the build.
#[derive(Debug)]
pub struct OrderOutcome {
    pub labels: Vec<Label>,
    pub fallback_used: bool,
}

const UNRANKED: usize = 10_000;

fn rank_key(
    label: &Label,
    policy_index: &BTreeMap<&str, usize>,
    default_index: &BTreeMap<&str, usize>,
) -> (usize, usize, u8, String, String, String) {
    let token = label.token();
    let p1 = policy_index.get(token.as_str()).copied().unwrap_or(UNRANKED);
    let p2 = default_index.get(token.as_str()).copied().unwrap_or(UNRANKED);
    (
        p1,
        p2,
        label.kind.rank(),
        label.domain.clone().unwrap_or_default(),
        label.subject.clone(),
        label.field.clone().unwrap_or_default(),
    )
}

/// Topologically sort labels within one anchor, deterministically.
pub fn order_within_anchor(
    anchor: Anchor,
    labels: &[Label],
    policy: Option<&AnchorPolicy>,
) -> Vec<Label> {
    order_within_anchor_outcome(anchor, labels, policy).labels
}

/// As [`order_within_anchor`], reporting whether the cycle fallback ran.
pub fn order_within_anchor_outcome(
    anchor: Anchor,
    labels: &[Label],
    policy: Option<&AnchorPolicy>,
) -> OrderOutcome {
    // Token index: tokens fan out to all matching nodes.
    let tokens: Vec<String> = labels.iter().map(|l| l.token()).collect();
    let mut by_token: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, tok) in tokens.iter().enumerate() {
        by_token.entry(tok.as_str()).or_default().push(i);
    }

    // Edges: defaults first, then caller policy.
    let defaults = default_preferences(anchor);
    let mut edges: Vec<(&str, &str)> = defaults.windows(2).map(|w| (w[0], w[1])).collect();
    if let Some(p) = policy {
        edges.extend(p.edges.iter().map(|(u, v)| (u.as_str(), v.as_str())));
    }

    let mut adj: Vec<Vec<usize>> = vec![Vec::new(); labels.len()];
    let mut indeg: Vec<usize> = vec![0; labels.len()];
    for (u_tok, v_tok) in edges {
        let (Some(us), Some(vs)) = (by_token.get(u_tok), by_token.get(v_tok)) else {
            continue;
        };
        for &u in us {
            for &v in vs {
                if u != v && !adj[u].contains(&v) {
                    adj[u].push(v);
                    indeg[v] += 1;
                }
            }
        }
    }

    // Tie-break indices: policy preference list, then default table.
    let prefer: &[String] = policy.map(|p| p.prefer.as_slice()).unwrap_or(&[]);
    let policy_index: BTreeMap<&str, usize> =
        prefer.iter().enumerate().map(|(i, t)| (t.as_str(), i)).collect();
    let default_index: BTreeMap<&str, usize> =
        defaults.iter().enumerate().map(|(i, t)| (*t, i)).collect();

    let keys: Vec<_> = labels
        .iter()
        .map(|l| rank_key(l, &policy_index, &default_index))
        .collect();

    // Kahn with deterministic tie-breaks: among all zero-in-degree
    // nodes, always emit the lexicographically smallest rank key.
    let mut queue: Vec<usize> = indeg
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0)
        .map(|(i, _)| i)
        .collect();
    let mut out: Vec<usize> = Vec::with_capacity(labels.len());
    while !queue.is_empty() {
        queue.sort_by(|&a, &b| keys[a].cmp(&keys[b]));
        let n = queue.remove(0);
        out.push(n);
        for &v in &adj[n] {
            indeg[v] -= 1;
            if indeg[v] == 0 {
                queue.push(v);
            }
        }
    }

    let mut fallback_used = false;
    if out.len() != labels.len() {
        // Cycle among the remaining nodes. Recoverable: append them in
        // rank order so the result stays total and deterministic.
        fallback_used = true;
        let mut remaining: Vec<usize> =
            (0..labels.len()).filter(|i| !out.contains(i)).collect();
        remaining.sort_by(|&a, &b| keys[a].cmp(&keys[b]));
        warn!(
            anchor = anchor.as_str(),
            remaining = remaining.len(),
            "ordering cycle detected; falling back to rank order"
        );
        out.extend(remaining);
    }

    OrderOutcome { labels: out.into_iter().map(|i| labels[i].clone()).collect(), fallback_used }
}

// ── Full flatten ──────────────────────────────────────────────

/// Produce the full, flattened order of labels across all phases:
/// secdeps, deps, then per phase in canonical order each phase's anchor
/// blocks (each internally topo-sorted) followed by its system steps.
/// System labels and persist-tied anchors are pruned when
/// `persist = false`.
pub fn flatten(
    labels: &[Label],
    persist: bool,
    policies: &BTreeMap<Anchor, AnchorPolicy>,
) -> Vec<Label> {
    let mut secdeps: Vec<Label> = Vec::new();
    let mut deps: Vec<Label> = Vec::new();
    let mut sys_by_phase: BTreeMap<Phase, Vec<Label>> = BTreeMap::new();
    let mut by_anchor: BTreeMap<Anchor, Vec<Label>> = BTreeMap::new();

    for label in labels {
        match label.kind {
            LabelKind::Secdep => secdeps.push(label.clone()),
            LabelKind::Dep => deps.push(label.clone()),
            LabelKind::Sys => {
                if let Some(phase) = label.phase() {
                    sys_by_phase.entry(phase).or_default().push(label.clone());
                }
            }
            LabelKind::Atom | LabelKind::Hook => {
                if let Some(a) = label.anchor() {
                    by_anchor.entry(a).or_default().push(label.clone());
                }
            }
        }
    }

    secdeps.sort_by(|a, b| a.subject.cmp(&b.subject));
    deps.sort_by(|a, b| a.subject.cmp(&b.subject));

    let anchors_present: Vec<Anchor> = by_anchor.keys().copied().collect();
    let mut anchors = anchor::order_events(&anchors_present);
    if !persist {
        anchors = anchor::prune_events_for_persist(&anchors, false);
    }

    let mut out: Vec<Label> = Vec::new();
    out.extend(secdeps);
    out.extend(deps);

    for phase in Phase::ALL {
        for a in anchors.iter().copied().filter(|a| a.phase() == phase) {
            let group = &by_anchor[&a];
            let policy = policies.get(&a);
            out.extend(order_within_anchor(a, group, policy));
        }
        if persist {
            if let Some(sys) = sys_by_phase.get(&phase) {
                let mut sys = sys.clone();
                sys.sort_by(|a, b| {
                    (a.subject.as_str(), a.field.as_deref().unwrap_or(""))
                        .cmp(&(b.subject.as_str(), b.field.as_deref().unwrap_or("")))
                });
                out.extend(sys);
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(labels: &[Label]) -> Vec<String> {
        labels.iter().map(|l| l.to_string()).collect()
    }

    #[test]
    fn default_preference_orders_build_before_validate() {
        // Registered in reverse order on purpose.
        let labels = vec![
            Label::atom("wire", "validate_in", Anchor::InValidate),
            Label::atom("wire", "build_in", Anchor::InValidate),
        ];
        let ordered = order_within_anchor(Anchor::InValidate, &labels, None);
        assert_eq!(
            toks(&ordered),
            vec![
                "atom:wire:build_in@wire:in_validate",
                "atom:wire:validate_in@wire:in_validate",
            ]
        );
    }

    #[test]
    fn repeated_calls_are_deterministic() {
        let labels = vec![
            Label::atom_field("storage", "to_stored", Anchor::PreFlush, "b"),
            Label::hook_at("op", "audit", Anchor::PreFlush),
            Label::atom_field("storage", "to_stored", Anchor::PreFlush, "a"),
        ];
        let first = order_within_anchor(Anchor::PreFlush, &labels, None);
        for _ in 0..5 {
            assert_eq!(order_within_anchor(Anchor::PreFlush, &labels, None), first);
        }
        // Atoms before hooks, fields lexicographic.
        assert_eq!(
            toks(&first),
            vec![
                "atom:storage:to_stored@storage:pre_flush+a",
                "atom:storage:to_stored@storage:pre_flush+b",
                "hook:op:audit@storage:pre_flush",
            ]
        );
    }

    #[test]
    fn policy_edges_fan_out_across_per_field_instances() {
        let labels = vec![
            Label::atom_field("resolve", "paired_gen", Anchor::ResolveValues, "key_a"),
            Label::atom_field("resolve", "paired_gen", Anchor::ResolveValues, "key_b"),
            Label::hook_at("op", "seed", Anchor::ResolveValues),
        ];
        let policy = AnchorPolicy {
            edges: vec![("op:seed".into(), "resolve:paired_gen".into())],
            prefer: vec!["op:seed".into()],
        };
        let ordered = order_within_anchor(Anchor::ResolveValues, &labels, Some(&policy));
        assert_eq!(ordered[0].subject, "seed");
        assert_eq!(ordered[1].field.as_deref(), Some("key_a"));
        assert_eq!(ordered[2].field.as_deref(), Some("key_b"));
    }

    #[test]
    fn cycle_falls_back_to_rank_order_and_flags_it() {
        let labels = vec![
            Label::atom("wire", "build_in", Anchor::InValidate),
            Label::atom("wire", "validate_in", Anchor::InValidate),
        ];
        // Policy edge contradicts the default edge.
        let policy = AnchorPolicy {
            edges: vec![("wire:validate_in".into(), "wire:build_in".into())],
            prefer: vec![],
        };
        let outcome = order_within_anchor_outcome(Anchor::InValidate, &labels, Some(&policy));
        assert!(outcome.fallback_used);
        assert_eq!(outcome.labels.len(), 2);
        // Rank order: default preference index wins.
        assert_eq!(outcome.labels[0].subject, "build_in");
    }

    #[test]
    fn flatten_is_phase_monotone() {
        let labels = vec![
            Label::atom("wire", "dump", Anchor::OutDump),
            Label::atom("schema", "collect_in", Anchor::SchemaCollectIn),
            Label::sys("txn", "commit", Phase::EndTx),
            Label::sys("txn", "begin", Phase::StartTx),
            Label::atom("storage", "to_stored", Anchor::PreFlush),
            Label::dep("get_db"),
            Label::secdep("authn"),
        ];
        let flat = flatten(&labels, true, &BTreeMap::new());
        assert_eq!(flat[0].kind, LabelKind::Secdep);
        assert_eq!(flat[1].kind, LabelKind::Dep);
        let phases: Vec<Phase> = flat.iter().filter_map(|l| l.phase()).collect();
        for pair in phases.windows(2) {
            assert!(pair[0] <= pair[1], "phase order regressed: {:?}", phases);
        }
    }

    #[test]
    fn flatten_prunes_sys_and_persist_tied_for_ephemeral() {
        let labels = vec![
            Label::atom("schema", "collect_in", Anchor::SchemaCollectIn),
            Label::atom("storage", "to_stored", Anchor::PreFlush),
            Label::sys("txn", "begin", Phase::StartTx),
            Label::sys("txn", "commit", Phase::EndTx),
        ];
        let flat = flatten(&labels, false, &BTreeMap::new());
        assert_eq!(flat.len(), 1);
        assert_eq!(flat[0].subject, "collect_in");
    }
}
