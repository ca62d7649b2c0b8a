//! Label grammar: typed identifiers for executable step instances.
//!
//! A label carries `(kind, domain, subject, attach point, field?)` and
//! renders as `kind:domain:subject@anchor` (`+field` for per-field atom
//! instances). Labels are immutable value objects with structural
//! equality; the ordering engine and the diagnostic plan both key on
//! them.

use crate::anchor::Anchor;
use crate::phase::Phase;

/// Step kind. Rank order (atom before hook) is a tie-break input for
/// the ordering engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LabelKind {
    Atom,
    Hook,
    Dep,
    Secdep,
    Sys,
}

impl LabelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LabelKind::Atom => "atom",
            LabelKind::Hook => "hook",
            LabelKind::Dep => "dep",
            LabelKind::Secdep => "secdep",
            LabelKind::Sys => "sys",
        }
    }

    /// Ordering-engine rank: atoms sort before hooks among ties.
    pub fn rank(self) -> u8 {
        match self {
            LabelKind::Atom => 0,
            LabelKind::Hook => 1,
            LabelKind::Dep => 2,
            LabelKind::Secdep => 3,
            LabelKind::Sys => 4,
        }
    }
}

/// Where a label attaches: atoms and hooks attach to an anchor event;
/// system steps attach to a whole phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attach {
    Event(Anchor),
    Phase(Phase),
}

/// Identifies one executable step instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Label {
    pub kind: LabelKind,
    pub domain: Option<String>,
    pub subject: String,
    pub attach: Option<Attach>,
    pub field: Option<String>,
}

impl Label {
    pub fn atom(domain: &str, subject: &str, anchor: Anchor) -> Self {
        Label {
            kind: LabelKind::Atom,
            domain: Some(domain.to_string()),
            subject: subject.to_string(),
            attach: Some(Attach::Event(anchor)),
            field: None,
        }
    }

    /// Per-field atom instance.
    pub fn atom_field(domain: &str, subject: &str, anchor: Anchor, field: &str) -> Self {
        Label { field: Some(field.to_string()), ..Label::atom(domain, subject, anchor) }
    }

    /// Hook attached at a phase. `domain` names the source level
    /// (`api`, `model`, `op`).
    pub fn hook(domain: &str, subject: &str, phase: Phase) -> Self {
        Label {
            kind: LabelKind::Hook,
            domain: Some(domain.to_string()),
            subject: subject.to_string(),
            attach: Some(Attach::Phase(phase)),
            field: None,
        }
    }

    /// Hook attached at an anchor (policy-ordered alongside atoms).
    pub fn hook_at(domain: &str, subject: &str, anchor: Anchor) -> Self {
        Label {
            kind: LabelKind::Hook,
            domain: Some(domain.to_string()),
            subject: subject.to_string(),
            attach: Some(Attach::Event(anchor)),
            field: None,
        }
    }

    pub fn dep(subject: &str) -> Self {
        Label {
            kind: LabelKind::Dep,
            domain: None,
            subject: subject.to_string(),
            attach: None,
            field: None,
        }
    }

    pub fn secdep(subject: &str) -> Self {
        Label { kind: LabelKind::Secdep, ..Label::dep(subject) }
    }

    /// System step bound to a phase (txn begin/commit).
    pub fn sys(domain: &str, subject: &str, phase: Phase) -> Self {
        Label {
            kind: LabelKind::Sys,
            domain: Some(domain.to_string()),
            subject: subject.to_string(),
            attach: Some(Attach::Phase(phase)),
            field: None,
        }
    }

    /// `domain:subject` token used by the ordering engine's edge rules.
    pub fn token(&self) -> String {
        match &self.domain {
            Some(d) => format!("{}:{}", d, self.subject),
            None => self.subject.clone(),
        }
    }

    /// Anchor this label attaches to, if it attaches to an event.
    pub fn anchor(&self) -> Option<Anchor> {
        match self.attach {
            Some(Attach::Event(a)) => Some(a),
            _ => None,
        }
    }

    /// Phase this label executes in.
    pub fn phase(&self) -> Option<Phase> {
        match self.attach {
            Some(Attach::Event(a)) => Some(a.phase()),
            Some(Attach::Phase(p)) => Some(p),
            None => None,
        }
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:", self.kind.as_str())?;
        if let Some(d) = &self.domain {
            write!(f, "{}:", d)?;
        }
        write!(f, "{}", self.subject)?;
        match self.attach {
            Some(Attach::Event(a)) => write!(f, "@{}", a.as_str())?,
            Some(Attach::Phase(p)) => write!(f, "@{}", p.as_str())?,
            None => {}
        }
        if let Some(field) = &self.field {
            write!(f, "+{}", field)?;
        }
        Ok(())
    }
}
