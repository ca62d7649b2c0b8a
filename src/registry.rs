//! Atom registry: `(domain, subject) -> (anchor, scope, runner)`.
//!
//! Explicitly constructed and dependency-injected: registration happens
//! through the builder at startup, then `build()` freezes the snapshot.
//! Duplicate keys and unresolvable anchor names are fatal configuration
//! errors, surfaced at build time and never retried.

use tracing::debug;

use crate::anchor::Anchor;
use crate::error::ConfigError;
use crate::label::Label;
use crate::step::AtomRun;

/// Atom instantiation scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomScope {
    /// One instance regardless of field count.
    Model,
    /// One instance per field participating in the operation alias.
    PerField,
}

/// One registered atom.
pub struct AtomEntry {
    pub domain: String,
    pub subject: String,
    pub anchor: Anchor,
    pub scope: AtomScope,
    pub run: AtomRun,
}

impl AtomEntry {
    /// `domain:subject` token used by ordering edges.
    pub fn token(&self) -> String {
        format!("{}:{}", self.domain, self.subject)
    }

    pub fn label(&self, field: Option<&str>) -> Label {
        match field {
            Some(f) => Label::atom_field(&self.domain, &self.subject, self.anchor, f),
            None => Label::atom(&self.domain, &self.subject, self.anchor),
        }
    }
}

/// Registration API. Consumed by [`AtomRegistryBuilder::build`].
#[derive(Default)]
pub struct AtomRegistryBuilder {
    entries: Vec<AtomEntry>,
}

impl AtomRegistryBuilder {
    pub fn new() -> Self {
        AtomRegistryBuilder::default()
    }

    pub fn register(
        &mut self,
        domain: &str,
        subject: &str,
        anchor: Anchor,
        scope: AtomScope,
        run: AtomRun,
    ) -> Result<(), ConfigError> {
        if self.entries.iter().any(|e| e.domain == domain && e.subject == subject) {
            return Err(ConfigError::DuplicateAtom {
                domain: domain.to_string(),
                subject: subject.to_string(),
            });
        }
        self.entries.push(AtomEntry {
            domain: domain.to_string(),
            subject: subject.to_string(),
            anchor,
            scope,
            run,
        });
        Ok(())
    }

    /// Registration by wire anchor name, for callers wiring atoms from
    /// declarative config.
    pub fn register_named(
        &mut self,
        domain: &str,
        subject: &str,
        anchor: &str,
        scope: AtomScope,
        run: AtomRun,
    ) -> Result<(), ConfigError> {
        let anchor =
            Anchor::parse(anchor).ok_or_else(|| ConfigError::UnknownAnchor(anchor.to_string()))?;
        self.register(domain, subject, anchor, scope, run)
    }

    /// Freeze the snapshot. The registry is immutable afterwards.
    pub fn build(self) -> AtomRegistry {
        debug!(count = self.entries.len(), "atom registry frozen");
        AtomRegistry { entries: self.entries }
    }
}

/// Immutable-after-build atom snapshot, shared process-wide.
pub struct AtomRegistry {
    entries: Vec<AtomEntry>,
}

impl AtomRegistry {
    pub fn entries(&self) -> &[AtomEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registry preloaded with the default atom set (schema, wire,
    /// resolve, storage, refresh, emit, out domains).
    pub fn with_defaults() -> Self {
        let mut builder = AtomRegistryBuilder::new();
        crate::atoms::register_defaults(&mut builder)
            .expect("default atom set registers cleanly");
        builder.build()
    }
}
