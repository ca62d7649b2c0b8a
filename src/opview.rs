//! OpView compiler: per-(entity, alias) field metadata.
//!
//! Compiled once per (entity-type, operation-alias) pair and cached by
//! the kernel; atoms consume the view to build, validate, and transform
//! payloads without touching the raw declarations. Compilation has no
//! recoverable failure mode other than an unsupported primary-key type,
//! which raises a typed `ConfigError` instead of silently dropping the
//! field.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::error::ConfigError;
use crate::specs::{EntityDef, SecretGen, ValueFactory, ValueTransform};

/// Primary-key storage types the schema layer knows how to key on.
const SUPPORTED_KEY_TYPES: &[&str] = &["uuid", "string", "str", "int", "integer", "i64", "u64"];

/// Inbound view of one field.
#[derive(Clone)]
pub struct InField {
    pub name: String,
    pub required: bool,
    pub nullable: bool,
    /// No backing storage column.
    pub virtual_field: bool,
    pub alias_in: Option<String>,
    pub default_factory: Option<ValueFactory>,
    pub max_length: Option<usize>,
}

/// Outbound view of one field.
#[derive(Clone)]
pub struct OutField {
    pub name: String,
    pub alias_out: Option<String>,
    pub virtual_field: bool,
    pub type_name: Option<String>,
}

/// Paired-secret entry: generator, store transform, masking rule.
#[derive(Clone)]
pub struct PairedView {
    pub alias: Option<String>,
    pub gen: SecretGen,
    pub store: ValueTransform,
    pub mask_last: usize,
    pub max_length: Option<usize>,
}

/// Compiled, read-only metadata for one (entity-type, alias) pair.
#[derive(Clone, Default)]
pub struct OpView {
    /// Inbound fields, ordered by name.
    pub schema_in: Vec<InField>,
    /// Outbound fields, ordered by name.
    pub schema_out: Vec<OutField>,
    /// Outbound field names actually exposed to callers.
    pub expose: Vec<String>,
    pub paired_index: BTreeMap<String, PairedView>,
    pub virtual_producers: BTreeMap<String, ValueTransform>,
    pub to_stored_transforms: BTreeMap<String, ValueTransform>,
    /// Fields that must be re-read from storage after a write.
    pub refresh_hints: Vec<String>,
}

impl OpView {
    pub fn in_field(&self, name: &str) -> Option<&InField> {
        self.schema_in.iter().find(|f| f.name == name)
    }

    pub fn out_field(&self, name: &str) -> Option<&OutField> {
        self.schema_out.iter().find(|f| f.name == name)
    }

    /// Inbound field names in schema order.
    pub fn in_names(&self) -> impl Iterator<Item = &str> {
        self.schema_in.iter().map(|f| f.name.as_str())
    }

    /// Summary used by the schema:collect_in atom.
    pub fn schema_in_summary(&self) -> Value {
        let fields: Vec<Value> = self
            .schema_in
            .iter()
            .map(|f| {
                json!({
                    "name": f.name,
                    "required": f.required,
                    "nullable": f.nullable,
                    "virtual": f.virtual_field,
                    "alias_in": f.alias_in,
                    "max_length": f.max_length,
                })
            })
            .collect();
        let required: Vec<&str> =
            self.schema_in.iter().filter(|f| f.required).map(|f| f.name.as_str()).collect();
        let optional: Vec<&str> =
            self.schema_in.iter().filter(|f| !f.required).map(|f| f.name.as_str()).collect();
        json!({
            "fields": fields,
            "required": required,
            "optional": optional,
            "order": self.in_names().collect::<Vec<_>>(),
        })
    }

    /// Summary used by the schema:collect_out atom.
    pub fn schema_out_summary(&self) -> Value {
        let fields: Vec<Value> = self
            .schema_out
            .iter()
            .map(|f| {
                json!({
                    "name": f.name,
                    "virtual": f.virtual_field,
                    "alias_out": f.alias_out,
                    "type": f.type_name,
                })
            })
            .collect();
        json!({ "fields": fields, "expose": self.expose })
    }
}

/// Compile the view for one (entity, alias) pair.
pub fn compile(entity: &EntityDef, alias: &str) -> Result<OpView, ConfigError> {
    let mut view = OpView::default();

    for (name, field) in &entity.fields {
        let storage = field.storage.as_ref();

        if let Some(s) = storage {
            if s.primary_key && !SUPPORTED_KEY_TYPES.contains(&s.type_name.as_str()) {
                return Err(ConfigError::UnsupportedKeyType {
                    field: name.clone(),
                    ty: s.type_name.clone(),
                });
            }
        }

        if field.io.in_verbs.iter().any(|v| v == alias) {
            let required = field.required_in.iter().any(|v| v == alias);
            view.schema_in.push(InField {
                name: name.clone(),
                required,
                nullable: storage.map(|s| s.nullable).unwrap_or(true),
                virtual_field: storage.is_none(),
                alias_in: field.io.alias_in.clone(),
                default_factory: field.default_factory.clone(),
                max_length: field.max_length,
            });
            if let Some(t) = &field.to_stored {
                view.to_stored_transforms.insert(name.clone(), t.clone());
            }
        }

        if field.io.out_verbs.iter().any(|v| v == alias) {
            view.schema_out.push(OutField {
                name: name.clone(),
                alias_out: field.io.alias_out.clone(),
                virtual_field: storage.is_none(),
                type_name: field.type_name.clone(),
            });
            view.expose.push(name.clone());
            if let Some(p) = &field.virtual_producer {
                if storage.is_none() {
                    view.virtual_producers.insert(name.clone(), p.clone());
                }
            }
            if field.refresh_after_write {
                view.refresh_hints.push(name.clone());
            }
        }

        if let Some(paired) = &field.io.paired {
            if paired.verbs.iter().any(|v| v == alias) {
                view.paired_index.insert(
                    name.clone(),
                    PairedView {
                        alias: paired.alias.clone(),
                        gen: paired.gen.clone(),
                        store: paired.store.clone(),
                        mask_last: paired.mask_last,
                        max_length: field.max_length,
                    },
                );
            }
        }
    }

    // BTreeMap iteration already gave us name order; keep expose sorted
    // to match schema_out.
    view.expose.sort();
    Ok(view)
}
