//! Default atom set: the reusable, model-agnostic steps the kernel
//! injects into phase chains.
//!
//! Atoms communicate exclusively through the context scratch map, under
//! these keys:
//! - `schema_in` / `schema_out`: collected schema summaries
//! - `in_values`: inbound values after alias resolution and defaults
//! - `resolved`: values bound for storage
//! - `paired_raw`: one-time raw secrets, per paired field
//! - `emit`: extra outbound values (one-time secrets)
//! - `refresh`: fields to re-read after a write
//! - `masked`: masked renderings of stored secret digests
//! - `out`: the assembled outbound object
//!
//! Each domain module mirrors one subject family of the registry.

pub mod emit;
pub mod refresh;
pub mod resolve;
pub mod schema;
pub mod storage;
pub mod wire;

use crate::anchor::Anchor;
use crate::error::ConfigError;
use crate::registry::{AtomRegistryBuilder, AtomScope};
use crate::step::sync_atom;

/// Register the full default atom set.
pub(crate) fn register_defaults(b: &mut AtomRegistryBuilder) -> Result<(), ConfigError> {
    use AtomScope::{Model, PerField};

    b.register("schema", "collect_in", Anchor::SchemaCollectIn, Model, sync_atom(schema::collect_in))?;
    b.register("wire", "build_in", Anchor::InValidate, Model, sync_atom(wire::build_in))?;
    b.register("wire", "validate_in", Anchor::InValidate, Model, sync_atom(wire::validate_in))?;
    b.register("resolve", "assemble", Anchor::ResolveValues, Model, sync_atom(resolve::assemble))?;
    b.register("resolve", "paired_gen", Anchor::ResolveValues, PerField, sync_atom(resolve::paired_gen))?;
    b.register("storage", "to_stored", Anchor::PreFlush, PerField, sync_atom(storage::to_stored))?;
    b.register("emit", "paired_pre", Anchor::EmitAliasesPre, Model, sync_atom(emit::paired_pre))?;
    b.register("refresh", "demand", Anchor::PostFlush, Model, sync_atom(refresh::demand))?;
    b.register("emit", "paired_post", Anchor::EmitAliasesPost, Model, sync_atom(emit::paired_post))?;
    b.register("schema", "collect_out", Anchor::SchemaCollectOut, Model, sync_atom(schema::collect_out))?;
    b.register("wire", "build_out", Anchor::OutBuild, Model, sync_atom(wire::build_out))?;
    b.register("emit", "readtime_alias", Anchor::EmitAliasesRead, Model, sync_atom(emit::readtime_alias))?;
    b.register("wire", "dump", Anchor::OutDump, Model, sync_atom(wire::dump))?;
    b.register("out", "masking", Anchor::OutDump, Model, sync_atom(wire::masking))?;
    Ok(())
}
