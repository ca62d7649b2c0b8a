//! refresh:* atoms: post-flush read-back demands.

use serde_json::{json, Value};

use crate::context::OpContext;
use crate::step::StepResult;

/// refresh:demand@storage:post_flush
///
/// Record which fields carry server-computed values and must be
/// re-read from storage before the outbound object is assembled. The
/// handler (or a post-flush hook) satisfies the demand by updating
/// `ctx.instance`.
pub fn demand(_obj: Option<&Value>, ctx: &mut OpContext, _field: Option<&str>) -> StepResult {
    let hints = {
        let view = ctx.view()?;
        view.refresh_hints.clone()
    };
    if hints.is_empty() {
        return Ok(None);
    }
    ctx.temp.insert("refresh".to_string(), json!(hints));
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opview;
    use crate::specs::{EntityDef, FieldDef, IoSpec, StorageSpec};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn demand_records_refresh_hints() {
        let entity = EntityDef::new("Account").field(
            "id",
            FieldDef::new(IoSpec::new().out_verbs(&["create"]))
                .storage(StorageSpec::new("uuid").primary_key().server_default())
                .refresh_after_write(),
        );
        let view = opview::compile(&entity, "create").unwrap();
        let mut ctx =
            OpContext::new("Account", "create", json!({})).with_opview(Arc::new(view));
        demand(None, &mut ctx, None).unwrap();
        assert_eq!(ctx.temp["refresh"], json!(["id"]));
    }

    #[test]
    fn no_hints_leaves_scratch_untouched() {
        let entity = EntityDef::new("Account").field(
            "name",
            FieldDef::new(IoSpec::new().out_verbs(&["read"]))
                .storage(StorageSpec::new("string")),
        );
        let view = opview::compile(&entity, "read").unwrap();
        let mut ctx =
            OpContext::new("Account", "read", json!({})).with_opview(Arc::new(view));
        demand(None, &mut ctx, None).unwrap();
        assert!(!ctx.temp.contains_key("refresh"));
    }
}
