//! resolve:* atoms: bind validated inbound values for storage and
//! generate paired one-time secrets.

use serde_json::{json, Map, Value};

use crate::context::OpContext;
use crate::step::StepResult;

/// resolve:assemble@resolve:values
///
/// Seed `temp["resolved"]` from the validated inbound values. Later
/// anchors mutate the resolved map in place; the inbound snapshot stays
/// untouched for error reporting.
pub fn assemble(_obj: Option<&Value>, ctx: &mut OpContext, _field: Option<&str>) -> StepResult {
    let resolved = ctx
        .temp
        .get("in_values")
        .cloned()
        .unwrap_or_else(|| Value::Object(Map::new()));
    ctx.temp.insert("resolved".to_string(), resolved);
    Ok(None)
}

/// resolve:paired_gen@resolve:values (per-field)
///
/// For a paired field: generate the raw secret, stash it under
/// `temp["paired_raw"][field]`, and place the store transform of the
/// raw into the resolved map. No-op for unpaired fields.
pub fn paired_gen(_obj: Option<&Value>, ctx: &mut OpContext, field: Option<&str>) -> StepResult {
    let Some(field) = field else {
        return Ok(None);
    };
    let (raw, stored) = {
        let view = ctx.view()?;
        let Some(paired) = view.paired_index.get(field) else {
            return Ok(None);
        };
        let raw = (paired.gen)();
        let stored = (paired.store)(&json!(raw));
        (raw, stored)
    };
    let field = field.to_string();
    ctx.temp_object("paired_raw").insert(field.clone(), json!(raw));
    if let Some(Value::Object(resolved)) = ctx.temp.get_mut("resolved") {
        resolved.insert(field, stored);
    } else {
        let mut map = Map::new();
        map.insert(field, stored);
        ctx.temp.insert("resolved".to_string(), Value::Object(map));
    }
    Ok(None)
}
