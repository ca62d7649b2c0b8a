//! emit:* atoms: one-time secret exposure and read-time masking.
//!
//! The raw secret leaves the kernel exactly once, on the operation that
//! generated it. Every later read sees only the masked stored digest.

use serde_json::{json, Value};

use crate::context::OpContext;
use crate::step::StepResult;

/// emit:paired_pre@emit:aliases_pre
///
/// Move each generated raw secret into the emit map under its outbound
/// alias, before the flush boundary.
pub fn paired_pre(_obj: Option<&Value>, ctx: &mut OpContext, _field: Option<&str>) -> StepResult {
    let Some(Value::Object(raw)) = ctx.temp.get("paired_raw").cloned() else {
        return Ok(None);
    };
    let entries: Vec<(String, Value)> = {
        let view = ctx.view()?;
        raw.into_iter()
            .map(|(field, value)| {
                let key = view
                    .paired_index
                    .get(&field)
                    .and_then(|p| p.alias.clone())
                    .unwrap_or(field);
                (key, value)
            })
            .collect()
    };
    let emit = ctx.temp_object("emit");
    for (key, value) in entries {
        emit.insert(key, value);
    }
    Ok(None)
}

/// emit:paired_post@emit:aliases_post
///
/// Compute the masked rendering of each paired field's stored value,
/// after the flush has landed it.
pub fn paired_post(_obj: Option<&Value>, ctx: &mut OpContext, _field: Option<&str>) -> StepResult {
    let masked: Vec<(String, String)> = {
        let view = ctx.view()?;
        let Some(resolved) = ctx.temp.get("resolved") else {
            return Ok(None);
        };
        view.paired_index
            .iter()
            .filter_map(|(field, paired)| {
                let stored = resolved.get(field)?.as_str()?;
                Some((field.clone(), mask(stored, paired.mask_last)))
            })
            .collect()
    };
    if masked.is_empty() {
        return Ok(None);
    }
    let map = ctx.temp_object("masked");
    for (field, rendering) in masked {
        map.insert(field, json!(rendering));
    }
    Ok(None)
}

/// emit:readtime_alias@emit:aliases_read
///
/// Merge the emit map into the assembled outbound object. Emitted
/// values win over assembled ones.
pub fn readtime_alias(_obj: Option<&Value>, ctx: &mut OpContext, _field: Option<&str>) -> StepResult {
    let Some(Value::Object(emit)) = ctx.temp.get("emit").cloned() else {
        return Ok(None);
    };
    let out = ctx.temp_object("out");
    for (key, value) in emit {
        out.insert(key, value);
    }
    Ok(None)
}

/// Replace all but the last `keep` characters with asterisks.
fn mask(value: &str, keep: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= keep {
        return "*".repeat(chars.len());
    }
    let visible: String = chars[chars.len() - keep..].iter().collect();
    format!("{}{}", "*".repeat(chars.len() - keep), visible)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opview;
    use crate::specs::{EntityDef, FieldDef, IoSpec, PairedSpec, StorageSpec};
    use serde_json::json;
    use std::sync::Arc;

    fn paired_entity() -> EntityDef {
        EntityDef::new("ApiKey").field(
            "digest",
            FieldDef::new(IoSpec::new().out_verbs(&["create"]).paired(PairedSpec {
                verbs: vec!["create".into()],
                alias: Some("api_key".into()),
                gen: Arc::new(|| "raw-secret".to_string()),
                store: Arc::new(|v| json!(format!("digest({})", v.as_str().unwrap_or("")))),
                mask_last: 4,
            }))
            .storage(StorageSpec::new("string")),
        )
    }

    fn ctx() -> OpContext {
        let view = opview::compile(&paired_entity(), "create").unwrap();
        OpContext::new("ApiKey", "create", json!({})).with_opview(Arc::new(view))
    }

    #[test]
    fn paired_pre_exposes_raw_under_alias() {
        let mut ctx = ctx();
        ctx.temp.insert("paired_raw".into(), json!({"digest": "raw-secret"}));
        paired_pre(None, &mut ctx, None).unwrap();
        assert_eq!(ctx.temp["emit"], json!({"api_key": "raw-secret"}));
    }

    #[test]
    fn paired_post_masks_stored_digest() {
        let mut ctx = ctx();
        ctx.temp.insert("resolved".into(), json!({"digest": "digest(raw-secret)"}));
        paired_post(None, &mut ctx, None).unwrap();
        let masked = ctx.temp["masked"]["digest"].as_str().unwrap();
        assert!(masked.ends_with("ret)"));
        assert!(masked.starts_with("****"));
        assert_eq!(masked.chars().count(), "digest(raw-secret)".chars().count());
    }

    #[test]
    fn readtime_alias_merges_emit_over_out() {
        let mut ctx = ctx();
        ctx.temp.insert("out".into(), json!({"name": "k1", "api_key": "old"}));
        ctx.temp.insert("emit".into(), json!({"api_key": "raw-secret"}));
        readtime_alias(None, &mut ctx, None).unwrap();
        assert_eq!(ctx.temp["out"], json!({"name": "k1", "api_key": "raw-secret"}));
    }

    #[test]
    fn mask_short_values_entirely() {
        assert_eq!(mask("abc", 4), "***");
        assert_eq!(mask("abcdef", 4), "**cdef");
    }
}
