//! wire:* atoms: build and validate the inbound model, assemble and
//! dump the outbound one.

use serde_json::{Map, Value};

use crate::context::OpContext;
use crate::error::{FieldIssue, StepError};
use crate::step::StepResult;

/// wire:build_in@wire:in_validate
///
/// Construct `temp["in_values"]` from the raw payload: resolve inbound
/// aliases to field names and fill absent fields from their default
/// factories. Unknown payload keys are ignored here; validation decides
/// what is an error.
pub fn build_in(_obj: Option<&Value>, ctx: &mut OpContext, _field: Option<&str>) -> StepResult {
    let view = ctx.view()?;
    let mut values = Map::new();
    for field in &view.schema_in {
        let from_payload = ctx
            .payload
            .get(&field.name)
            .or_else(|| field.alias_in.as_deref().and_then(|a| ctx.payload.get(a)));
        match from_payload {
            Some(v) => {
                values.insert(field.name.clone(), v.clone());
            }
            None => {
                if let Some(factory) = &field.default_factory {
                    values.insert(field.name.clone(), factory());
                }
            }
        }
    }
    ctx.temp.insert("in_values".to_string(), Value::Object(values));
    Ok(None)
}

/// wire:validate_in@wire:in_validate
///
/// Enforce required-ness, nullability, and max length against
/// `temp["in_values"]`. Fails with structured field-level detail.
pub fn validate_in(_obj: Option<&Value>, ctx: &mut OpContext, _field: Option<&str>) -> StepResult {
    let view = ctx.view()?;
    let empty = Value::Object(Map::new());
    let values = ctx.temp.get("in_values").unwrap_or(&empty);

    let mut issues: Vec<FieldIssue> = Vec::new();
    for field in &view.schema_in {
        match values.get(&field.name) {
            None => {
                if field.required {
                    issues.push(FieldIssue::new(&field.name, "required field is missing"));
                }
            }
            Some(Value::Null) => {
                if !field.nullable {
                    issues.push(FieldIssue::new(&field.name, "field is not nullable"));
                }
            }
            Some(Value::String(s)) => {
                if let Some(max) = field.max_length {
                    if s.chars().count() > max {
                        issues.push(FieldIssue::new(
                            &field.name,
                            format!("exceeds max length {}", max),
                        ));
                    }
                }
            }
            Some(_) => {}
        }
    }

    if issues.is_empty() {
        Ok(None)
    } else {
        Err(StepError::validation(
            format!("{} invalid field(s) for {}.{}", issues.len(), ctx.entity, ctx.alias),
            issues,
        ))
    }
}

/// wire:build_out@wire:out_build
///
/// Assemble `temp["out"]` from the entity instance (when present) or
/// the resolved values, restricted to the exposed outbound fields, with
/// outbound aliases applied and virtual producers invoked for fields
/// the source lacks.
pub fn build_out(_obj: Option<&Value>, ctx: &mut OpContext, _field: Option<&str>) -> StepResult {
    let view = ctx.view()?;
    let empty = Value::Object(Map::new());
    let source = ctx
        .instance
        .as_ref()
        .or_else(|| ctx.temp.get("resolved"))
        .unwrap_or(&empty);

    let mut out = Map::new();
    for field in &view.schema_out {
        if !view.expose.iter().any(|e| e == &field.name) {
            continue;
        }
        let key = field.alias_out.clone().unwrap_or_else(|| field.name.clone());
        if let Some(v) = source.get(&field.name) {
            out.insert(key, v.clone());
        } else if let Some(producer) = view.virtual_producers.get(&field.name) {
            out.insert(key, producer(source));
        }
    }
    ctx.temp.insert("out".to_string(), Value::Object(out));
    Ok(None)
}

/// wire:dump@wire:out_dump
///
/// Publish the assembled outbound object as the step result; the
/// executor records it as the invocation result.
pub fn dump(_obj: Option<&Value>, ctx: &mut OpContext, _field: Option<&str>) -> StepResult {
    Ok(ctx.temp.get("out").cloned())
}

/// out:masking@wire:out_dump
///
/// Overlay masked renderings of stored secret digests onto the dumped
/// result, so raw digests never leave the kernel.
pub fn masking(_obj: Option<&Value>, ctx: &mut OpContext, _field: Option<&str>) -> StepResult {
    let Some(Value::Object(masked)) = ctx.temp.get("masked").cloned() else {
        return Ok(None);
    };
    let keys: Vec<(String, Value)> = {
        let view = ctx.view()?;
        masked
            .into_iter()
            .map(|(field, v)| {
                let key = view
                    .out_field(&field)
                    .and_then(|f| f.alias_out.clone())
                    .unwrap_or(field);
                (key, v)
            })
            .collect()
    };
    if let Some(Value::Object(result)) = ctx.result.as_mut() {
        let mut touched = false;
        for (key, v) in keys {
            if result.contains_key(&key) {
                result.insert(key, v);
                touched = true;
            }
        }
        if touched {
            return Ok(ctx.result.clone());
        }
    }
    Ok(None)
}
