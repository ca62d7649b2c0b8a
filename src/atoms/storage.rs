//! storage:* atoms: shape resolved values right before they reach the
//! transactional resource.

use serde_json::Value;

use crate::context::OpContext;
use crate::step::StepResult;

/// storage:to_stored@storage:pre_flush (per-field)
///
/// Apply the field's declared storage transform to its resolved value,
/// in place. Fields without a transform, or without a resolved value,
/// are untouched.
pub fn to_stored(_obj: Option<&Value>, ctx: &mut OpContext, field: Option<&str>) -> StepResult {
    let Some(field) = field else {
        return Ok(None);
    };
    let transformed = {
        let view = ctx.view()?;
        let Some(transform) = view.to_stored_transforms.get(field) else {
            return Ok(None);
        };
        match ctx.temp.get("resolved").and_then(|r| r.get(field)) {
            Some(value) => transform(value),
            None => return Ok(None),
        }
    };
    if let Some(Value::Object(resolved)) = ctx.temp.get_mut("resolved") {
        resolved.insert(field.to_string(), transformed);
    }
    Ok(None)
}
