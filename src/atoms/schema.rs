//! schema:* atoms: collect vendor-neutral schema descriptions so the
//! wire atoms can build and validate without touching declarations.

use serde_json::Value;
use tracing::debug;

use crate::context::OpContext;
use crate::step::StepResult;

/// schema:collect_in@schema:collect_in
///
/// Collect the inbound schema summary into `temp["schema_in"]`. Runs at
/// the very beginning of the lifecycle, before in-model build and
/// validation; a pre-populated summary is respected.
pub fn collect_in(_obj: Option<&Value>, ctx: &mut OpContext, _field: Option<&str>) -> StepResult {
    if ctx.temp.contains_key("schema_in") {
        debug!("schema_in already populated; skipping");
        return Ok(None);
    }
    let summary = ctx.view()?.schema_in_summary();
    ctx.temp.insert("schema_in".to_string(), summary);
    Ok(None)
}

/// schema:collect_out@schema:collect_out
///
/// Collect the outbound schema summary into `temp["schema_out"]`.
pub fn collect_out(_obj: Option<&Value>, ctx: &mut OpContext, _field: Option<&str>) -> StepResult {
    if ctx.temp.contains_key("schema_out") {
        return Ok(None);
    }
    let summary = ctx.view()?.schema_out_summary();
    ctx.temp.insert("schema_out".to_string(), summary);
    Ok(None)
}
