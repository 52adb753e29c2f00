//! JSON Schema validation for persisted plan/results/verdict documents.

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde::Serialize;
use serde_json::Value;

use crate::io::artifacts::ArtifactKind;

const PLAN_SCHEMA: &str = include_str!("../../schemas/plan.schema.json");
const RESULTS_SCHEMA: &str = include_str!("../../schemas/results.schema.json");
const VERDICT_SCHEMA: &str = include_str!("../../schemas/verdict.schema.json");

fn schema_source(kind: ArtifactKind) -> Option<&'static str> {
    match kind {
        ArtifactKind::Plan => Some(PLAN_SCHEMA),
        ArtifactKind::Results => Some(RESULTS_SCHEMA),
        ArtifactKind::Verdict => Some(VERDICT_SCHEMA),
        ArtifactKind::Context => None,
    }
}

/// Validate the serialized form of `data`; returns one message per violation.
///
/// Kinds without a schema always validate.
pub fn schema_violations<T: Serialize>(kind: ArtifactKind, data: &T) -> Result<Vec<String>> {
    let Some(source) = schema_source(kind) else {
        return Ok(Vec::new());
    };
    let schema: Value = serde_json::from_str(source)
        .with_context(|| format!("parse {} schema", kind.name()))?;
    let compiled = validator_for(&schema)
        .map_err(|err| anyhow!("invalid {} schema: {}", kind.name(), err))?;
    let instance =
        serde_json::to_value(data).with_context(|| format!("serialize {}", kind.name()))?;
    Ok(compiled
        .iter_errors(&instance)
        .map(|err| err.to_string())
        .collect())
}
