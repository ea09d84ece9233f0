// ── Write planning ──
//
// Turns a raw viewer request into a typed write plan against a
// controller's current node map. Planning is pure validation: it fails
// whole and early, before anything reaches a device. The instant-cutoff
// command is the one composite case, fanning out over its indexed
// sibling family.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use url::Url;

use fieldgate_proto::{NodeDescriptor, NodeValue};

use crate::connection::NodeMap;
use crate::error::CoreError;

/// Browse name of the composite emergency-cutoff command. A write to
/// this name expands across the `CMD_Instant_Cutoff[i]` family.
pub const CUTOFF_COMMAND: &str = "CMD_Instant_Cutoff";

/// A raw write request as submitted by a viewer.
#[derive(Debug, Clone, Deserialize)]
pub struct WriteRequest {
    /// Endpoint address of the target controller.
    pub controller: Url,
    /// Browse name of the target node, or [`CUTOFF_COMMAND`].
    pub node_name: String,
    /// Untyped value; coerced against the node's declared type.
    pub value: Json,
}

/// Result of one physical node write.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WriteOutcome {
    pub target: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WriteOutcome {
    pub(crate) fn ok(target: &str) -> Self {
        Self {
            target: target.to_owned(),
            ok: true,
            error: None,
        }
    }

    pub(crate) fn failed(target: &str, reason: impl Into<String>) -> Self {
        Self {
            target: target.to_owned(),
            ok: false,
            error: Some(reason.into()),
        }
    }
}

/// Validate `request` against `map` and produce the typed write plan.
///
/// All-or-nothing: any unknown node, shape mismatch, or coercion failure
/// rejects the whole request with zero planned writes.
pub(crate) fn plan_writes(
    map: &NodeMap,
    request: &WriteRequest,
) -> Result<Vec<(NodeDescriptor, NodeValue)>, CoreError> {
    if request.node_name == CUTOFF_COMMAND {
        return plan_cutoff(map, &request.value);
    }

    let Some(descriptor) = map.get(&request.node_name) else {
        return Err(CoreError::validation(format!(
            "unknown node '{}'",
            request.node_name
        )));
    };

    let value = coerce(descriptor, &request.value)?;
    Ok(vec![(descriptor.clone(), value)])
}

fn plan_cutoff(map: &NodeMap, raw: &Json) -> Result<Vec<(NodeDescriptor, NodeValue)>, CoreError> {
    let family = map.indexed_family(CUTOFF_COMMAND);
    if family.is_empty() {
        return Err(CoreError::validation(format!(
            "controller has no '{CUTOFF_COMMAND}' command nodes"
        )));
    }

    let Json::Array(elements) = raw else {
        return Err(CoreError::validation(format!(
            "'{CUTOFF_COMMAND}' takes an array of {} values",
            family.len()
        )));
    };
    if elements.len() != family.len() {
        return Err(CoreError::validation(format!(
            "'{CUTOFF_COMMAND}' expects exactly {} values, got {}",
            family.len(),
            elements.len()
        )));
    }

    family
        .into_iter()
        .zip(elements)
        .map(|(descriptor, element)| {
            let value = coerce(&descriptor, element)?;
            Ok((descriptor, value))
        })
        .collect()
}

fn coerce(descriptor: &NodeDescriptor, raw: &Json) -> Result<NodeValue, CoreError> {
    NodeValue::coerce(descriptor.node_type, raw).map_err(|e| {
        CoreError::validation(format!(
            "cannot write {raw} to '{}' ({:?}): {e}",
            descriptor.name, descriptor.node_type
        ))
    })
}
