//! Wire types for the Service Usage v1 REST API.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::operation::{Operation, OperationOutcome};

/// Body of `services:batchEnable`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct BatchEnableRequest<'a> {
    pub(super) service_ids: &'a [String],
}

/// `google.longrunning.Operation` as returned by the REST API.
#[derive(Debug, Deserialize)]
pub(super) struct OperationResource {
    pub(super) name: String,
    #[serde(default)]
    pub(super) done: bool,
    #[serde(default)]
    pub(super) metadata: Option<Value>,
    #[serde(default)]
    pub(super) response: Option<Value>,
    #[serde(default)]
    pub(super) error: Option<StatusResource>,
}

/// `google.rpc.Status`.
#[derive(Debug, Deserialize)]
pub(super) struct StatusResource {
    #[serde(default)]
    pub(super) code: i32,
    #[serde(default)]
    pub(super) message: String,
}

/// Error envelope returned with non-2xx responses.
#[derive(Debug, Deserialize)]
pub(super) struct ErrorEnvelope {
    pub(super) error: StatusResource,
}

impl From<OperationResource> for Operation {
    fn from(value: OperationResource) -> Self {
        let result = match (value.error, value.response) {
            (Some(status), _) => Some(OperationOutcome::Error {
                code: status.code,
                message: status.message,
            }),
            (None, Some(response)) => Some(OperationOutcome::Response(response)),
            (None, None) => None,
        };
        Self {
            name: value.name,
            done: value.done,
            metadata: value.metadata,
            result,
        }
    }
}
