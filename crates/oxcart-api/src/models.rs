//! Shared HTTP DTOs for the Oxcart public API.
//!
//! Domain types (`OrchestrationInstance`, `AggregateResult`) already carry
//! camelCase wire names and are serialised directly; the types here cover
//! the request/acknowledgement envelope and problem documents.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// RFC9457-compatible problem document surfaced on validation/runtime errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    /// Problem type URI.
    #[serde(rename = "type")]
    pub kind: String,
    /// Short human-readable summary.
    pub title: String,
    /// HTTP status code duplicated into the body.
    pub status: u16,
    /// Occurrence-specific detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Per-field validation failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_params: Option<Vec<ProblemInvalidParam>>,
}

/// Invalid parameter pointer surfaced alongside a [`ProblemDetails`] payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemInvalidParam {
    /// JSON pointer to the offending field.
    pub pointer: String,
    /// Why the field was rejected.
    pub message: String,
}

/// Body of `POST /orchestrations`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StartArchiveRequest {
    /// Root of the directory tree to archive.
    pub root_path: PathBuf,
}

/// Acknowledgement returned when a request is accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StartArchiveResponse {
    /// Identifier of the accepted instance.
    pub instance_id: Uuid,
    /// Relative URI the caller polls for status.
    pub status_query_uri: String,
}

/// Query parameters accepted by `GET /orchestrations`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceListParams {
    /// Keep only instances in this status (lowercase).
    pub status: Option<String>,
    /// Keep only instances started strictly after this time.
    pub started_after: Option<DateTime<Utc>>,
    /// Keep only instances started strictly before this time.
    pub started_before: Option<DateTime<Utc>>,
}
