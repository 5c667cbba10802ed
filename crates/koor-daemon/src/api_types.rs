//! Request and response types for every koor-daemon HTTP endpoint.
//!
//! These are the only types Axum (de)serializes at the boundary; handlers
//! translate them into calls against the domain crates and back.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: &'static str,
    pub version: &'static str,
}

/// Response body when the daemon refuses a route outright (missing/invalid
/// bearer token).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateRefusedResponse {
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ---------------------------------------------------------------------------
// State store
// ---------------------------------------------------------------------------

/// `value` is a hex-encoded byte string, matching `koor_schemas`'s wire
/// encoding for opaque blobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutStateRequest {
    pub value: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
    #[serde(default = "default_updated_by")]
    pub updated_by: String,
}

fn default_content_type() -> String {
    "application/octet-stream".to_string()
}

fn default_updated_by() -> String {
    "api".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: i64,
}

fn default_history_limit() -> i64 {
    50
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiffQuery {
    pub v1: i64,
    pub v2: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RollbackRequest {
    #[serde(default = "default_updated_by")]
    pub updated_by: String,
}

// ---------------------------------------------------------------------------
// Specs
// ---------------------------------------------------------------------------

/// `data` is a hex-encoded byte string (same wire encoding as state values).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutSpecRequest {
    pub data: String,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct PublishRequest {
    pub topic: String,
    pub data: serde_json::Value,
    pub source: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventHistoryQuery {
    #[serde(default = "default_event_limit")]
    pub limit: i64,
    pub topic: Option<String>,
}

fn default_event_limit() -> i64 {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventHistoryRangeQuery {
    pub since: chrono::DateTime<chrono::Utc>,
    pub until: chrono::DateTime<chrono::Utc>,
    pub source: Option<String>,
    pub topic: Option<String>,
    #[serde(default = "default_event_limit")]
    pub last: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamQuery {
    #[serde(default = "default_pattern")]
    pub pattern: String,
}

fn default_pattern() -> String {
    "*".to_string()
}

// ---------------------------------------------------------------------------
// Instances
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterInstanceRequest {
    pub name: String,
    #[serde(default)]
    pub workspace: String,
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub stack: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverQuery {
    pub name: Option<String>,
    pub workspace: Option<String>,
    pub stack: Option<String>,
    #[serde(default)]
    pub capability: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetIntentRequest {
    pub intent: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetCapabilitiesRequest {
    pub capabilities: Vec<String>,
}

// ---------------------------------------------------------------------------
// Lint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct PutRulesRequest {
    pub rules: Vec<koor_schemas::LintRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportRulesRequest {
    pub rules: Vec<koor_schemas::LintRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportRulesQuery {
    /// Comma-separated rule sources, e.g. `"local,learned"`. Defaults to
    /// `{local, learned}` per spec.md §4.8 when omitted.
    pub sources: Option<String>,
}

// ---------------------------------------------------------------------------
// Contracts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ValidateContractRequest {
    pub project: String,
    pub contract: String,
    pub endpoint: String,
    pub direction: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidateContractResponse {
    pub violations: Vec<koor_contracts::ContractViolation>,
}

// ---------------------------------------------------------------------------
// Compliance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ComplianceHistoryQuery {
    pub instance_id: Option<uuid::Uuid>,
    #[serde(default = "default_event_limit")]
    pub limit: i64,
}

// ---------------------------------------------------------------------------
// Webhooks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CreateWebhookRequest {
    pub url: String,
    pub patterns: Vec<String>,
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestFireResponse {
    pub delivered: bool,
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct PutTemplateRequest {
    pub data: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct IncrementMetricRequest {
    pub metric: String,
    #[serde(default = "default_increment_by")]
    pub by: i64,
}

fn default_increment_by() -> i64 {
    1
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricEntry {
    pub metric: String,
    pub count: i64,
}

// ---------------------------------------------------------------------------
// Audit log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AuditHistoryQuery {
    #[serde(default = "default_event_limit")]
    pub limit: i64,
}
