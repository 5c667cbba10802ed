//! Shared wire/persistence types and the error sum type used across every
//! Koor crate.
//!
//! A leaf crate with no business logic: only `Serialize + Deserialize`
//! structs that every other crate (and the daemon's JSON API) agrees on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// The one error type every Koor crate returns. Avoid matching on display
/// strings anywhere above the persistence layer — match on the variant.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("contract malformed: {0}")]
    ContractMalformed(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn invalid(what: impl Into<String>) -> Self {
        Error::InvalidInput(what.into())
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Error::NotFound("row not found".to_string()),
            other => Error::Internal(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidInput(format!("bad json: {e}"))
    }
}

// ---------------------------------------------------------------------------
// State store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEntry {
    pub key: String,
    #[serde(with = "hex_bytes")]
    pub value: Vec<u8>,
    pub version: i64,
    pub hash: String,
    pub content_type: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

/// `List()` returns summaries — same shape minus `value`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSummary {
    pub key: String,
    pub version: i64,
    pub hash: String,
    pub content_type: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub key: String,
    #[serde(with = "hex_bytes")]
    pub value: Vec<u8>,
    pub version: i64,
    pub hash: String,
    pub content_type: String,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffKind {
    Added,
    Removed,
    Changed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffEntry {
    pub path: String,
    pub kind: DiffKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<serde_json::Value>,
}

/// Wire encoding for opaque byte blobs: hex, so JSON stays human-legible for
/// the (usually-JSON) payloads agents actually store.
mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> std::result::Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Spec registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Spec {
    pub project: String,
    pub name: String,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
    pub version: i64,
    pub hash: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecSummary {
    pub project: String,
    pub name: String,
    pub version: i64,
    pub hash: String,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Event bus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub topic: String,
    pub data: serde_json::Value,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Instance registry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Pending,
    Active,
    Stale,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Pending => "pending",
            InstanceStatus::Active => "active",
            InstanceStatus::Stale => "stale",
        }
    }
}

impl std::str::FromStr for InstanceStatus {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(InstanceStatus::Pending),
            "active" => Ok(InstanceStatus::Active),
            "stale" => Ok(InstanceStatus::Stale),
            other => Err(Error::InvalidInput(format!(
                "unknown instance status {other}"
            ))),
        }
    }
}

/// Registered agent. `token` is minted at `Register` and never re-shown by
/// `Get`/`List`/`Discover` (see `koor_instances::registry`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: Uuid,
    pub name: String,
    pub workspace: String,
    pub intent: String,
    pub stack: String,
    pub capabilities: Vec<String>,
    pub status: InstanceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<Uuid>,
    pub registered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Lint rule engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Error
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Regex,
    Missing,
    Custom,
}

impl Default for MatchType {
    fn default() -> Self {
        MatchType::Regex
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSource {
    Local,
    Learned,
    External,
}

impl Default for RuleSource {
    fn default() -> Self {
        RuleSource::Local
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    Proposed,
    Accepted,
    Rejected,
}

impl Default for RuleStatus {
    fn default() -> Self {
        RuleStatus::Accepted
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LintRule {
    pub project: String,
    pub rule_id: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub match_type: MatchType,
    pub pattern: String,
    pub message: String,
    #[serde(default = "default_applies_to")]
    pub applies_to: Vec<String>,
    #[serde(default)]
    pub stack: String,
    #[serde(default)]
    pub source: RuleSource,
    #[serde(default)]
    pub status: RuleStatus,
    #[serde(default)]
    pub proposed_by: String,
    #[serde(default)]
    pub context: String,
}

pub fn default_applies_to() -> Vec<String> {
    vec!["*".to_string()]
}

pub const GLOBAL_PROJECT: &str = "_global";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub rule_id: String,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    pub matched: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LintRequest {
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub stack: String,
}

// ---------------------------------------------------------------------------
// Contract validator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Object,
    Array,
    #[default]
    #[serde(rename = "")]
    Unspecified,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Field {
    #[serde(default)]
    pub r#type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub r#enum: Vec<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, Field>,
    #[serde(default)]
    pub items: Option<Box<Field>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Endpoint {
    #[serde(default)]
    pub query: BTreeMap<String, Field>,
    #[serde(default)]
    pub request: BTreeMap<String, Field>,
    #[serde(default)]
    pub response: BTreeMap<String, Field>,
    #[serde(default)]
    pub response_array: BTreeMap<String, Field>,
    #[serde(default)]
    pub error: BTreeMap<String, Field>,
    #[serde(default)]
    pub response_status: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contract {
    pub kind: String,
    pub version: i64,
    pub endpoints: BTreeMap<String, Endpoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
    Query,
    Error,
}

// ---------------------------------------------------------------------------
// Compliance scheduler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceRun {
    pub id: i64,
    pub instance_id: Uuid,
    pub project: String,
    pub contract_name: String,
    pub pass: bool,
    pub violations: serde_json::Value,
    pub run_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Webhooks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Webhook {
    pub id: i64,
    pub url: String,
    pub patterns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_fired: Option<DateTime<Utc>>,
    pub fail_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub topic: String,
    pub data: serde_json::Value,
    pub source: String,
    pub event_id: i64,
    pub created_at: DateTime<Utc>,
}
