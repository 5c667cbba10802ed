//! Axum router and all HTTP handlers for koor-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. All handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.

use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use koor_schemas::{Direction, Error, LintRequest};
use uuid::Uuid;

use crate::{
    api_types::{
        AuditHistoryQuery, ComplianceHistoryQuery, CreateWebhookRequest, DiffQuery,
        DiscoverQuery, ErrorResponse, EventHistoryQuery, EventHistoryRangeQuery,
        ExportRulesQuery, GateRefusedResponse, HealthResponse, HistoryQuery, ImportRulesRequest,
        IncrementMetricRequest, ListQuery, MetricEntry, PublishRequest, PutRulesRequest,
        PutSpecRequest, PutStateRequest, PutTemplateRequest, RegisterInstanceRequest,
        RollbackRequest, SetCapabilitiesRequest, SetIntentRequest, StreamQuery, TestFireResponse,
        ValidateContractRequest, ValidateContractResponse,
    },
    state::AppState,
    stream,
};

/// Wraps `koor_schemas::Error` so handlers can just `?` it and get the right
/// HTTP status, per SPEC_FULL.md's error-to-status mapping.
pub(crate) struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidInput(_) | Error::ContractMalformed(_) => StatusCode::BAD_REQUEST,
            Error::Transport(_) => StatusCode::BAD_GATEWAY,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorResponse { error: self.0.to_string() })).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn decode_hex(field: &str, s: &str) -> ApiResult<Vec<u8>> {
    hex::decode(s).map_err(|e| ApiError(Error::InvalidInput(format!("{field} is not valid hex: {e}"))))
}

fn parse_direction(s: &str) -> ApiResult<Direction> {
    match s {
        "request" => Ok(Direction::Request),
        "response" => Ok(Direction::Response),
        "query" => Ok(Direction::Query),
        "error" => Ok(Direction::Error),
        other => Err(ApiError(Error::InvalidInput(format!("unknown direction {other}")))),
    }
}

/// Parses a comma-separated `sources` query param into `RuleSource`s for
/// `ExportRules(sources?)` (spec.md §4.8).
fn parse_sources(s: &str) -> ApiResult<Vec<koor_schemas::RuleSource>> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part {
            "local" => Ok(koor_schemas::RuleSource::Local),
            "learned" => Ok(koor_schemas::RuleSource::Learned),
            "external" => Ok(koor_schemas::RuleSource::External),
            other => Err(ApiError(Error::InvalidInput(format!("unknown rule source {other}")))),
        })
        .collect()
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/v1/state", get(list_state))
        .route("/v1/state/:key", get(get_state).put(put_state).delete(delete_state))
        .route("/v1/state/:key/history", get(history_state))
        .route("/v1/state/:key/version/:version", get(get_state_version))
        .route("/v1/state/:key/rollback/:version", post(rollback_state))
        .route("/v1/state/:key/diff", get(diff_state))
        .route("/v1/specs/:project", get(list_specs))
        .route(
            "/v1/specs/:project/:name",
            get(get_spec).put(put_spec).delete(delete_spec),
        )
        .route("/v1/events", post(publish_event))
        .route("/v1/events/history", get(event_history))
        .route("/v1/events/history/range", get(event_history_range))
        .route("/v1/events/stream", get(stream_events))
        .route("/v1/instances", post(register_instance).get(list_instances))
        .route("/v1/instances/discover", get(discover_instances))
        .route("/v1/instances/me", get(whoami_instance))
        .route(
            "/v1/instances/:id",
            get(get_instance).delete(deregister_instance),
        )
        .route("/v1/instances/:id/activate", post(activate_instance))
        .route("/v1/instances/:id/heartbeat", post(heartbeat_instance))
        .route("/v1/instances/:id/intent", post(set_intent))
        .route("/v1/instances/:id/capabilities", post(set_capabilities))
        .route("/v1/lint/:project/rules", get(list_rules).put(put_rules))
        .route("/v1/lint/:project/rules/:rule_id/accept", post(accept_rule))
        .route("/v1/lint/:project/rules/:rule_id/reject", post(reject_rule))
        .route("/v1/lint/:project/validate", post(validate_lint))
        .route("/v1/lint/rules/import", post(import_rules))
        .route("/v1/lint/rules/export", get(export_rules))
        .route("/v1/contracts/validate", post(validate_contract))
        .route("/v1/compliance/run", post(run_compliance))
        .route("/v1/compliance/history", get(compliance_history))
        .route("/v1/webhooks", get(list_webhooks).post(create_webhook))
        .route("/v1/webhooks/:id", delete(delete_webhook))
        .route("/v1/webhooks/:id/test", post(test_webhook))
        .route("/v1/templates/:project", get(list_templates))
        .route(
            "/v1/templates/:project/:name",
            get(get_template).put(put_template).delete(delete_template),
        )
        .route("/v1/instances/:id/metrics", get(list_metrics).post(increment_metric))
        .route("/v1/audit", get(audit_history))
        .route_layer(middleware::from_fn_with_state(state.clone(), audit_mutations))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer_token));

    Router::new()
        .route("/v1/health", get(health))
        .merge(protected)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

/// Gates every route except `/v1/health` behind a static bearer token read
/// from `koor-config` (SPEC_FULL.md §11). No session model, no per-user
/// scoping.
async fn require_bearer_token(
    State(st): State<Arc<AppState>>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let Some(expected) = st.config.bearer_token.as_deref() else {
        return next.run(request).await;
    };

    let provided = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => next.run(request).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(GateRefusedResponse {
                error: "missing or invalid bearer token".to_string(),
            }),
        )
            .into_response(),
    }
}

/// Records one `audit_log` row per mutating call (spec.md §4.1 ambient
/// concerns) — a thin actor/action/target trail. Runs inside the auth layer
/// so a rejected request never gets audited as if it happened.
async fn audit_mutations(
    State(st): State<Arc<AppState>>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let target = request.uri().path().to_string();
    let response = next.run(request).await;

    if method != Method::GET && response.status().is_success() {
        let actor = st
            .config
            .bearer_token
            .as_deref()
            .map(|_| "authenticated")
            .unwrap_or("anonymous");
        if let Err(e) = koor_db::audit::record(&st.pool, actor, method.as_str(), &target).await {
            tracing::warn!(error = %e, %target, "failed to record audit entry");
        }
    }

    response
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: "koor-daemon",
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
}

// ---------------------------------------------------------------------------
// State store
// ---------------------------------------------------------------------------

async fn list_state(State(st): State<Arc<AppState>>, Query(q): Query<ListQuery>) -> ApiResult<impl IntoResponse> {
    Ok(Json(koor_state::list(&st.pool, &q.prefix).await?))
}

async fn get_state(State(st): State<Arc<AppState>>, Path(key): Path<String>) -> ApiResult<impl IntoResponse> {
    Ok(Json(koor_state::get(&st.pool, &key).await?))
}

async fn put_state(
    State(st): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(body): Json<PutStateRequest>,
) -> ApiResult<impl IntoResponse> {
    let value = decode_hex("value", &body.value)?;
    let entry = koor_state::put(&st.pool, &key, &value, &body.content_type, &body.updated_by).await?;
    st.bus
        .publish("state.changed", serde_json::json!({"key": key}), "state")
        .await?;
    Ok(Json(entry))
}

async fn delete_state(State(st): State<Arc<AppState>>, Path(key): Path<String>) -> ApiResult<impl IntoResponse> {
    koor_state::delete(&st.pool, &key).await?;
    st.bus
        .publish("state.deleted", serde_json::json!({"key": key}), "state")
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn history_state(
    State(st): State<Arc<AppState>>,
    Path(key): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> ApiResult<impl IntoResponse> {
    let mut entries = koor_state::history(&st.pool, &key).await?;
    entries.truncate(q.limit.max(0) as usize);
    Ok(Json(entries))
}

async fn get_state_version(
    State(st): State<Arc<AppState>>,
    Path((key, version)): Path<(String, i64)>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(koor_state::get_version(&st.pool, &key, version).await?))
}

async fn rollback_state(
    State(st): State<Arc<AppState>>,
    Path((key, version)): Path<(String, i64)>,
    Json(body): Json<RollbackRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(
        koor_state::rollback(&st.pool, &key, version, &body.updated_by).await?,
    ))
}

async fn diff_state(
    State(st): State<Arc<AppState>>,
    Path(key): Path<String>,
    Query(q): Query<DiffQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(koor_state::diff_versions(&st.pool, &key, q.v1, q.v2).await?))
}

// ---------------------------------------------------------------------------
// Spec registry
// ---------------------------------------------------------------------------

async fn list_specs(State(st): State<Arc<AppState>>, Path(project): Path<String>) -> ApiResult<impl IntoResponse> {
    Ok(Json(koor_specs::list(&st.pool, &project).await?))
}

async fn get_spec(
    State(st): State<Arc<AppState>>,
    Path((project, name)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(koor_specs::get(&st.pool, &project, &name).await?))
}

async fn put_spec(
    State(st): State<Arc<AppState>>,
    Path((project, name)): Path<(String, String)>,
    Json(body): Json<PutSpecRequest>,
) -> ApiResult<impl IntoResponse> {
    let data = decode_hex("data", &body.data)?;
    Ok(Json(koor_specs::put(&st.pool, &project, &name, &data).await?))
}

async fn delete_spec(
    State(st): State<Arc<AppState>>,
    Path((project, name)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    koor_specs::delete(&st.pool, &project, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Event bus
// ---------------------------------------------------------------------------

async fn publish_event(
    State(st): State<Arc<AppState>>,
    Json(body): Json<PublishRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(st.bus.publish(&body.topic, body.data, &body.source).await?))
}

async fn event_history(
    State(st): State<Arc<AppState>>,
    Query(q): Query<EventHistoryQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(st.bus.history(q.limit, q.topic.as_deref()).await?))
}

async fn event_history_range(
    State(st): State<Arc<AppState>>,
    Query(q): Query<EventHistoryRangeQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(
        st.bus
            .history_range(q.since, q.until, q.source.as_deref(), q.topic.as_deref(), q.last)
            .await?,
    ))
}

async fn stream_events(State(st): State<Arc<AppState>>, Query(q): Query<StreamQuery>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| stream::pump(socket, st, q.pattern))
}

// ---------------------------------------------------------------------------
// Instance registry
// ---------------------------------------------------------------------------

async fn register_instance(
    State(st): State<Arc<AppState>>,
    Json(body): Json<RegisterInstanceRequest>,
) -> ApiResult<impl IntoResponse> {
    let inst = koor_instances::register(
        &st.pool,
        &body.name,
        &body.workspace,
        &body.intent,
        &body.stack,
        &body.capabilities,
    )
    .await?;
    Ok(Json(inst))
}

async fn list_instances(State(st): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(koor_instances::list(&st.pool).await?))
}

async fn discover_instances(
    State(st): State<Arc<AppState>>,
    Query(q): Query<DiscoverQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(
        koor_instances::discover(
            &st.pool,
            q.name.as_deref(),
            q.workspace.as_deref(),
            q.stack.as_deref(),
            &q.capability,
        )
        .await?,
    ))
}

async fn whoami_instance(State(st): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<impl IntoResponse> {
    let token: Uuid = headers
        .get("x-instance-token")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| ApiError(Error::InvalidInput("missing x-instance-token header".to_string())))?;
    Ok(Json(koor_instances::authenticate(&st.pool, token).await?))
}

async fn get_instance(State(st): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    Ok(Json(koor_instances::get(&st.pool, id).await?))
}

async fn deregister_instance(State(st): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    koor_instances::deregister(&st.pool, &st.bus, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn activate_instance(State(st): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    koor_instances::activate(&st.pool, &st.bus, id).await?;
    Ok(Json(koor_instances::get(&st.pool, id).await?))
}

async fn heartbeat_instance(State(st): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    koor_instances::heartbeat(&st.pool, id).await?;
    Ok(Json(koor_instances::get(&st.pool, id).await?))
}

async fn set_intent(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<SetIntentRequest>,
) -> ApiResult<impl IntoResponse> {
    koor_instances::set_intent(&st.pool, id, &body.intent).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn set_capabilities(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<SetCapabilitiesRequest>,
) -> ApiResult<impl IntoResponse> {
    koor_instances::set_capabilities(&st.pool, id, &body.capabilities).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Lint rule engine
// ---------------------------------------------------------------------------

async fn list_rules(State(st): State<Arc<AppState>>, Path(project): Path<String>) -> ApiResult<impl IntoResponse> {
    Ok(Json(koor_lint::list_rules(&st.pool, &project).await?))
}

/// `PUT /v1/lint/:project/rules` — spec.md §4.8 `PutRules(project, [rules])`:
/// replaces the entire rule set scoped to the URL's `:project`.
async fn put_rules(
    State(st): State<Arc<AppState>>,
    Path(project): Path<String>,
    Json(body): Json<PutRulesRequest>,
) -> ApiResult<impl IntoResponse> {
    koor_lint::put_rules(&st.pool, &project, &body.rules).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /v1/lint/rules/import` — spec.md §4.8 `ImportRules([rules])`: bulk
/// upsert across whatever project each rule names.
async fn import_rules(
    State(st): State<Arc<AppState>>,
    Json(body): Json<ImportRulesRequest>,
) -> ApiResult<impl IntoResponse> {
    koor_lint::import_rules(&st.pool, &body.rules).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /v1/lint/rules/export` — spec.md §4.8 `ExportRules(sources?)`.
async fn export_rules(
    State(st): State<Arc<AppState>>,
    Query(q): Query<ExportRulesQuery>,
) -> ApiResult<impl IntoResponse> {
    let sources = q.sources.as_deref().map(parse_sources).transpose()?;
    Ok(Json(koor_lint::export_rules(&st.pool, sources.as_deref()).await?))
}

async fn accept_rule(
    State(st): State<Arc<AppState>>,
    Path((project, rule_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    koor_lint::accept_rule(&st.pool, &project, &rule_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reject_rule(
    State(st): State<Arc<AppState>>,
    Path((project, rule_id)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    koor_lint::reject_rule(&st.pool, &project, &rule_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn validate_lint(
    State(st): State<Arc<AppState>>,
    Path(project): Path<String>,
    Json(body): Json<LintRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(koor_lint::validate(&st.pool, &project, &body).await?))
}

// ---------------------------------------------------------------------------
// Contract validator
// ---------------------------------------------------------------------------

async fn validate_contract(
    State(st): State<Arc<AppState>>,
    Json(body): Json<ValidateContractRequest>,
) -> ApiResult<impl IntoResponse> {
    let spec = koor_specs::get(&st.pool, &body.project, &body.contract).await?;
    let contract: koor_schemas::Contract = serde_json::from_slice(&spec.data)
        .map_err(|e| ApiError(Error::ContractMalformed(format!("{e}"))))?;
    let direction = parse_direction(&body.direction)?;
    let violations = koor_contracts::validate_endpoint(&contract, &body.endpoint, direction, &body.payload);
    Ok(Json(ValidateContractResponse { violations }))
}

// ---------------------------------------------------------------------------
// Compliance scheduler
// ---------------------------------------------------------------------------

async fn run_compliance(State(st): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(koor_compliance::run_all(&st.pool, &st.bus).await?))
}

async fn compliance_history(
    State(st): State<Arc<AppState>>,
    Query(q): Query<ComplianceHistoryQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(
        koor_compliance::history(&st.pool, q.instance_id, q.limit).await?,
    ))
}

// ---------------------------------------------------------------------------
// Webhook dispatcher
// ---------------------------------------------------------------------------

async fn list_webhooks(State(st): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(koor_webhooks::list(&st.pool).await?))
}

async fn create_webhook(
    State(st): State<Arc<AppState>>,
    Json(body): Json<CreateWebhookRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(
        koor_webhooks::create(&st.pool, &body.url, &body.patterns, body.secret.as_deref()).await?,
    ))
}

async fn delete_webhook(State(st): State<Arc<AppState>>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    koor_webhooks::delete(&st.pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn test_webhook(State(st): State<Arc<AppState>>, Path(id): Path<i64>) -> ApiResult<impl IntoResponse> {
    let delivered = koor_webhooks::test_fire(&st.pool, &st.http, id).await?;
    Ok(Json(TestFireResponse { delivered }))
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

async fn list_templates(State(st): State<Arc<AppState>>, Path(project): Path<String>) -> ApiResult<impl IntoResponse> {
    Ok(Json(koor_db::templates::list(&st.pool, &project).await?))
}

async fn get_template(
    State(st): State<Arc<AppState>>,
    Path((project, name)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(koor_db::templates::get(&st.pool, &project, &name).await?))
}

async fn put_template(
    State(st): State<Arc<AppState>>,
    Path((project, name)): Path<(String, String)>,
    Json(body): Json<PutTemplateRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(
        koor_db::templates::put(&st.pool, &project, &name, &body.data).await?,
    ))
}

async fn delete_template(
    State(st): State<Arc<AppState>>,
    Path((project, name)): Path<(String, String)>,
) -> ApiResult<impl IntoResponse> {
    koor_db::templates::delete(&st.pool, &project, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

async fn list_metrics(State(st): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<impl IntoResponse> {
    let entries = koor_db::metrics::for_instance(&st.pool, id)
        .await?
        .into_iter()
        .map(|(metric, count)| MetricEntry { metric, count })
        .collect::<Vec<_>>();
    Ok(Json(entries))
}

async fn increment_metric(
    State(st): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<IncrementMetricRequest>,
) -> ApiResult<impl IntoResponse> {
    koor_db::metrics::increment(&st.pool, id, &body.metric, body.by).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Audit log
// ---------------------------------------------------------------------------

async fn audit_history(
    State(st): State<Arc<AppState>>,
    Query(q): Query<AuditHistoryQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(koor_db::audit::recent(&st.pool, q.limit).await?))
}
