//! HTTP surface: observability endpoints and router assembly
//!
//! The telemetry middleware wraps every route; CORS is the permissive policy
//! the family clients expect. Business routes (menu, orders, members) are
//! mounted by the main application; this crate only serves the log endpoints
//! and health checks.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, Method};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::AppState;
use crate::errors::{TelemetryError, TelemetryResult};
use crate::export::{export_logs, log_stats};
use crate::logger::LogLevel;
use crate::middleware::telemetry_middleware;
use crate::operation::OperationLogger;

const MODULE_NAME: &str = "LogsApi";

/// Build the full router with middleware and CORS layered on.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(Duration::from_secs(86_400));

    // CORS sits outermost so even the middleware's early rejections (429)
    // are readable by cross-origin browser clients.
    Router::new()
        .route("/api/logs", get(query_logs).post(ingest_client_logs))
        .route("/healthz", get(healthz))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            telemetry_middleware,
        ))
        .layer(cors)
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub action: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub level: Option<String>,
}

async fn query_logs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LogsQuery>,
) -> Result<Json<Value>, TelemetryError> {
    let mut op = OperationLogger::new(state.logger.clone(), MODULE_NAME, "query logs", None);

    match run_logs_query(&state, &params, &mut op) {
        Ok(value) => {
            op.complete(None);
            Ok(Json(value))
        }
        Err(err) => {
            op.fail(&err);
            Err(err)
        }
    }
}

fn run_logs_query(
    state: &AppState,
    params: &LogsQuery,
    op: &mut OperationLogger,
) -> TelemetryResult<Value> {
    match params.action.as_deref() {
        Some("stats") => {
            op.log_step("collecting log statistics", None);
            let stats = log_stats(&state.config.log_dir)?;
            op.add_context(json!({"totalFiles": stats.total_files}));
            Ok(serde_json::to_value(&stats)?)
        }
        Some("export") => {
            let (Some(start), Some(end)) = (params.start.as_deref(), params.end.as_deref())
            else {
                state.logger.warn(
                    "Missing export parameters",
                    Some(json!({
                        "module": MODULE_NAME,
                        "start": params.start,
                        "end": params.end,
                    })),
                );
                return Err(TelemetryError::bad_request(
                    "start and end dates are required",
                ));
            };

            let start = parse_date(start)?;
            let end = parse_date(end)?;
            let level = params
                .level
                .as_deref()
                .map(|l| l.parse::<LogLevel>())
                .transpose()
                .map_err(|_| TelemetryError::bad_request("unknown level filter"))?;

            op.log_step(
                "exporting logs",
                Some(json!({"start": start.to_string(), "end": end.to_string()})),
            );
            let entries = export_logs(&state.config.log_dir, start, end, level)?;
            op.add_context(json!({"exportCount": entries.len()}));
            Ok(serde_json::to_value(&entries)?)
        }
        other => {
            state.logger.warn(
                "Unknown logs action",
                Some(json!({
                    "module": MODULE_NAME,
                    "action": other,
                })),
            );
            Err(TelemetryError::bad_request("unknown action"))
        }
    }
}

fn parse_date(input: &str) -> TelemetryResult<NaiveDate> {
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .map_err(|_| TelemetryError::bad_request(format!("invalid date: {input}")))
}

/// Batched records shipped up by the browser client's log buffer.
#[derive(Debug, Deserialize)]
pub struct ClientLogBatch {
    pub logs: Vec<ClientLogRecord>,
}

#[derive(Debug, Deserialize)]
pub struct ClientLogRecord {
    pub level: Option<String>,
    pub message: String,
    pub context: Option<Value>,
    pub timestamp: Option<String>,
}

async fn ingest_client_logs(
    State(state): State<Arc<AppState>>,
    Json(batch): Json<ClientLogBatch>,
) -> Result<Json<Value>, TelemetryError> {
    let mut op = OperationLogger::new(
        state.logger.clone(),
        MODULE_NAME,
        "ingest client logs",
        None,
    );
    op.log_step(
        "processing client records",
        Some(json!({"count": batch.logs.len()})),
    );

    for record in &batch.logs {
        let level = record
            .level
            .as_deref()
            .and_then(|l| l.parse::<LogLevel>().ok())
            .unwrap_or(LogLevel::Debug);

        let mut ctx = match &record.context {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };
        ctx.insert("module".into(), json!("ClientLog"));
        if let Some(ts) = &record.timestamp {
            ctx.insert("clientTimestamp".into(), json!(ts));
        }

        state.logger.log(
            level,
            &format!("[Client] {}", record.message),
            Some(Value::Object(ctx)),
        );
    }

    let processed = batch.logs.len();
    op.complete(Some(json!({"processedCount": processed})));
    Ok(Json(json!({"success": true, "processed": processed})))
}

async fn healthz() -> Json<Value> {
    Json(json!({"status": "ok"}))
}
