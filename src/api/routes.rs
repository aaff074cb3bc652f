//! API route definitions.

use super::params;
use super::state::AppState;
use crate::detect::{filter, Incident};
use crate::pipeline::{Recompute, Snapshot};
use crate::window::Lookback;
use axum::extract::{RawQuery, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::warn;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/filters", get(get_filters).put(put_filters))
        .route("/incidents", get(list_incidents))
        .route("/incidents/all", get(list_all_incidents))
        .route("/incidents/options", get(incident_options))
        .route("/alerts", get(list_alerts))
        .route("/alerts/table", get(alerts_table))
        .route("/refresh", post(refresh))
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

/// Loading state, window and counters shared by the list endpoints.
fn status_meta(snap: &Snapshot) -> Value {
    json!({
        "incidents_loading": snap.incidents_loading,
        "alerts_loading": snap.alerts_loading,
        "loaded": snap.loaded.as_ref().map(|l| json!({
            "days": l.lookback,
            "as_of": l.as_of.to_rfc3339(),
            "chunks": l.ranges.len(),
        })),
        "warnings": snap.warnings,
        "last_error": snap.last_error,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })
}

fn incidents_json(incidents: &[std::sync::Arc<Incident>]) -> Vec<&Incident> {
    incidents.iter().map(|i| i.as_ref()).collect()
}

fn recompute_label(recompute: Recompute) -> &'static str {
    match recompute {
        Recompute::None => "none",
        Recompute::Incidents => "incidents",
        Recompute::Alerts => "alerts",
    }
}

async fn get_filters(State(state): State<AppState>) -> Json<Value> {
    let snap = state.pipeline.snapshot().await;
    Json(json!({
        "data": snap.criteria,
        "meta": { "query": params::to_query(&snap.criteria) }
    }))
}

/// Replace the criteria from the query string and rerun what they invalidate
/// in the background.
async fn put_filters(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> (StatusCode, Json<Value>) {
    let criteria = params::parse_query(query.as_deref().unwrap_or_default(), state.default_days);
    let recompute = state.pipeline.set_filters(criteria.clone()).await;

    if recompute != Recompute::None {
        let pipeline = state.pipeline.clone();
        tokio::spawn(async move {
            if let Err(e) = pipeline.run(recompute).await {
                warn!(error = %e, "background pipeline run failed");
            }
        });
    }

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "data": criteria,
            "meta": {
                "query": params::to_query(&criteria),
                "recompute": recompute_label(recompute),
            }
        })),
    )
}

/// The published filtered set, or an ad-hoc filter when a query string is
/// given. Ad-hoc filters do not change the stored criteria.
async fn list_incidents(State(state): State<AppState>, RawQuery(query): RawQuery) -> Json<Value> {
    let snap = state.pipeline.snapshot().await;
    let adhoc = query
        .as_deref()
        .filter(|q| !q.is_empty())
        .map(|q| params::parse_query(q, state.default_days));

    let incidents = match &adhoc {
        Some(criteria) => filter::apply(criteria, &snap.incidents),
        None => snap.filtered.clone(),
    };
    Json(json!({
        "data": incidents_json(&incidents),
        "meta": {
            "total": incidents.len(),
            "criteria": adhoc.as_ref().unwrap_or(&snap.criteria),
            "status": status_meta(&snap),
        }
    }))
}

async fn list_all_incidents(State(state): State<AppState>) -> Json<Value> {
    let snap = state.pipeline.snapshot().await;
    Json(json!({
        "data": incidents_json(&snap.incidents),
        "meta": { "total": snap.incidents.len(), "status": status_meta(&snap) }
    }))
}

/// Values offered by the filter toolbar.
async fn incident_options(State(state): State<AppState>) -> Json<Value> {
    let snap = state.pipeline.snapshot().await;
    let days: Vec<&str> = Lookback::ALL.iter().map(|l| l.label()).collect();
    Json(json!({
        "data": {
            "days": days,
            "severity": [
                { "value": "critical", "label": "Critical" },
                { "value": "warning", "label": "Warning" },
                { "value": "info", "label": "Informative" },
            ],
            "state": [
                { "value": "firing", "label": "Firing" },
                { "value": "resolved", "label": "Resolved" },
            ],
            "groupId": filter::incident_id_options(&snap.incidents),
        },
        "meta": { "default_days": state.default_days }
    }))
}

async fn list_alerts(State(state): State<AppState>) -> Json<Value> {
    let snap = state.pipeline.snapshot().await;
    Json(json!({
        "data": snap.alerts,
        "meta": {
            "total": snap.alerts.len(),
            "group_id": snap.criteria.selected_group(),
            "status": status_meta(&snap),
        }
    }))
}

async fn alerts_table(State(state): State<AppState>) -> Json<Value> {
    let snap = state.pipeline.snapshot().await;
    Json(json!({
        "data": snap.table,
        "meta": {
            "total": snap.table.len(),
            "group_id": snap.criteria.selected_group(),
            "status": status_meta(&snap),
        }
    }))
}

async fn refresh(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        if let Err(e) = pipeline.refresh_incidents().await {
            warn!(error = %e, "manual refresh failed");
        }
    });
    (
        StatusCode::ACCEPTED,
        Json(json!({ "data": { "status": "refreshing" } })),
    )
}
