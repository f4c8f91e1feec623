use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use shipdesk_api::{
    AddPackageRequest, BatchTrackResult, ConfirmRequest, RebuildSummary, ReceivePackageRequest,
    ShipdeskApi, API_CONTRACT_VERSION,
};
use shipdesk_carriers::{CarrierConfig, FedexClient, UpsClient};
use shipdesk_core::manifest::{FilterCriteria, GroupedManifest, TrackingRecord};
use shipdesk_core::{Direction, TrackError};

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Clone)]
struct ServiceState {
    api: ShipdeskApi,
    rebuild_key: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    error: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Clone, Deserialize)]
struct RecentQuery {
    direction: Option<String>,
    limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
struct BatchTrackRequest {
    identifiers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RebuildRequest {
    records: Vec<TrackingRecord>,
}

#[derive(Debug, Clone, Serialize)]
struct MarkOverdueResponse {
    updated: usize,
}

#[derive(Debug, Parser)]
#[command(name = "shipdesk-service")]
#[command(about = "Local HTTP service for shipment lookup and reconciliation")]
struct Args {
    #[arg(long, default_value = "./shipdesk.sqlite3")]
    db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
    /// Shared secret required by the manifest rebuild endpoint. Falls back
    /// to the `SHIPDESK_REBUILD_KEY` environment variable.
    #[arg(long)]
    rebuild_key: Option<String>,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}

fn service_error(status: StatusCode, message: impl Into<String>) -> ServiceError {
    ServiceError {
        status,
        service_contract_version: SERVICE_CONTRACT_VERSION,
        error: message.into(),
    }
}

fn track_error(err: &TrackError) -> ServiceError {
    let status = match err {
        TrackError::Validation(_) => StatusCode::BAD_REQUEST,
        TrackError::NotFoundRecord(_) => StatusCode::NOT_FOUND,
        TrackError::Configuration(_) => StatusCode::CONFLICT,
        TrackError::Adapter(_) => StatusCode::BAD_GATEWAY,
        TrackError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    service_error(status, err.to_string())
}

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/openapi", get(openapi))
        .route("/v1/lookup/:query", get(lookup))
        .route("/v1/recent", get(recent))
        .route("/v1/stats", get(stats))
        .route("/v1/scans/:scan_id/confirm", post(confirm_scan))
        .route("/v1/track/batch", post(track_batch))
        .route("/v1/manifest/filter", post(manifest_filter))
        .route("/v1/manifest/rebuild", post(manifest_rebuild))
        .route("/v1/packages", get(list_packages).post(add_package))
        .route("/v1/packages/:id/confirm", post(receive_package))
        .route("/v1/packages/mark-overdue", post(mark_overdue))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let rebuild_key = args
        .rebuild_key
        .or_else(|| std::env::var("SHIPDESK_REBUILD_KEY").ok())
        .filter(|key| !key.trim().is_empty());
    if rebuild_key.is_none() {
        tracing::warn!("no rebuild key configured; /v1/manifest/rebuild will reject all callers");
    }

    let api = ShipdeskApi::new(
        args.db,
        Arc::new(UpsClient::new(&CarrierConfig::ups_from_env())),
        Arc::new(FedexClient::new(&CarrierConfig::fedex_from_env())),
    );
    let state = ServiceState { api, rebuild_key };

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, "shipdesk service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [("content-type", "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn lookup(
    State(state): State<ServiceState>,
    Path(query): Path<String>,
) -> Result<Json<ServiceEnvelope<shipdesk_core::UnifiedResult>>, ServiceError> {
    let result = state.api.resolve(&query).map_err(|err| track_error(&err))?;
    Ok(Json(envelope(result)))
}

async fn recent(
    State(state): State<ServiceState>,
    Query(params): Query<RecentQuery>,
) -> Result<Json<ServiceEnvelope<Vec<shipdesk_core::ScanRecord>>>, ServiceError> {
    let direction = match params.direction.as_deref() {
        None => Direction::Inbound,
        Some(raw) => Direction::parse(raw).ok_or_else(|| {
            service_error(StatusCode::BAD_REQUEST, format!("unknown direction: {raw}"))
        })?,
    };
    let records = state.api.recent(direction, params.limit).map_err(|err| track_error(&err))?;
    Ok(Json(envelope(records)))
}

async fn stats(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<shipdesk_core::StoreStats>>, ServiceError> {
    let stats = state.api.stats().map_err(|err| track_error(&err))?;
    Ok(Json(envelope(stats)))
}

async fn confirm_scan(
    State(state): State<ServiceState>,
    Path(scan_id): Path<String>,
    Json(request): Json<ConfirmRequest>,
) -> Result<Json<ServiceEnvelope<shipdesk_core::ScanRecord>>, ServiceError> {
    let record = state.api.confirm(&scan_id, &request).map_err(|err| track_error(&err))?;
    Ok(Json(envelope(record)))
}

async fn track_batch(
    State(state): State<ServiceState>,
    Json(request): Json<BatchTrackRequest>,
) -> Result<Json<ServiceEnvelope<BatchTrackResult>>, ServiceError> {
    if request.identifiers.is_empty() {
        return Err(service_error(StatusCode::BAD_REQUEST, "identifiers must not be empty"));
    }
    Ok(Json(envelope(state.api.track_batch(&request.identifiers))))
}

async fn manifest_filter(
    State(state): State<ServiceState>,
    Json(criteria): Json<FilterCriteria>,
) -> Result<Json<ServiceEnvelope<GroupedManifest>>, ServiceError> {
    let grouped = state.api.manifest_filter(&criteria).map_err(|err| track_error(&err))?;
    Ok(Json(envelope(grouped)))
}

async fn manifest_rebuild(
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Json(request): Json<RebuildRequest>,
) -> Result<Json<ServiceEnvelope<RebuildSummary>>, ServiceError> {
    let presented = headers.get("x-api-key").and_then(|value| value.to_str().ok());
    let authorized = matches!(
        (presented, state.rebuild_key.as_deref()),
        (Some(presented), Some(expected)) if presented == expected
    );
    if !authorized {
        return Err(service_error(StatusCode::UNAUTHORIZED, "invalid or missing x-api-key"));
    }

    let summary = state.api.manifest_rebuild(request.records).map_err(|err| track_error(&err))?;
    Ok(Json(envelope(summary)))
}

async fn list_packages(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<Vec<shipdesk_core::Package>>>, ServiceError> {
    let packages = state.api.list_packages().map_err(|err| track_error(&err))?;
    Ok(Json(envelope(packages)))
}

async fn add_package(
    State(state): State<ServiceState>,
    Json(request): Json<AddPackageRequest>,
) -> Result<Json<ServiceEnvelope<shipdesk_core::Package>>, ServiceError> {
    let package = state.api.add_package(&request).map_err(|err| track_error(&err))?;
    Ok(Json(envelope(package)))
}

async fn receive_package(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
    Json(request): Json<ReceivePackageRequest>,
) -> Result<Json<ServiceEnvelope<shipdesk_core::Package>>, ServiceError> {
    let package = state.api.receive_package(&id, &request).map_err(|err| track_error(&err))?;
    Ok(Json(envelope(package)))
}

async fn mark_overdue(
    State(state): State<ServiceState>,
) -> Result<Json<ServiceEnvelope<MarkOverdueResponse>>, ServiceError> {
    let updated = state.api.mark_overdue_packages().map_err(|err| track_error(&err))?;
    Ok(Json(envelope(MarkOverdueResponse { updated })))
}
