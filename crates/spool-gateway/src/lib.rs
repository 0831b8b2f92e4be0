pub mod config;
pub mod types;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use spool_common::{CapacityError, Envelope, PlanClass, Tier};
use spool_ledger::{
    Account, CapacityEngine, NetworkCapacityState, NewAccount, PlacementDecision, ProfileField,
    ReconcileReport, TierCapacity, UploadRecord,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

pub use config::GatewayConfig;
use types::{
    AmountRequest, ChargeRequest, CreateUserRequest, PlacementRequest, RecordFileRequest,
    SampleQuery, UpdateUserRequest,
};

#[derive(Clone)]
pub struct AppState {
    pub engine: CapacityEngine,
}

impl AppState {
    pub fn new(engine: CapacityEngine) -> Self {
        Self { engine }
    }

    pub fn in_memory(config: &GatewayConfig) -> Self {
        Self::new(CapacityEngine::in_memory(
            config.quota,
            config.reservation_mode,
        ))
    }
}

/// Failure side of every handler, rendered as an unsuccessful envelope.
#[derive(Debug)]
pub struct ApiError(pub CapacityError);

impl From<CapacityError> for ApiError {
    fn from(err: CapacityError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(CapacityError::InvalidArgument(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(CapacityError::InvalidArgument(rejection.body_text()))
    }
}

pub fn status_for(err: &CapacityError) -> StatusCode {
    match err {
        CapacityError::NotFound(_) => StatusCode::NOT_FOUND,
        CapacityError::AlreadyExists(_) => StatusCode::CONFLICT,
        CapacityError::InvalidPlanClass(_)
        | CapacityError::InvalidTier(_)
        | CapacityError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        CapacityError::InsufficientAllocation { .. }
        | CapacityError::CapacityExceeded { .. }
        | CapacityError::NegativeUsage { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        CapacityError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        CapacityError::PartialFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            warn!(kind = self.0.kind(), "Request failed: {}", self.0);
        }
        (status, Json(Envelope::<()>::from(&self.0))).into_response()
    }
}

type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

fn ok<T>(message: impl Into<String>, data: T) -> ApiResult<T> {
    Ok(Json(Envelope::ok(message, data)))
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        // Network bootstrap and capacity counters
        .route("/api/v1/network/init", post(init_network_handler))
        .route("/api/v1/network", get(network_handler))
        .route("/api/v1/capacity/:tier", get(tier_handler))
        .route(
            "/api/v1/capacity/:tier/allocated",
            post(increment_allocated_handler).delete(decrement_allocated_handler),
        )
        .route(
            "/api/v1/capacity/:tier/used",
            post(increment_used_handler).delete(decrement_used_handler),
        )

        // Where should a new file go
        .route("/api/v1/placement", post(placement_handler))

        // Uploaded files
        .route("/api/v1/files", post(record_file_handler))
        .route(
            "/api/v1/files/:name",
            get(get_file_handler).delete(delete_file_handler),
        )

        // Accounts
        .route(
            "/api/v1/users",
            get(sample_users_handler).post(create_user_handler),
        )
        .route(
            "/api/v1/users/:address",
            get(get_user_handler)
                .put(update_user_handler)
                .delete(delete_user_handler),
        )
        .route("/api/v1/users/:address/charge", post(charge_handler))
        .route("/api/v1/users/reconcile", post(reconcile_handler))

        .route("/health", get(health_handler))

        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn init_network_handler(State(state): State<AppState>) -> ApiResult<NetworkCapacityState> {
    state.engine.ledger.bootstrap().await?;
    ok(
        "Network storage state initialised",
        state.engine.ledger.snapshot().await?,
    )
}

async fn network_handler(State(state): State<AppState>) -> ApiResult<NetworkCapacityState> {
    ok(
        "Network storage state",
        state.engine.ledger.snapshot().await?,
    )
}

async fn tier_handler(
    State(state): State<AppState>,
    Path(tier): Path<String>,
) -> ApiResult<TierCapacity> {
    let tier: Tier = tier.parse()?;
    ok(
        format!("Total {tier} storage"),
        state.engine.ledger.tier_view(tier).await?,
    )
}

async fn increment_allocated_handler(
    State(state): State<AppState>,
    Path(tier): Path<String>,
    payload: Result<Json<AmountRequest>, JsonRejection>,
) -> ApiResult<TierCapacity> {
    let tier: Tier = tier.parse()?;
    let Json(req) = payload?;
    state.engine.ledger.increment_allocated(tier, req.amount_gb).await?;
    info!("Incremented {} tier allocation by {} GB", tier, req.amount_gb);
    ok(
        format!("{tier} storage incremented"),
        state.engine.ledger.tier_view(tier).await?,
    )
}

async fn decrement_allocated_handler(
    State(state): State<AppState>,
    Path(tier): Path<String>,
    payload: Result<Json<AmountRequest>, JsonRejection>,
) -> ApiResult<TierCapacity> {
    let tier: Tier = tier.parse()?;
    let Json(req) = payload?;
    state.engine.ledger.decrement_allocated(tier, req.amount_gb).await?;
    info!("Decremented {} tier allocation by {} GB", tier, req.amount_gb);
    ok(
        format!("{tier} storage decremented"),
        state.engine.ledger.tier_view(tier).await?,
    )
}

async fn increment_used_handler(
    State(state): State<AppState>,
    Path(tier): Path<String>,
    payload: Result<Json<AmountRequest>, JsonRejection>,
) -> ApiResult<TierCapacity> {
    let tier: Tier = tier.parse()?;
    let Json(req) = payload?;
    state.engine.ledger.increment_used(tier, req.amount_gb).await?;
    ok(
        format!("{tier} storage used incremented"),
        state.engine.ledger.tier_view(tier).await?,
    )
}

async fn decrement_used_handler(
    State(state): State<AppState>,
    Path(tier): Path<String>,
    payload: Result<Json<AmountRequest>, JsonRejection>,
) -> ApiResult<TierCapacity> {
    let tier: Tier = tier.parse()?;
    let Json(req) = payload?;
    state.engine.ledger.decrement_used(tier, req.amount_gb).await?;
    ok(
        format!("{tier} storage used decremented"),
        state.engine.ledger.tier_view(tier).await?,
    )
}

async fn placement_handler(
    State(state): State<AppState>,
    payload: Result<Json<PlacementRequest>, JsonRejection>,
) -> ApiResult<PlacementDecision> {
    let Json(req) = payload?;
    let plan: PlanClass = req.account_type.parse()?;
    ok("location", state.engine.place(plan, req.file_size_gb).await?)
}

async fn record_file_handler(
    State(state): State<AppState>,
    payload: Result<Json<RecordFileRequest>, JsonRejection>,
) -> ApiResult<UploadRecord> {
    let Json(req) = payload?;
    let tier: Tier = req.tier.parse()?;

    let record = UploadRecord {
        file_name: req.file_name,
        size_gb: req.file_size_gb,
        uploaded_at: req.upload_date.unwrap_or_else(Utc::now),
        uploader: req.uploader_address,
        tier,
        hosts: req.hosts,
        shards: req.shards.unwrap_or_default(),
        backup_shards: req.backup_shards.unwrap_or_default(),
        timezone: req.timezone,
        // set once the uploader is charged
        account_id: 0,
    };

    let record = state.engine.lifecycle.record_upload(record).await?;
    ok(format!("File upload success ({tier})"), record)
}

async fn get_file_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<UploadRecord> {
    ok("File details", state.engine.lifecycle.find_upload(&name).await?)
}

async fn delete_file_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<UploadRecord> {
    ok("File deleted", state.engine.lifecycle.delete_upload(&name).await?)
}

async fn create_user_handler(
    State(state): State<AppState>,
    payload: Result<Json<CreateUserRequest>, JsonRejection>,
) -> ApiResult<Account> {
    let Json(req) = payload?;
    if req.address.is_empty() {
        return Err(CapacityError::InvalidArgument("address must not be empty".into()).into());
    }
    let plan: PlanClass = req.account_type.parse()?;

    let account = state
        .engine
        .lifecycle
        .create_account(NewAccount {
            address: req.address,
            plan,
            user_name: req.user_name,
            relay_address: req.relay_address,
            timezone: req.timezone,
        })
        .await?;
    ok("User added", account)
}

async fn get_user_handler(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> ApiResult<Account> {
    ok("User details", state.engine.lifecycle.get_account(&address).await?)
}

async fn update_user_handler(
    State(state): State<AppState>,
    Path(address): Path<String>,
    payload: Result<Json<UpdateUserRequest>, JsonRejection>,
) -> ApiResult<Account> {
    let Json(req) = payload?;
    let field: ProfileField = req.field_name.parse()?;
    let account = state
        .engine
        .lifecycle
        .update_profile(&address, field, req.field_value)
        .await?;
    ok("User field updated", account)
}

async fn delete_user_handler(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> ApiResult<Account> {
    ok("User deleted", state.engine.lifecycle.remove_account(&address).await?)
}

async fn sample_users_handler(
    State(state): State<AppState>,
    query: Result<Query<SampleQuery>, QueryRejection>,
) -> ApiResult<Vec<Account>> {
    let Query(query) = query?;
    ok(
        "Users",
        state.engine.lifecycle.sample_accounts(query.amount).await?,
    )
}

async fn charge_handler(
    State(state): State<AppState>,
    Path(address): Path<String>,
    payload: Result<Json<ChargeRequest>, JsonRejection>,
) -> ApiResult<Account> {
    let Json(req) = payload?;
    let tier: Tier = req.tier.parse()?;
    let account = state
        .engine
        .lifecycle
        .charge_upload(&address, tier, req.file_size_gb)
        .await?;
    ok(format!("Charged {} GB to {tier}", req.file_size_gb), account)
}

async fn reconcile_handler(State(state): State<AppState>) -> ApiResult<ReconcileReport> {
    let report = state.engine.lifecycle.reconcile_allocations().await?;
    info!(
        "Reconciliation: {} reconciled, {} pending",
        report.reconciled.len(),
        report.failed.len()
    );
    ok("Reconciliation complete", report)
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let initialised = state.engine.ledger.is_bootstrapped().await.unwrap_or(false);
    Json(Envelope::ok(
        "healthy",
        serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "network_initialised": initialised,
            "reservation_mode": state.engine.placement.mode(),
        }),
    ))
}
