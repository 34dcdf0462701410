//! Read-only REST API for DomainChain
//!
//! Exposes public registry state: lookups, counts, the current price and the
//! `DomainRegistered` log. Administrator balances are never served here.

use axum::{
    extract::{Path, Query, Request, State},
    http::{self, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::amount::format_amount;
use crate::crypto::Principal;
use crate::error::RegistryError;
use crate::events::{DomainRegistered, EventFilter};
use crate::name::DomainName;
use crate::service::Registry;

pub const DEFAULT_API_PORT: u16 = 3000;

/// Shared state behind the router
#[derive(Clone)]
pub struct ApiState {
    pub registry: Registry,
    api_stats: Arc<RwLock<ApiStats>>,
}

impl ApiState {
    pub fn new(registry: Registry) -> Self {
        ApiState {
            registry,
            api_stats: Arc::new(RwLock::new(ApiStats::new())),
        }
    }
}

#[derive(Debug, Default)]
struct ApiStats {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    start_time: Option<Instant>,
}

impl ApiStats {
    fn new() -> Self {
        ApiStats {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    fn record_request(&mut self, success: bool) {
        self.total_requests += 1;
        if success {
            self.successful_requests += 1;
        } else {
            self.failed_requests += 1;
        }
    }
}

// ============================================================================
// API Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    Registry(RegistryError),
    InvalidInput(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Registry(e) => {
                let status = match &e {
                    RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
                    RegistryError::InvalidName(_) | RegistryError::DepthExceeded { .. } => {
                        StatusCode::BAD_REQUEST
                    }
                    RegistryError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.to_string())
            }
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        ApiError::Registry(err)
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Serialize)]
pub struct StatsResponse {
    pub domain_count: u64,
    /// `None` until the registry is configured
    pub price: Option<String>,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub uptime_seconds: u64,
}

#[derive(Serialize)]
pub struct DomainResponse {
    pub name: String,
    pub owner: String,
    pub registered_at: String,
    pub reward_balance: String,
}

#[derive(Serialize)]
pub struct EventResponse {
    pub sequence: u64,
    pub registrant: String,
    pub timestamp: String,
    pub name: String,
    pub beneficiary: String,
}

impl From<DomainRegistered> for EventResponse {
    fn from(event: DomainRegistered) -> Self {
        EventResponse {
            sequence: event.sequence,
            registrant: event.registrant.to_hex(),
            timestamp: event.timestamp.to_rfc3339(),
            name: event.name.to_string(),
            beneficiary: event.beneficiary.to_hex(),
        }
    }
}

#[derive(Deserialize)]
struct EventsQuery {
    registrant: Option<String>,
    from: Option<u64>,
    to: Option<u64>,
}

// ============================================================================
// Middleware
// ============================================================================

async fn stats_middleware(State(state): State<ApiState>, req: Request, next: Next) -> Response {
    let response = next.run(req).await;

    let success = response.status().is_success();
    state.api_stats.write().await.record_request(success);

    response
}

async fn logging_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = next.run(req).await;

    tracing::info!(
        method = %method,
        path = %path,
        status = %response.status().as_u16(),
        duration_ms = %start.elapsed().as_millis(),
        "api.request"
    );

    response
}

// ============================================================================
// API Server
// ============================================================================

/// Build the API router with all endpoints
pub fn build_api_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(vec![http::Method::GET, http::Method::OPTIONS])
        .allow_headers(vec![http::header::CONTENT_TYPE]);

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/stats", get(get_stats))
        .route("/domains/:name", get(get_domain))
        .route("/events", get(get_events))
        .layer(middleware::from_fn(logging_middleware))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            stats_middleware,
        ))
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(cors)
}

pub async fn run_api_server(
    registry: Registry,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = build_api_router(ApiState::new(registry));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!(%addr, "api server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn get_stats(State(state): State<ApiState>) -> Json<StatsResponse> {
    let stats = state.api_stats.read().await;
    Json(StatsResponse {
        domain_count: state.registry.domain_count(),
        price: state.registry.price().ok().map(format_amount),
        total_requests: stats.total_requests,
        successful_requests: stats.successful_requests,
        failed_requests: stats.failed_requests,
        uptime_seconds: stats
            .start_time
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0),
    })
}

async fn get_domain(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> Result<Json<DomainResponse>, ApiError> {
    let name = DomainName::parse(&name)?;
    let registration = state.registry.registration(&name)?;

    Ok(Json(DomainResponse {
        reward_balance: format_amount(state.registry.domain_owner_balance(&name)),
        name: registration.name.to_string(),
        owner: registration.owner.to_hex(),
        registered_at: registration.registered_at.to_rfc3339(),
    }))
}

async fn get_events(
    State(state): State<ApiState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<EventResponse>>, ApiError> {
    let mut filter = match query.registrant {
        Some(hex) => EventFilter::by_registrant(
            Principal::from_hex(&hex).map_err(|e| ApiError::InvalidInput(e.to_string()))?,
        ),
        None => EventFilter::all(),
    };
    if let Some(from) = query.from {
        filter = filter.from(from);
    }
    if let Some(to) = query.to {
        filter = filter.to(to);
    }

    let events = state
        .registry
        .events(&filter)
        .into_iter()
        .map(EventResponse::from)
        .collect();
    Ok(Json(events))
}
