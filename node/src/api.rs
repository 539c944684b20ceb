//! # Purchase API
//!
//! Builds the axum router that the game-side plugin talks to. Every player
//! command maps to one controller operation; business outcomes become HTTP
//! statuses with a machine-readable `code`.
//!
//! ## Endpoints
//!
//! | Method | Path                                | Description                          |
//! |--------|-------------------------------------|--------------------------------------|
//! | GET    | `/health`                           | Liveness probe                       |
//! | GET    | `/products`                         | Catalog with display prices          |
//! | POST   | `/players/:player/purchase`         | Open a purchase                      |
//! | GET    | `/players/:player/purchase`         | Deposit instructions for the open one|
//! | POST   | `/players/:player/purchase/confirm` | Submit the payment's transaction hash|
//! | DELETE | `/players/:player/purchase`         | Cancel the open purchase             |
//! | GET    | `/players/:player/history`          | Completed purchases                  |
//!
//! View, buy, confirm and cancel share a per-player cooldown. A player on
//! cooldown gets `429` with the seconds left.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use tanglecart::catalog::Catalog;
use tanglecart::transaction::{
    CancelOutcome, CompleteOutcome, CompletedTransaction, ControllerError, PendingTransaction,
    PlayerId, Rejection, StartOutcome, TransactionController,
};

use crate::cooldown::{remaining_secs, Cooldown};
use crate::metrics::SharedMetrics;
use crate::names::NameCache;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    pub controller: Arc<TransactionController>,
    pub metrics: SharedMetrics,
    pub cooldown: Arc<Cooldown>,
    /// Names sent by the plugin, used to render `{PLAYER_NAME}`.
    pub names: Arc<NameCache>,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/products", get(products_handler))
        .route(
            "/players/:player/purchase",
            get(view_purchase_handler)
                .post(start_purchase_handler)
                .delete(cancel_purchase_handler),
        )
        .route("/players/:player/purchase/confirm", post(confirm_purchase_handler))
        .route("/players/:player/history", get(history_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response Types
// ---------------------------------------------------------------------------

/// Body of `POST /players/:player/purchase`.
#[derive(Debug, Deserialize)]
pub struct StartPurchaseRequest {
    pub product_id: u32,
    /// The player's current name, if the caller knows it.
    #[serde(default)]
    pub player_name: Option<String>,
}

/// Body of `POST /players/:player/purchase/confirm`.
#[derive(Debug, Deserialize)]
pub struct ConfirmPurchaseRequest {
    pub hash: String,
    #[serde(default)]
    pub player_name: Option<String>,
}

/// One catalog entry as shown to buyers.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProductView {
    pub id: u32,
    pub name: String,
    pub description: String,
    pub price: u64,
    pub price_display: String,
}

/// An open purchase and how to pay for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseView {
    pub transaction_id: Uuid,
    pub product_id: u32,
    /// `None` if the product was removed from the catalog after purchase.
    pub product_name: Option<String>,
    pub amount: u64,
    pub amount_display: String,
    /// Where to send exactly `amount`.
    pub address: String,
    /// Message the transfer must carry.
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl PurchaseView {
    fn new(pending: &PendingTransaction, catalog: &Catalog) -> Self {
        Self {
            transaction_id: pending.transaction_id,
            product_id: pending.product_id,
            product_name: catalog.get(pending.product_id).map(|p| p.name.clone()),
            amount: pending.amount,
            amount_display: format_amount(pending.amount),
            address: pending.assigned_address.clone(),
            message: pending.payment_message(),
            created_at: pending.created_at,
        }
    }
}

/// A completed purchase.
#[derive(Debug, Serialize, Deserialize)]
pub struct CompletedView {
    pub transaction_id: Uuid,
    pub purchase_id: Uuid,
    pub product_id: u32,
    pub amount: u64,
    pub amount_display: String,
    pub hash: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl From<&CompletedTransaction> for CompletedView {
    fn from(completed: &CompletedTransaction) -> Self {
        Self {
            transaction_id: completed.transaction_id,
            purchase_id: completed.linked_pending_transaction_id,
            product_id: completed.product_id,
            amount: completed.amount,
            amount_display: format_amount(completed.amount),
            hash: completed.ledger_transaction_hash.clone(),
            started_at: completed.started_at,
            completed_at: completed.completed_at,
        }
    }
}

/// Response of a successful confirmation.
#[derive(Debug, Serialize, Deserialize)]
pub struct ConfirmResponse {
    pub message: String,
    pub purchase: CompletedView,
}

/// Body of every non-2xx response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Formats a ledger amount with the largest fitting unit:
/// `999 i`, `1.337 Ki`, `2.5 Mi`.
pub fn format_amount(amount: u64) -> String {
    if amount < 1_000 {
        format!("{amount} i")
    } else if amount < 1_000_000 {
        format!("{:?} Ki", amount as f64 / 1_000.0)
    } else {
        format!("{:?} Mi", amount as f64 / 1_000_000.0)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not a player id: {0}")]
    InvalidPlayer(String),

    #[error("please wait, you are currently on cooldown ({0}s remaining)")]
    Cooldown(u64),

    #[error("this product does not exist")]
    UnknownProduct(u32),

    #[error("you already have a pending transaction")]
    HasPending(Box<PurchaseView>),

    #[error("you don't have any pending purchases")]
    HasNoPending,

    #[error("this purchase was already completed")]
    AlreadyCompleted,

    #[error("failed to complete transaction: {0}")]
    Rejected(Rejection),

    #[error("internal error")]
    Internal(#[from] ControllerError),
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidPlayer(_) => "invalid_player",
            Self::Cooldown(_) => "cooldown",
            Self::UnknownProduct(_) => "unknown_product",
            Self::HasPending(_) => "has_pending",
            Self::HasNoPending => "has_no_pending",
            Self::AlreadyCompleted => "already_completed",
            Self::Rejected(_) => "rejected",
            Self::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidPlayer(_) => StatusCode::BAD_REQUEST,
            Self::Cooldown(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::UnknownProduct(_) | Self::HasNoPending => StatusCode::NOT_FOUND,
            Self::HasPending(_) | Self::AlreadyCompleted => StatusCode::CONFLICT,
            Self::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Cooldown(secs) => Some(serde_json::json!({ "retry_after_secs": secs })),
            Self::UnknownProduct(id) => Some(serde_json::json!({ "product_id": id })),
            Self::HasPending(view) => serde_json::to_value(view).ok(),
            Self::Rejected(reason) => Some(serde_json::json!({ "reason": reason })),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(e) = &self {
            tracing::error!(error = %e, "request failed");
        }

        let status = self.status();
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
            details: self.details(),
        };

        match self {
            Self::Cooldown(secs) => (
                status,
                [(header::RETRY_AFTER, secs.to_string())],
                Json(body),
            )
                .into_response(),
            _ => (status, Json(body)).into_response(),
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn parse_player(raw: &str) -> ApiResult<PlayerId> {
    raw.parse()
        .map_err(|_| ApiError::InvalidPlayer(raw.to_string()))
}

/// Admits `player` through the cooldown or fails with the time left.
fn admit(state: &AppState, player: PlayerId) -> ApiResult<()> {
    state.cooldown.check(player).map_err(|remaining| {
        state.metrics.cooldown_hits_total.inc();
        ApiError::Cooldown(remaining_secs(remaining))
    })
}

fn remember_name(state: &AppState, player: PlayerId, name: Option<&str>) {
    if let Some(name) = name {
        state.names.remember(player, name);
    }
}

/// `GET /health` - liveness probe.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": state.version,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// `GET /products` - every product, ordered by id.
async fn products_handler(State(state): State<AppState>) -> Json<Vec<ProductView>> {
    let products = state
        .controller
        .catalog()
        .all()
        .map(|p| ProductView {
            id: p.id,
            name: p.name.clone(),
            description: p.description.clone(),
            price: p.price,
            price_display: format_amount(p.price),
        })
        .collect();
    Json(products)
}

/// `POST /players/:player/purchase` - opens a purchase.
async fn start_purchase_handler(
    State(state): State<AppState>,
    Path(player): Path<String>,
    Json(request): Json<StartPurchaseRequest>,
) -> ApiResult<(StatusCode, Json<PurchaseView>)> {
    let player = parse_player(&player)?;
    admit(&state, player)?;
    remember_name(&state, player, request.player_name.as_deref());

    let catalog = state.controller.catalog();
    match state
        .controller
        .start_transaction(player, request.product_id)
        .await?
    {
        StartOutcome::Started(pending) => {
            state.metrics.purchases_started_total.inc();
            Ok((StatusCode::CREATED, Json(PurchaseView::new(&pending, catalog))))
        }
        StartOutcome::HasPending(open) => Err(ApiError::HasPending(Box::new(PurchaseView::new(
            &open, catalog,
        )))),
        StartOutcome::UnknownProduct(id) => Err(ApiError::UnknownProduct(id)),
    }
}

/// `GET /players/:player/purchase` - payment instructions for the open
/// purchase.
async fn view_purchase_handler(
    State(state): State<AppState>,
    Path(player): Path<String>,
) -> ApiResult<Json<PurchaseView>> {
    let player = parse_player(&player)?;
    admit(&state, player)?;

    match state.controller.open_pending(player).await? {
        Some(open) => Ok(Json(PurchaseView::new(&open, state.controller.catalog()))),
        None => Err(ApiError::HasNoPending),
    }
}

/// `POST /players/:player/purchase/confirm` - verifies the claimed hash
/// and completes the open purchase.
async fn confirm_purchase_handler(
    State(state): State<AppState>,
    Path(player): Path<String>,
    Json(request): Json<ConfirmPurchaseRequest>,
) -> ApiResult<Json<ConfirmResponse>> {
    let player = parse_player(&player)?;
    admit(&state, player)?;
    remember_name(&state, player, request.player_name.as_deref());

    let started = Instant::now();
    let outcome = state
        .controller
        .complete_for_player(player, request.hash.trim())
        .await;
    state
        .metrics
        .verification_latency_seconds
        .observe(started.elapsed().as_secs_f64());

    match outcome? {
        CompleteOutcome::Completed(completed) => {
            state.metrics.purchases_completed_total.inc();
            Ok(Json(ConfirmResponse {
                message: "Thank you for your purchase!".to_string(),
                purchase: CompletedView::from(&completed),
            }))
        }
        CompleteOutcome::Rejected(reason) => {
            state.metrics.record_rejection(reason);
            Err(ApiError::Rejected(reason))
        }
        CompleteOutcome::HasNoPending => Err(ApiError::HasNoPending),
        CompleteOutcome::AlreadyCompleted => Err(ApiError::AlreadyCompleted),
    }
}

/// `DELETE /players/:player/purchase` - cancels the open purchase.
async fn cancel_purchase_handler(
    State(state): State<AppState>,
    Path(player): Path<String>,
) -> ApiResult<Json<PurchaseView>> {
    let player = parse_player(&player)?;
    admit(&state, player)?;

    match state.controller.cancel_for_player(player).await? {
        CancelOutcome::Cancelled(pending) => {
            state.metrics.cancellations_total.inc();
            Ok(Json(PurchaseView::new(&pending, state.controller.catalog())))
        }
        CancelOutcome::HasNoPending => Err(ApiError::HasNoPending),
    }
}

/// `GET /players/:player/history` - completed purchases, oldest first.
async fn history_handler(
    State(state): State<AppState>,
    Path(player): Path<String>,
) -> ApiResult<Json<Vec<CompletedView>>> {
    let player = parse_player(&player)?;
    let history = state.controller.history(player).await?;
    Ok(Json(history.iter().map(CompletedView::from).collect()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tanglecart::catalog::default_products;
    use tanglecart::ledger::MockLedger;
    use tanglecart::storage::MemoryStore;
    use tanglecart::transaction::{grant_channel, spawn_grant_worker, PlayerDirectory};
    use tower::ServiceExt;

    use crate::metrics::ShopMetrics;
    use crate::rcon::LogExecutor;

    const PLAYER: &str = "2f1c9a0e-1b7d-4c3e-9f00-7a1b2c3d4e5f";

    fn deposit_address() -> String {
        "D".repeat(81)
    }

    /// Creates a test AppState over an in-memory store and mock ledger.
    fn test_app_state(cooldown: Duration) -> (AppState, Arc<MockLedger>) {
        let ledger = Arc::new(MockLedger::new(deposit_address()));
        let names = Arc::new(NameCache::new());
        let (publisher, rx) = grant_channel(16);
        spawn_grant_worker(rx, Arc::new(LogExecutor));

        let controller = Arc::new(TransactionController::new(
            Arc::new(MemoryStore::new()),
            Arc::new(Catalog::from_products(default_products()).unwrap()),
            ledger.clone(),
            Duration::from_secs(5),
            publisher,
            names.clone(),
        ));

        let state = AppState {
            version: "0.1.0-test".into(),
            controller,
            metrics: Arc::new(ShopMetrics::new().unwrap()),
            cooldown: Arc::new(Cooldown::new(cooldown)),
            names,
        };
        (state, ledger)
    }

    /// Sends a request with an optional JSON body and returns
    /// (status, headers, body_bytes).
    async fn send(
        router: &Router,
        method: &str,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let builder = Request::builder().method(method).uri(path);
        let req = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&json).unwrap()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        (status, headers, body)
    }

    async fn start(router: &Router, product_id: u32) -> (StatusCode, Vec<u8>) {
        let (status, _, body) = send(
            router,
            "POST",
            &format!("/players/{PLAYER}/purchase"),
            Some(serde_json::json!({ "product_id": product_id })),
        )
        .await;
        (status, body)
    }

    async fn confirm(router: &Router, hash: &str) -> (StatusCode, Vec<u8>) {
        let (status, _, body) = send(
            router,
            "POST",
            &format!("/players/{PLAYER}/purchase/confirm"),
            Some(serde_json::json!({ "hash": hash })),
        )
        .await;
        (status, body)
    }

    fn error_code(body: &[u8]) -> String {
        serde_json::from_slice::<ErrorResponse>(body).unwrap().code
    }

    #[test]
    fn amounts_use_the_largest_fitting_unit() {
        assert_eq!(format_amount(0), "0 i");
        assert_eq!(format_amount(999), "999 i");
        assert_eq!(format_amount(1_000), "1.0 Ki");
        assert_eq!(format_amount(1_337), "1.337 Ki");
        assert_eq!(format_amount(2_500_000), "2.5 Mi");
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        let (state, _) = test_app_state(Duration::ZERO);
        let router = create_router(state);
        let (status, _, body) = send(&router, "GET", "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["version"], "0.1.0-test");
    }

    #[tokio::test]
    async fn products_carry_display_prices() {
        let (state, _) = test_app_state(Duration::ZERO);
        let router = create_router(state);
        let (status, _, body) = send(&router, "GET", "/products", None).await;

        assert_eq!(status, StatusCode::OK);
        let products: Vec<ProductView> = serde_json::from_slice(&body).unwrap();
        assert_eq!(products.len(), 2);
        assert_eq!(products[0].price_display, "1.337 Ki");
        assert_eq!(products[1].name, "Test 2");
        assert_eq!(products[1].price_display, "10 i");
    }

    #[tokio::test]
    async fn start_returns_payment_instructions_once() {
        let (state, _) = test_app_state(Duration::ZERO);
        let router = create_router(state.clone());

        let (status, body) = start(&router, 0).await;
        assert_eq!(status, StatusCode::CREATED);
        let view: PurchaseView = serde_json::from_slice(&body).unwrap();
        assert_eq!(view.address, deposit_address());
        assert_eq!(view.amount, 1337);
        assert_eq!(view.product_name.as_deref(), Some("Test"));
        assert_eq!(view.message, format!("{PLAYER} {}", view.transaction_id));

        // A second purchase is refused and points at the open one.
        let (status, body) = start(&router, 1).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(err.code, "has_pending");
        assert_eq!(
            err.details.unwrap()["transaction_id"],
            view.transaction_id.to_string()
        );
        assert_eq!(state.metrics.purchases_started_total.get(), 1);
    }

    #[tokio::test]
    async fn unknown_product_and_bad_player_are_rejected() {
        let (state, _) = test_app_state(Duration::ZERO);
        let router = create_router(state);

        let (status, body) = start(&router, 42).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(error_code(&body), "unknown_product");

        let (status, _, body) = send(&router, "GET", "/players/steve/purchase", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_code(&body), "invalid_player");
    }

    #[tokio::test]
    async fn view_shows_open_purchase() {
        let (state, _) = test_app_state(Duration::ZERO);
        let router = create_router(state);
        let path = format!("/players/{PLAYER}/purchase");

        let (status, _, body) = send(&router, "GET", &path, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(error_code(&body), "has_no_pending");

        let (_, started) = start(&router, 1).await;
        let started: PurchaseView = serde_json::from_slice(&started).unwrap();
        let (status, _, body) = send(&router, "GET", &path, None).await;
        assert_eq!(status, StatusCode::OK);
        let viewed: PurchaseView = serde_json::from_slice(&body).unwrap();
        assert_eq!(viewed.transaction_id, started.transaction_id);
        assert_eq!(viewed.amount_display, "10 i");
    }

    #[tokio::test]
    async fn confirm_completes_and_records_history() {
        let (state, ledger) = test_app_state(Duration::ZERO);
        let router = create_router(state.clone());

        let (_, body) = start(&router, 0).await;
        let view: PurchaseView = serde_json::from_slice(&body).unwrap();
        let hash = ledger
            .record_payment(&view.address, 1337, &view.message)
            .unwrap();

        let (status, body) = confirm(&router, &hash).await;
        assert_eq!(status, StatusCode::OK);
        let confirmed: ConfirmResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(confirmed.purchase.purchase_id, view.transaction_id);
        assert_eq!(confirmed.purchase.hash, hash);

        // Nothing left to confirm.
        let (status, body) = confirm(&router, &hash).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(error_code(&body), "has_no_pending");

        let (status, _, body) =
            send(&router, "GET", &format!("/players/{PLAYER}/history"), None).await;
        assert_eq!(status, StatusCode::OK);
        let history: Vec<CompletedView> = serde_json::from_slice(&body).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].hash, hash);

        assert_eq!(state.metrics.purchases_completed_total.get(), 1);
        assert_eq!(state.metrics.verification_latency_seconds.get_sample_count(), 2);
    }

    #[tokio::test]
    async fn bad_payments_are_rejected_with_reason() {
        let (state, ledger) = test_app_state(Duration::ZERO);
        let router = create_router(state.clone());

        let (_, body) = start(&router, 0).await;
        let view: PurchaseView = serde_json::from_slice(&body).unwrap();

        let short = ledger
            .record_payment(&view.address, 1336, &view.message)
            .unwrap();
        let (status, body) = confirm(&router, &short).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(err.code, "rejected");
        assert_eq!(err.details.unwrap()["reason"], "no_matching_transfer");
        assert_eq!(err.message, "failed to complete transaction: no completed transaction found");

        let (status, body) = confirm(&router, "not-a-hash").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(err.details.unwrap()["reason"], "invalid_hash");

        // The purchase is still open after rejections.
        let (status, _, _) =
            send(&router, "GET", &format!("/players/{PLAYER}/purchase"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            state
                .metrics
                .verification_rejections_total
                .with_label_values(&["no_matching_transfer"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn cancel_removes_open_purchase() {
        let (state, _) = test_app_state(Duration::ZERO);
        let router = create_router(state.clone());
        let path = format!("/players/{PLAYER}/purchase");

        let (_, body) = start(&router, 0).await;
        let view: PurchaseView = serde_json::from_slice(&body).unwrap();

        let (status, _, body) = send(&router, "DELETE", &path, None).await;
        assert_eq!(status, StatusCode::OK);
        let cancelled: PurchaseView = serde_json::from_slice(&body).unwrap();
        assert_eq!(cancelled.transaction_id, view.transaction_id);

        let (status, _, body) = send(&router, "DELETE", &path, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(error_code(&body), "has_no_pending");
        assert_eq!(state.metrics.cancellations_total.get(), 1);
    }

    #[tokio::test]
    async fn cooldown_refuses_rapid_commands() {
        let (state, _) = test_app_state(Duration::from_secs(30));
        let router = create_router(state.clone());

        let (status, _) = start(&router, 0).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, headers, body) =
            send(&router, "GET", &format!("/players/{PLAYER}/purchase"), None).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(headers[header::RETRY_AFTER], "30");
        let err: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(err.code, "cooldown");
        assert_eq!(err.details.unwrap()["retry_after_secs"], 30);

        // History is not rate limited.
        let (status, _, _) =
            send(&router, "GET", &format!("/players/{PLAYER}/history"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(state.metrics.cooldown_hits_total.get(), 1);
    }

    #[tokio::test]
    async fn player_names_are_remembered() {
        let (state, _) = test_app_state(Duration::ZERO);
        let router = create_router(state.clone());

        let (status, _, _) = send(
            &router,
            "POST",
            &format!("/players/{PLAYER}/purchase"),
            Some(serde_json::json!({ "product_id": 1, "player_name": "Steve" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let player: PlayerId = PLAYER.parse().unwrap();
        assert_eq!(state.names.display_name(&player).as_deref(), Some("Steve"));
    }
}
