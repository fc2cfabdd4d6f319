//! Axum router and all HTTP handlers for dms-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers so tests can use the bare router.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use dms_db::CancelOutcome;
use dms_schemas::{NewOrder, OrderId, OrderStatus, ORDER_UPDATES_TOPIC};
use futures_util::{Stream, StreamExt};
use tokio::sync::{broadcast, watch};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::{
    api_types::{
        CancelResponse, CreateOrderRequest, ErrorResponse, HealthResponse, OrdersQuery,
        StatusResponse,
    },
    state::{AppState, BusMsg},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status_handler))
        .route("/v1/stream", get(stream))
        .route("/v1/orders", post(create_order).get(list_customer_orders))
        .route("/v1/orders/:id", get(get_order))
        .route("/v1/orders/:id/cancel", post(cancel_order))
        .route("/v1/admin/orders", get(list_all_orders))
        .with_state(state)
}

fn error(code: StatusCode, msg: impl Into<String>) -> Response {
    (code, Json(ErrorResponse::new(msg))).into_response()
}

fn store_error(op: &str, e: anyhow::Error) -> Response {
    warn!(op, error = %format!("{e:#}"), "order store call failed");
    error(StatusCode::INTERNAL_SERVER_ERROR, format!("{op} failed"))
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /v1/status
// ---------------------------------------------------------------------------

pub(crate) async fn status_handler(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    let active_order_ids = st.progression.active_orders();
    (
        StatusCode::OK,
        Json(StatusResponse {
            uptime_secs: st.uptime_secs(),
            active_progressions: active_order_ids.len(),
            active_order_ids,
            store_backend: st.store.backend_name().to_string(),
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /v1/orders
// ---------------------------------------------------------------------------

/// Persist a new order in `created` and start its progression.
pub(crate) async fn create_order(
    State(st): State<Arc<AppState>>,
    Json(req): Json<CreateOrderRequest>,
) -> Response {
    let item = req.item.trim();
    if item.is_empty() {
        return error(StatusCode::BAD_REQUEST, "item must not be empty");
    }
    if req.customer_id <= 0 {
        return error(StatusCode::BAD_REQUEST, "customer_id must be positive");
    }

    let new = NewOrder {
        customer_id: req.customer_id,
        item: item.to_string(),
    };
    let order = match st.store.create_order(&new).await {
        Ok(o) => o,
        Err(e) => return store_error("create order", e),
    };

    let started = st.progression.start(order.id);
    info!(order_id = order.id, customer_id = order.customer_id, started, "order created");
    (StatusCode::CREATED, Json(order)).into_response()
}

// ---------------------------------------------------------------------------
// GET /v1/orders?customer_id=N   GET /v1/admin/orders
// ---------------------------------------------------------------------------

pub(crate) async fn list_customer_orders(
    State(st): State<Arc<AppState>>,
    Query(q): Query<OrdersQuery>,
) -> Response {
    let Some(customer_id) = q.customer_id else {
        return error(StatusCode::BAD_REQUEST, "customer_id query parameter is required");
    };
    match st.store.list_orders(Some(customer_id)).await {
        Ok(orders) => (StatusCode::OK, Json(orders)).into_response(),
        Err(e) => store_error("list orders", e),
    }
}

pub(crate) async fn list_all_orders(State(st): State<Arc<AppState>>) -> Response {
    match st.store.list_orders(None).await {
        Ok(orders) => (StatusCode::OK, Json(orders)).into_response(),
        Err(e) => store_error("list orders", e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/orders/:id
// ---------------------------------------------------------------------------

pub(crate) async fn get_order(
    State(st): State<Arc<AppState>>,
    Path(id): Path<OrderId>,
) -> Response {
    match st.store.fetch_order(id).await {
        Ok(Some(order)) => (StatusCode::OK, Json(order)).into_response(),
        Ok(None) => error(StatusCode::NOT_FOUND, format!("order {id} not found")),
        Err(e) => store_error("fetch order", e),
    }
}

// ---------------------------------------------------------------------------
// POST /v1/orders/:id/cancel
// ---------------------------------------------------------------------------

/// Cancel in storage, stop the task, announce the cancellation.
///
/// The stored write comes first: a task that wakes between the write and the
/// stop sees `cancelled` on its re-read and exits without writing.
pub(crate) async fn cancel_order(
    State(st): State<Arc<AppState>>,
    Path(id): Path<OrderId>,
) -> Response {
    match st.store.cancel_order(id).await {
        Ok(CancelOutcome::Cancelled) => {
            let stopped = st.progression.stop(id);
            st.progression.publish_now(id, OrderStatus::Cancelled);
            info!(order_id = id, stopped, "order cancelled");
            (
                StatusCode::OK,
                Json(CancelResponse {
                    order_id: id,
                    status: OrderStatus::Cancelled.as_str().to_string(),
                }),
            )
                .into_response()
        }
        Ok(CancelOutcome::AlreadyTerminal(status)) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: format!("order {id} is already {status}"),
                status: Some(status),
            }),
        )
            .into_response(),
        Ok(CancelOutcome::NotFound) => {
            error(StatusCode::NOT_FOUND, format!("order {id} not found"))
        }
        Err(e) => store_error("cancel order", e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let events = broadcast_to_sse(st.bus.subscribe()).take_until(closed(st.closing()));

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

async fn closed(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|c| *c).await;
}

fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        let (event_name, data) = match msg.ok()? {
            m @ BusMsg::Heartbeat { .. } => ("heartbeat", serde_json::to_string(&m).ok()?),
            BusMsg::OrderUpdate(u) => (ORDER_UPDATES_TOPIC, serde_json::to_string(&u).ok()?),
        };
        Some(Ok(Event::default().event(event_name).data(data)))
    })
}
