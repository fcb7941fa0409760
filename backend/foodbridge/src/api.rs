//! Axum REST API handlers.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post, put},
    Json, Router,
};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{error, info, warn};

use crate::context::ActorContext;
use crate::coordinator::{ClaimCoordinator, ClaimRequest};
use crate::db;
use crate::errors::{AppError, ErrorResponse, Result};
use crate::feed::{ChangeFeed, DonationFilter, RequestFilter, SnapshotFilter, Subscription};
use crate::lifecycle::{self, NewDonation, NewRequest, ProfileInput};
use crate::models::{Donation, GeoPoint, Quantity, Request, RequestStatus};
use crate::notify::{
    Delivery, FoodItem, FulfillmentDetails, HandoverNotice, NotificationGateway, Party,
    TemplateEmail,
};

/// Header carrying the acting party's uid.
pub const USER_HEADER: &str = "x-user-id";

pub struct ApiState {
    pub pool: SqlitePool,
    pub feed: ChangeFeed,
    pub gateway: Arc<dyn NotificationGateway>,
    pub coordinator: ClaimCoordinator,
}

impl ApiState {
    pub fn new(pool: SqlitePool, feed: ChangeFeed, gateway: Arc<dyn NotificationGateway>) -> Self {
        let coordinator = ClaimCoordinator::new(pool.clone(), feed.clone(), gateway.clone());
        Self {
            pool,
            feed,
            gateway,
            coordinator,
        }
    }

    async fn actor(&self, headers: &HeaderMap) -> Result<ActorContext> {
        let uid = headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthenticated(format!("missing {USER_HEADER} header")))?;
        ActorContext::resolve(&self.pool, uid).await
    }
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/profiles/:uid", put(save_profile).get(get_profile))
        .route("/api/donations", post(create_donation).get(list_donations))
        .route("/api/donations/stream", get(stream_donations))
        .route("/api/donations/:id/confirm", post(confirm_receipt))
        .route("/api/requests", post(create_request).get(list_requests))
        .route("/api/requests/stream", get(stream_requests))
        .route("/api/requests/:id/claim", post(claim_request))
        .route("/api/notify-donation", post(notify_donation))
        .route("/api/claim-food", post(claim_food_email))
        .route("/api/confirm-receipt", post(confirm_receipt_email))
        .route("/api/send-fulfillment-email", post(send_fulfillment_email))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct DonationsResponse {
    pub count: usize,
    pub donations: Vec<Donation>,
}

#[derive(Serialize)]
pub struct RequestsResponse {
    pub count: usize,
    pub requests: Vec<Request>,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

impl SuccessResponse {
    fn ok() -> Json<Self> {
        Json(Self {
            success: true,
            message: None,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationQuery {
    pub restaurant_id: Option<String>,
    pub orphanage_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestQuery {
    pub status: Option<RequestStatus>,
    pub orphanage_id: Option<String>,
}

/// Claim body; the request id comes from the path.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimBody {
    pub item_needed: String,
    pub quantity: Quantity,
    pub orphanage_id: String,
    pub orphanage_name: String,
    #[serde(default)]
    pub origin: Option<GeoPoint>,
}

/// `{restaurant, orphanage, food}`; any part may be missing on the wire.
#[derive(Debug, Deserialize)]
pub struct HandoverBody {
    pub restaurant: Option<Party>,
    pub orphanage: Option<Party>,
    pub food: Option<FoodItem>,
}

impl HandoverBody {
    fn into_notice(self) -> Option<HandoverNotice> {
        Some(HandoverNotice {
            restaurant: self.restaurant?,
            orphanage: self.orphanage?,
            food: self.food?,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct FulfillmentBody {
    pub donation: Option<FulfillmentDetails>,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `PUT /api/profiles/:uid`
pub async fn save_profile(
    State(state): State<Arc<ApiState>>,
    Path(uid): Path<String>,
    Json(input): Json<ProfileInput>,
) -> Result<impl IntoResponse> {
    let profile = lifecycle::save_profile(&state.pool, &uid, input).await?;
    Ok(Json(profile))
}

/// `GET /api/profiles/:uid`
pub async fn get_profile(
    State(state): State<Arc<ApiState>>,
    Path(uid): Path<String>,
) -> Result<impl IntoResponse> {
    let profile = db::get_profile(&state.pool, &uid)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("profile {uid}")))?;
    Ok(Json(profile))
}

/// `POST /api/donations`
pub async fn create_donation(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(input): Json<NewDonation>,
) -> Result<impl IntoResponse> {
    let ctx = state.actor(&headers).await?;
    let donation = lifecycle::create_donation(&state.pool, &state.feed, &ctx, input).await?;
    Ok((StatusCode::CREATED, Json(donation)))
}

fn donation_filter(query: DonationQuery) -> Result<DonationFilter> {
    match (query.restaurant_id, query.orphanage_id) {
        (Some(id), _) => Ok(DonationFilter::Restaurant(id)),
        (None, Some(id)) => Ok(DonationFilter::Orphanage(id)),
        (None, None) => Err(AppError::Validation(
            "restaurantId or orphanageId is required".to_string(),
        )),
    }
}

/// `GET /api/donations?restaurantId=…` or `?orphanageId=…`
///
/// Newest first.
pub async fn list_donations(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<DonationQuery>,
) -> Result<impl IntoResponse> {
    let donations = donation_filter(query)?.snapshot(&state.pool).await?;
    Ok(Json(DonationsResponse {
        count: donations.len(),
        donations,
    }))
}

/// `GET /api/donations/stream?restaurantId=…` or `?orphanageId=…`
///
/// Server-sent `snapshot` events: the current listing, then a fresh one
/// after every committed donation change.
pub async fn stream_donations(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<DonationQuery>,
) -> Result<impl IntoResponse> {
    let filter = donation_filter(query)?;
    info!("Opening donation stream for {filter:?}");
    let subscription = state.feed.subscribe(filter);
    Ok(Sse::new(snapshot_events(subscription)).keep_alive(KeepAlive::default()))
}

/// `POST /api/donations/:id/confirm`
pub async fn confirm_receipt(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(donation_id): Path<String>,
) -> Result<impl IntoResponse> {
    let ctx = state.actor(&headers).await?;
    let donation = lifecycle::confirm_receipt(
        &state.pool,
        &state.feed,
        state.gateway.as_ref(),
        &ctx,
        &donation_id,
    )
    .await?;
    Ok(Json(donation))
}

/// `POST /api/requests`
pub async fn create_request(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(input): Json<NewRequest>,
) -> Result<impl IntoResponse> {
    let ctx = state.actor(&headers).await?;
    let request = lifecycle::create_request(&state.pool, &state.feed, &ctx, input).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

/// `GET /api/requests?status=Pending` or `?orphanageId=…`
pub async fn list_requests(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<RequestQuery>,
) -> Result<impl IntoResponse> {
    let requests: Vec<Request> = match (query.orphanage_id, query.status) {
        (Some(id), status) => db::list_requests_for_orphanage(&state.pool, &id)
            .await?
            .into_iter()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .collect(),
        (None, None | Some(RequestStatus::Pending)) => {
            db::list_pending_requests(&state.pool).await?
        }
        (None, Some(RequestStatus::Fulfilled)) => {
            return Err(AppError::Validation(
                "fulfilled requests are listed per orphanage".to_string(),
            ))
        }
    };
    Ok(Json(RequestsResponse {
        count: requests.len(),
        requests,
    }))
}

/// `GET /api/requests/stream?status=Pending` or `?orphanageId=…`
pub async fn stream_requests(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<RequestQuery>,
) -> Result<impl IntoResponse> {
    let filter = match (query.orphanage_id, query.status) {
        (Some(id), None) => RequestFilter::Orphanage(id),
        (None, None | Some(RequestStatus::Pending)) => RequestFilter::Pending,
        _ => {
            return Err(AppError::Validation(
                "stream either status=Pending or one orphanageId".to_string(),
            ))
        }
    };
    info!("Opening request stream for {filter:?}");
    let subscription = state.feed.subscribe(filter);
    Ok(Sse::new(snapshot_events(subscription)).keep_alive(KeepAlive::default()))
}

/// Turn a subscription into `snapshot` events. The subscription, and with it
/// the dispatch task, is dropped when the client disconnects.
fn snapshot_events<T>(
    subscription: Subscription<T>,
) -> impl Stream<Item = std::result::Result<Event, Infallible>>
where
    T: Serialize + Send + 'static,
{
    stream::unfold(subscription, |mut subscription| async move {
        let Some(items) = subscription.next().await else {
            return None;
        };
        let event = match Event::default().event("snapshot").json_data(&items) {
            Ok(event) => event,
            Err(e) => {
                warn!("Could not encode snapshot: {e}");
                Event::default().event("error").data("snapshot unavailable")
            }
        };
        Some((Ok::<_, Infallible>(event), subscription))
    })
}

/// `POST /api/requests/:id/claim`
///
/// Every failure is reported as "Claim failed"; the cause is in the logs.
pub async fn claim_request(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
    body: std::result::Result<Json<ClaimBody>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            warn!("Rejected claim body for request {request_id}: {rejection}");
            return error_response(StatusCode::BAD_REQUEST, "Claim failed: Invalid data");
        }
    };
    let ctx = match state.actor(&headers).await {
        Ok(ctx) => ctx,
        Err(e) => return claim_failed(e),
    };
    let claim = ClaimRequest {
        request_id,
        item_needed: body.item_needed,
        quantity: body.quantity,
        orphanage_id: body.orphanage_id,
        orphanage_name: body.orphanage_name,
        origin: body.origin,
    };

    match state.coordinator.claim(&ctx, claim).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => claim_failed(e),
    }
}

fn claim_failed(e: AppError) -> Response {
    let status = e.status_code();
    let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
        "Claim failed".to_string()
    } else {
        format!("Claim failed: {e}")
    };
    error_response(status, message)
}

/// `POST /api/notify-donation`
///
/// Acknowledgement only; subscribers learn about donations from the feed.
pub async fn notify_donation() -> impl IntoResponse {
    Json(SuccessResponse {
        success: true,
        message: Some("Donation logged."),
    })
}

/// `POST /api/claim-food`
pub async fn claim_food_email(
    State(state): State<Arc<ApiState>>,
    body: std::result::Result<Json<HandoverBody>, JsonRejection>,
) -> Response {
    let Some(notice) = handover_notice(body) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid data");
    };
    send_email(state.gateway.as_ref(), TemplateEmail::claim(&notice), "Claim").await
}

/// `POST /api/confirm-receipt`
pub async fn confirm_receipt_email(
    State(state): State<Arc<ApiState>>,
    body: std::result::Result<Json<HandoverBody>, JsonRejection>,
) -> Response {
    let Some(notice) = handover_notice(body) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid data");
    };
    send_email(state.gateway.as_ref(), TemplateEmail::receipt(&notice), "Confirm").await
}

/// `POST /api/send-fulfillment-email`
pub async fn send_fulfillment_email(
    State(state): State<Arc<ApiState>>,
    body: std::result::Result<Json<FulfillmentBody>, JsonRejection>,
) -> Response {
    let details = match body {
        Ok(Json(FulfillmentBody {
            donation: Some(details),
        })) => details,
        Ok(_) => return error_response(StatusCode::BAD_REQUEST, "Invalid data"),
        Err(rejection) => {
            warn!("Rejected fulfillment email body: {rejection}");
            return error_response(StatusCode::BAD_REQUEST, "Invalid data");
        }
    };
    send_email(
        state.gateway.as_ref(),
        TemplateEmail::fulfillment(&details),
        "Fulfillment",
    )
    .await
}

fn handover_notice(
    body: std::result::Result<Json<HandoverBody>, JsonRejection>,
) -> Option<HandoverNotice> {
    match body {
        Ok(Json(body)) => body.into_notice(),
        Err(rejection) => {
            warn!("Rejected email body: {rejection}");
            None
        }
    }
}

async fn send_email(
    gateway: &dyn NotificationGateway,
    email: TemplateEmail,
    label: &str,
) -> Response {
    match gateway.send(&email).await {
        Ok(Delivery::Sent) => SuccessResponse::ok().into_response(),
        Ok(Delivery::Skipped) => Json(SuccessResponse {
            success: true,
            message: Some("Email service not configured, nothing sent."),
        })
        .into_response(),
        Err(e) => {
            error!("{label} email failed: {e}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Email failed")
        }
    }
}

// ─────────────────────────────────────────────────────────
// Router tests
// ─────────────────────────────────────────────────────────
