use {
    super::{api_errors::ApiError, khipu::webhook::notification_handler},
    crate::{
        AppState,
        domain::{
            id::OrderId,
            money::Currency,
            order::{Buyer, NewOrderParams, PurchaseOrder},
            store::OrderDetails,
            ticket::Ticket,
        },
        services::order_lifecycle::{PaymentInitiation, Reconciliation},
    },
    axum::{
        Json, Router,
        extract::{DefaultBodyLimit, Path, State, rejection::JsonRejection},
        http::StatusCode,
        routing::{get, post},
    },
    serde::{Deserialize, Serialize},
    std::time::Duration,
    tower_http::{timeout::TimeoutLayer, trace::TraceLayer},
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_BODY_BYTES: usize = 64 * 1024;
const ADMIN_ACTOR: &str = "api";
const VERIFY_ACTOR: &str = "verify";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "ok" }))
        .route("/orders", post(create_order))
        .route("/orders/{id}", get(get_order))
        .route("/orders/{id}/cancel", post(cancel_order))
        .route("/orders/{id}/resend-confirmation", post(resend_confirmation))
        .route("/payments", post(initiate_payment))
        .route(
            "/payments/{key}/verify",
            get(verify_payment).post(verify_payment),
        )
        .route("/webhooks/khipu", post(notification_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub raffle_id: String,
    #[serde(default)]
    pub raffle_title: Option<String>,
    pub quantity: i64,
    pub unit_price: i64,
    #[serde(default)]
    pub currency: Option<String>,
    pub buyer: Buyer,
}

impl TryFrom<CreateOrderRequest> for NewOrderParams {
    type Error = ApiError;

    fn try_from(req: CreateOrderRequest) -> Result<Self, Self::Error> {
        let currency = match req.currency.as_deref() {
            Some(code) => Currency::try_from(code)?,
            None => Currency::default(),
        };
        Ok(NewOrderParams {
            raffle_id: req.raffle_id,
            raffle_title: req.raffle_title,
            quantity: req.quantity,
            unit_price: req.unit_price,
            currency,
            buyer: req.buyer,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct CreatedOrder {
    pub order: PurchaseOrder,
    pub tickets: Vec<Ticket>,
}

async fn create_order(
    State(state): State<AppState>,
    payload: Result<Json<CreateOrderRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedOrder>), ApiError> {
    let Json(req) = payload?;
    let (order, tickets) = state.lifecycle.create_order(req.try_into()?).await?;
    Ok((StatusCode::CREATED, Json(CreatedOrder { order, tickets })))
}

async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OrderDetails>, ApiError> {
    let details = state.lifecycle.order_details(OrderId::parse(&id)?).await?;
    Ok(Json(details))
}

async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PurchaseOrder>, ApiError> {
    let order = state
        .lifecycle
        .cancel_order(OrderId::parse(&id)?, ADMIN_ACTOR)
        .await?;
    Ok(Json(order))
}

async fn resend_confirmation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .lifecycle
        .resend_confirmation(OrderId::parse(&id)?)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePaymentRequest {
    pub order_id: String,
    #[serde(default)]
    pub return_url: Option<String>,
    #[serde(default)]
    pub cancel_url: Option<String>,
}

async fn initiate_payment(
    State(state): State<AppState>,
    payload: Result<Json<InitiatePaymentRequest>, JsonRejection>,
) -> Result<Json<PaymentInitiation>, ApiError> {
    let Json(req) = payload?;
    let order_id = OrderId::parse(&req.order_id)?;
    let initiation = state
        .lifecycle
        .initiate(order_id, req.return_url, req.cancel_url)
        .await?;
    Ok(Json(initiation))
}

async fn verify_payment(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Reconciliation>, ApiError> {
    let result = state.lifecycle.reconcile(&key, VERIFY_ACTOR).await?;
    Ok(Json(result))
}
