use {
    super::signature::{SIGNATURE_HEADER, verify_webhook_signature},
    crate::{
        AppState,
        adapters::api_errors::ApiError,
        domain::{error::CheckoutError, payment::PaymentLookup},
    },
    axum::{
        Form, Json,
        extract::{State, rejection::FormRejection},
        http::HeaderMap,
    },
    serde::Deserialize,
};

pub const WEBHOOK_ACTOR: &str = "webhook:khipu";

#[derive(Debug, Deserialize)]
pub struct KhipuNotification {
    pub api_version: String,
    pub notification_token: String,
}

/// Payment notification callback. The payload only carries a token; the
/// payment state is always re-read from the provider API.
#[tracing::instrument(
    name = "webhook",
    skip_all,
    fields(api_version = tracing::field::Empty, outcome = tracing::field::Empty)
)]
pub async fn notification_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<KhipuNotification>, FormRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Form(notification) = form?;
    tracing::Span::current().record(
        "api_version",
        tracing::field::display(&notification.api_version),
    );

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    if !verify_webhook_signature(
        state.webhook_secret.as_deref(),
        &notification.notification_token,
        signature,
        &notification.api_version,
    ) {
        tracing::warn!(has_signature = signature.is_some(), "rejected notification");
        return Err(CheckoutError::WebhookSignature("signature mismatch".into()).into());
    }

    let lookup = PaymentLookup::Key(notification.notification_token);
    let result = state.lifecycle.reconcile_lookup(&lookup, WEBHOOK_ACTOR).await?;

    tracing::Span::current().record("outcome", tracing::field::debug(&result.outcome));
    Ok(Json(serde_json::json!({
        "status": result.outcome,
        "paymentState": result.payment_state,
        "orderState": result.order_state,
    })))
}
