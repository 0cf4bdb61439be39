use {
    super::error::CheckoutError,
    super::id::{ExternalPaymentId, TransactionId},
    super::money::Money,
    super::payment::ProviderStatus,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::{future::Future, pin::Pin},
};

/// Links the buyer can follow to complete a payment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectUrls {
    pub payment_url: Option<String>,
    pub simplified_transfer_url: Option<String>,
    pub transfer_url: Option<String>,
    pub app_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payer {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Everything the provider needs to open a payment session.
#[derive(Debug, Clone)]
pub struct CreatePaymentRequest {
    pub subject: String,
    pub money: Money,
    pub transaction_id: TransactionId,
    pub return_url: String,
    pub cancel_url: String,
    pub notify_url: String,
    pub payer_email: String,
    pub payer_name: String,
    pub custom: serde_json::Value,
    pub expires_at: DateTime<Utc>,
}

/// What the provider hands back from "create payment".
#[derive(Debug, Clone)]
pub struct CreatedPayment {
    pub external_id: ExternalPaymentId,
    pub status: ProviderStatus,
    pub redirect_urls: RedirectUrls,
    pub notification_token: Option<String>,
    pub raw: serde_json::Value,
}

/// Authoritative payment state as fetched from the provider API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderPaymentSnapshot {
    pub external_id: ExternalPaymentId,
    pub status: ProviderStatus,
    pub status_detail: Option<String>,
    pub payer: Payer,
    pub redirect_urls: RedirectUrls,
    pub paid_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub raw: serde_json::Value,
}

pub trait PaymentGateway: Send + Sync {
    fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CreatedPayment, CheckoutError>> + Send + '_>>;

    fn get_payment(
        &self,
        id: &ExternalPaymentId,
    ) -> Pin<Box<dyn Future<Output = Result<ProviderPaymentSnapshot, CheckoutError>> + Send + '_>>;
}
