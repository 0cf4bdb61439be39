use {
    crate::domain::{
        error::CheckoutError,
        id::ExternalPaymentId,
        payment::ProviderStatus,
        provider::{
            CreatePaymentRequest, CreatedPayment, Payer, PaymentGateway, ProviderPaymentSnapshot,
            RedirectUrls,
        },
    },
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::{future::Future, pin::Pin, time::Duration},
};

pub const DEFAULT_API_BASE: &str = "https://payment-api.khipu.com";
const API_KEY_HEADER: &str = "x-api-key";
const NOTIFY_API_VERSION: &str = "3.0";

pub struct KhipuClient {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl KhipuClient {
    pub fn new(api_base: &str, api_key: &str, timeout: Duration) -> Result<Self, CheckoutError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CheckoutError::Provider(format!("http client: {e}")))?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[derive(Serialize)]
struct CreatePaymentBody<'a> {
    subject: &'a str,
    amount: i64,
    currency: &'a str,
    transaction_id: &'a str,
    return_url: &'a str,
    cancel_url: &'a str,
    notify_url: &'a str,
    notify_api_version: &'a str,
    payer_email: &'a str,
    payer_name: &'a str,
    custom: String,
    expires_date: String,
}

#[derive(Deserialize)]
struct CreatePaymentResponse {
    payment_id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    notification_token: Option<String>,
    #[serde(flatten)]
    urls: UrlFields,
}

#[derive(Deserialize, Default)]
struct UrlFields {
    #[serde(default)]
    payment_url: Option<String>,
    #[serde(default)]
    simplified_transfer_url: Option<String>,
    #[serde(default)]
    transfer_url: Option<String>,
    #[serde(default)]
    app_url: Option<String>,
}

impl From<UrlFields> for RedirectUrls {
    fn from(u: UrlFields) -> Self {
        RedirectUrls {
            payment_url: u.payment_url,
            simplified_transfer_url: u.simplified_transfer_url,
            transfer_url: u.transfer_url,
            app_url: u.app_url,
        }
    }
}

#[derive(Deserialize)]
struct PaymentResponse {
    payment_id: String,
    status: String,
    #[serde(default)]
    status_detail: Option<String>,
    #[serde(default)]
    payer_name: Option<String>,
    #[serde(default)]
    payer_email: Option<String>,
    #[serde(default)]
    conciliation_date: Option<String>,
    #[serde(default)]
    expires_date: Option<String>,
    #[serde(flatten)]
    urls: UrlFields,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Decode a successful "create payment" response body.
pub(crate) fn decode_created(raw: serde_json::Value) -> Result<CreatedPayment, CheckoutError> {
    let body: CreatePaymentResponse = serde_json::from_value(raw.clone())
        .map_err(|e| CheckoutError::Provider(format!("unexpected create response: {e}")))?;
    Ok(CreatedPayment {
        external_id: ExternalPaymentId::new(body.payment_id)?,
        status: body
            .status
            .as_deref()
            .map(ProviderStatus::parse)
            .unwrap_or(ProviderStatus::Pending),
        redirect_urls: body.urls.into(),
        notification_token: body.notification_token,
        raw,
    })
}

/// Decode a successful "get payment" response body.
pub(crate) fn decode_snapshot(
    raw: serde_json::Value,
) -> Result<ProviderPaymentSnapshot, CheckoutError> {
    let body: PaymentResponse = serde_json::from_value(raw.clone())
        .map_err(|e| CheckoutError::Provider(format!("unexpected payment response: {e}")))?;
    Ok(ProviderPaymentSnapshot {
        external_id: ExternalPaymentId::new(body.payment_id)?,
        status: ProviderStatus::parse(&body.status),
        status_detail: body.status_detail,
        payer: Payer {
            name: body.payer_name,
            email: body.payer_email,
        },
        redirect_urls: body.urls.into(),
        paid_at: parse_timestamp(body.conciliation_date.as_deref()),
        expires_at: parse_timestamp(body.expires_date.as_deref()),
        raw,
    })
}

/// Error for a non-2xx response, preferring the provider's own message.
pub(crate) fn provider_error(status: reqwest::StatusCode, body: &str) -> CheckoutError {
    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .filter(|m| !m.trim().is_empty());
    match message {
        Some(m) => CheckoutError::Provider(format!("{status}: {m}")),
        None => CheckoutError::Provider(format!("{status}")),
    }
}

impl KhipuClient {
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<serde_json::Value, CheckoutError> {
        let response = request
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| CheckoutError::Provider(format!("request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CheckoutError::Provider(format!("reading response: {e}")))?;

        if !status.is_success() {
            return Err(provider_error(status, &text));
        }
        serde_json::from_str(&text)
            .map_err(|e| CheckoutError::Provider(format!("invalid JSON from provider: {e}")))
    }

    async fn create_payment_inner(
        &self,
        request: CreatePaymentRequest,
    ) -> Result<CreatedPayment, CheckoutError> {
        let body = CreatePaymentBody {
            subject: &request.subject,
            amount: request.money.amount().units(),
            currency: request.money.currency().as_str(),
            transaction_id: request.transaction_id.as_str(),
            return_url: &request.return_url,
            cancel_url: &request.cancel_url,
            notify_url: &request.notify_url,
            notify_api_version: NOTIFY_API_VERSION,
            payer_email: &request.payer_email,
            payer_name: &request.payer_name,
            custom: request.custom.to_string(),
            expires_date: request.expires_at.to_rfc3339(),
        };
        let url = format!("{}/v3/payments", self.api_base);
        let raw = self.send(self.http.post(&url).json(&body)).await?;
        decode_created(raw)
    }

    async fn get_payment_inner(
        &self,
        id: ExternalPaymentId,
    ) -> Result<ProviderPaymentSnapshot, CheckoutError> {
        let url = format!("{}/v3/payments/{}", self.api_base, id.as_str());
        let raw = self.send(self.http.get(&url)).await?;
        decode_snapshot(raw)
    }
}

impl PaymentGateway for KhipuClient {
    fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CreatedPayment, CheckoutError>> + Send + '_>> {
        let request = request.clone();
        Box::pin(self.create_payment_inner(request))
    }

    fn get_payment(
        &self,
        id: &ExternalPaymentId,
    ) -> Pin<Box<dyn Future<Output = Result<ProviderPaymentSnapshot, CheckoutError>> + Send + '_>>
    {
        let id = id.clone();
        Box::pin(self.get_payment_inner(id))
    }
}
