use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::CheckoutError;

/// Purchase order identifier (UUIDv7, time ordered).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(Uuid);

impl OrderId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn parse(raw: &str) -> Result<Self, CheckoutError> {
        Uuid::parse_str(raw)
            .map(Self)
            .map_err(|_| CheckoutError::OrderNotFound(raw.to_string()))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

/// Locally generated payment transaction identifier (`tx_<uuid>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn generate() -> Self {
        Self(format!("tx_{}", Uuid::now_v7().simple()))
    }

    pub fn new(id: impl Into<String>) -> Result<Self, CheckoutError> {
        let id = id.into();
        if !id.starts_with("tx_") || id.len() <= 3 {
            return Err(CheckoutError::Validation(format!(
                "TransactionId must start with tx_, got: {id}"
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Payment identifier assigned by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalPaymentId(String);

impl ExternalPaymentId {
    pub fn new(id: impl Into<String>) -> Result<Self, CheckoutError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(CheckoutError::Validation(
                "ExternalPaymentId cannot be empty".into(),
            ));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
