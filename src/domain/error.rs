use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("quantity must be at least 1, got: {0}")]
    InvalidQuantity(i64),

    #[error("order not found: {0}")]
    OrderNotFound(String),

    #[error("payment not found: {0}")]
    PaymentNotFound(String),

    #[error("order {0} is already paid")]
    AlreadyPaid(String),

    #[error("order {order_id} is {state} and no longer accepts payments")]
    OrderClosed { order_id: String, state: String },

    #[error("payment attempt {0} has no provider payment id yet")]
    ExternalIdMissing(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("payment provider: {0}")]
    Provider(String),

    #[error("webhook signature: {0}")]
    WebhookSignature(String),

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}
