use {
    super::error::CheckoutError,
    super::id::OrderId,
    super::order::{NewOrder, OrderState, PurchaseOrder},
    super::payment::{NewPaymentAttempt, PaymentAttempt, PaymentLookup, ReconcileOutcome},
    super::provider::{CreatedPayment, ProviderPaymentSnapshot},
    super::ticket::Ticket,
    chrono::{DateTime, Utc},
    serde::Serialize,
    std::{future::Future, pin::Pin},
    uuid::Uuid,
};

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CheckoutError>> + Send + 'a>>;

/// Order with everything hanging off it, for read-only lookups.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderDetails {
    pub order: PurchaseOrder,
    pub tickets: Vec<Ticket>,
    pub attempts: Vec<PaymentAttempt>,
}

/// State after a reconciliation has been applied.
#[derive(Debug, Clone)]
pub struct ReconcileResult {
    pub attempt: PaymentAttempt,
    pub order: PurchaseOrder,
    pub outcome: ReconcileOutcome,
    /// The order moved to `paid` in this call.
    pub newly_paid: bool,
}

/// Persistence contract for orders, tickets and payment attempts.
///
/// Every method is atomic. `create_order_with_tickets` allocates ticket
/// numbers inside its own transaction, serialized per raffle.
pub trait OrderStore: Send + Sync {
    fn create_order_with_tickets(
        &self,
        order: NewOrder,
    ) -> StoreFuture<'_, (PurchaseOrder, Vec<Ticket>)>;

    fn get_order(&self, id: OrderId) -> StoreFuture<'_, Option<PurchaseOrder>>;

    fn get_order_details(&self, id: OrderId) -> StoreFuture<'_, Option<OrderDetails>>;

    /// Move a pending order to a terminal state. Closing states void the tickets.
    fn update_order_state<'a>(
        &'a self,
        id: OrderId,
        state: OrderState,
        actor: &'a str,
    ) -> StoreFuture<'a, PurchaseOrder>;

    fn find_payment_attempt<'a>(
        &'a self,
        lookup: &'a PaymentLookup,
    ) -> StoreFuture<'a, Option<PaymentAttempt>>;

    fn create_payment_attempt(&self, attempt: NewPaymentAttempt) -> StoreFuture<'_, PaymentAttempt>;

    /// Persist what "create payment" returned on the attempt and, denormalized,
    /// on its order.
    fn record_provider_payment<'a>(
        &'a self,
        attempt_id: Uuid,
        created: &'a CreatedPayment,
    ) -> StoreFuture<'a, PaymentAttempt>;

    fn record_initiation_failure<'a>(
        &'a self,
        attempt_id: Uuid,
        detail: &'a str,
    ) -> StoreFuture<'a, ()>;

    /// Apply a provider snapshot to the attempt and its order in one transaction.
    fn apply_reconciliation<'a>(
        &'a self,
        attempt_id: Uuid,
        snapshot: &'a ProviderPaymentSnapshot,
        actor: &'a str,
    ) -> StoreFuture<'a, ReconcileResult>;

    /// Pending attempts with a provider id, on pending orders, created before `older_than`.
    fn list_pending_attempts(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> StoreFuture<'_, Vec<PaymentAttempt>>;
}
