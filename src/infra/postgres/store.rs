use {
    super::{audit_repo, order_repo, payment_repo},
    crate::domain::{
        audit::NewAuditEntry,
        error::CheckoutError,
        id::OrderId,
        order::{NewOrder, OrderState, PurchaseOrder},
        payment::{NewPaymentAttempt, PaymentAttempt, PaymentLookup, plan_reconciliation},
        provider::{CreatedPayment, ProviderPaymentSnapshot},
        store::{OrderDetails, OrderStore, ReconcileResult, StoreFuture},
        ticket::{Ticket, allocate},
    },
    chrono::{DateTime, Utc},
    sqlx::{PgPool, Postgres, Transaction},
    uuid::Uuid,
};

/// [`OrderStore`] backed by Postgres. Each operation runs in its own transaction.
#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, CheckoutError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET LOCAL lock_timeout = '5s'")
            .execute(&mut *tx)
            .await?;
        Ok(tx)
    }

    async fn create_order_inner(
        &self,
        order: NewOrder,
    ) -> Result<(PurchaseOrder, Vec<Ticket>), CheckoutError> {
        let mut tx = self.begin().await?;

        order_repo::lock_raffle(&mut tx, order.raffle_id()).await?;
        let highest = order_repo::highest_ticket_number(&mut tx, order.raffle_id()).await?;
        let drafts = allocate(
            order.raffle_id(),
            order.quantity(),
            &order.buyer().name,
            highest.as_deref(),
        )?;

        let created = order_repo::insert_order(&mut tx, &order).await?;
        let tickets = order_repo::insert_tickets(&mut tx, created.id, drafts).await?;

        audit_repo::insert_audit_entry(
            &mut tx,
            &NewAuditEntry::new(
                "order",
                created.id.as_uuid(),
                "created",
                "checkout",
                serde_json::json!({
                    "raffle_id": created.raffle_id,
                    "quantity": created.quantity,
                    "total": created.total.units(),
                    "first_ticket": tickets.first().map(|t| t.sequential_number.as_str()),
                }),
            ),
        )
        .await?;

        tx.commit().await?;
        Ok((created, tickets))
    }

    async fn get_order_details_inner(
        &self,
        id: OrderId,
    ) -> Result<Option<OrderDetails>, CheckoutError> {
        let mut conn = self.pool.acquire().await?;
        let Some(order) = order_repo::get_order(&mut conn, id).await? else {
            return Ok(None);
        };
        let tickets = order_repo::list_tickets(&mut conn, id).await?;
        let attempts = payment_repo::list_attempts(&mut conn, id).await?;
        Ok(Some(OrderDetails {
            order,
            tickets,
            attempts,
        }))
    }

    async fn update_order_state_inner(
        &self,
        id: OrderId,
        next: OrderState,
        actor: &str,
    ) -> Result<PurchaseOrder, CheckoutError> {
        let mut tx = self.begin().await?;
        let mut order = order_repo::get_order_for_update(&mut tx, id)
            .await?
            .ok_or_else(|| CheckoutError::OrderNotFound(id.to_string()))?;
        let old = order.state;
        order.transition_state(next, Utc::now())?;

        order_repo::update_order_state(&mut tx, &order).await?;
        if matches!(next, OrderState::Expired | OrderState::Cancelled) {
            order_repo::void_tickets(&mut tx, id).await?;
        }
        audit_repo::insert_audit_entry(
            &mut tx,
            &NewAuditEntry::new(
                "order",
                id.as_uuid(),
                "state_changed",
                actor,
                serde_json::json!({ "old_state": old.as_str(), "new_state": next.as_str() }),
            ),
        )
        .await?;
        tx.commit().await?;
        Ok(order)
    }

    async fn create_payment_attempt_inner(
        &self,
        attempt: NewPaymentAttempt,
    ) -> Result<PaymentAttempt, CheckoutError> {
        let mut tx = self.begin().await?;
        let order = order_repo::get_order_for_update(&mut tx, attempt.order_id())
            .await?
            .ok_or_else(|| CheckoutError::OrderNotFound(attempt.order_id().to_string()))?;
        order.ensure_accepts_payment()?;

        let created = payment_repo::insert_attempt(&mut tx, &attempt).await?;
        audit_repo::insert_audit_entry(&mut tx, &attempt.audit_entry("checkout")).await?;
        tx.commit().await?;
        Ok(created)
    }

    async fn record_provider_payment_inner(
        &self,
        attempt_id: Uuid,
        created: &CreatedPayment,
    ) -> Result<PaymentAttempt, CheckoutError> {
        let mut tx = self.begin().await?;
        let attempt = payment_repo::set_provider_payment(&mut tx, attempt_id, created).await?;
        order_repo::set_provider_fields(
            &mut tx,
            attempt.order_id,
            &created.external_id,
            &created.redirect_urls,
        )
        .await?;
        tx.commit().await?;
        Ok(attempt)
    }

    async fn record_initiation_failure_inner(
        &self,
        attempt_id: Uuid,
        detail: &str,
    ) -> Result<(), CheckoutError> {
        let mut tx = self.begin().await?;
        payment_repo::set_status_detail(&mut tx, attempt_id, detail).await?;
        audit_repo::insert_audit_entry(
            &mut tx,
            &NewAuditEntry::new(
                "payment_attempt",
                attempt_id,
                "provider_failed",
                "checkout",
                serde_json::json!({ "detail": detail }),
            ),
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn apply_reconciliation_inner(
        &self,
        attempt_id: Uuid,
        snapshot: &ProviderPaymentSnapshot,
        actor: &str,
    ) -> Result<ReconcileResult, CheckoutError> {
        let mut tx = self.begin().await?;

        // Lock order: attempt first, then its order.
        let mut attempt = payment_repo::get_attempt_for_update(&mut tx, attempt_id)
            .await?
            .ok_or_else(|| CheckoutError::PaymentNotFound(attempt_id.to_string()))?;
        let mut order = order_repo::get_order_for_update(&mut tx, attempt.order_id)
            .await?
            .ok_or_else(|| CheckoutError::OrderNotFound(attempt.order_id.to_string()))?;
        let other_session_open =
            payment_repo::other_open_session_exists(&mut tx, order.id, attempt.id).await?;

        let order_before = order.state;
        let plan = plan_reconciliation(
            attempt.state,
            order_before,
            other_session_open,
            &snapshot.status,
        );
        let entries = plan.audit_entries(&attempt, order_before, snapshot, actor);
        let now = Utc::now();

        if !attempt.state.is_terminal() {
            attempt.apply_snapshot(&plan, snapshot, now);
            payment_repo::update_attempt(&mut tx, &attempt).await?;
        }

        let mut newly_paid = false;
        if let Some(next) = plan.order_transition {
            order.transition_state(next, now)?;
            order_repo::update_order_state(&mut tx, &order).await?;
            if matches!(next, OrderState::Expired | OrderState::Cancelled) {
                order_repo::void_tickets(&mut tx, order.id).await?;
            }
            newly_paid = next == OrderState::Paid;
        }

        audit_repo::insert_audit_entries(&mut tx, &entries).await?;
        tx.commit().await?;

        Ok(ReconcileResult {
            attempt,
            order,
            outcome: plan.outcome,
            newly_paid,
        })
    }
}

impl OrderStore for PgOrderStore {
    fn create_order_with_tickets(
        &self,
        order: NewOrder,
    ) -> StoreFuture<'_, (PurchaseOrder, Vec<Ticket>)> {
        Box::pin(self.create_order_inner(order))
    }

    fn get_order(&self, id: OrderId) -> StoreFuture<'_, Option<PurchaseOrder>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await?;
            order_repo::get_order(&mut conn, id).await
        })
    }

    fn get_order_details(&self, id: OrderId) -> StoreFuture<'_, Option<OrderDetails>> {
        Box::pin(self.get_order_details_inner(id))
    }

    fn update_order_state<'a>(
        &'a self,
        id: OrderId,
        state: OrderState,
        actor: &'a str,
    ) -> StoreFuture<'a, PurchaseOrder> {
        Box::pin(self.update_order_state_inner(id, state, actor))
    }

    fn find_payment_attempt<'a>(
        &'a self,
        lookup: &'a PaymentLookup,
    ) -> StoreFuture<'a, Option<PaymentAttempt>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await?;
            payment_repo::find_attempt(&mut conn, lookup).await
        })
    }

    fn create_payment_attempt(&self, attempt: NewPaymentAttempt) -> StoreFuture<'_, PaymentAttempt> {
        Box::pin(self.create_payment_attempt_inner(attempt))
    }

    fn record_provider_payment<'a>(
        &'a self,
        attempt_id: Uuid,
        created: &'a CreatedPayment,
    ) -> StoreFuture<'a, PaymentAttempt> {
        Box::pin(self.record_provider_payment_inner(attempt_id, created))
    }

    fn record_initiation_failure<'a>(
        &'a self,
        attempt_id: Uuid,
        detail: &'a str,
    ) -> StoreFuture<'a, ()> {
        Box::pin(self.record_initiation_failure_inner(attempt_id, detail))
    }

    fn apply_reconciliation<'a>(
        &'a self,
        attempt_id: Uuid,
        snapshot: &'a ProviderPaymentSnapshot,
        actor: &'a str,
    ) -> StoreFuture<'a, ReconcileResult> {
        Box::pin(self.apply_reconciliation_inner(attempt_id, snapshot, actor))
    }

    fn list_pending_attempts(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> StoreFuture<'_, Vec<PaymentAttempt>> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await?;
            payment_repo::list_pending(&mut conn, older_than, limit).await
        })
    }
}
