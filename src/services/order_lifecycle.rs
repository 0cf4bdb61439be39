use {
    super::notifier::ConfirmationNotifier,
    crate::domain::{
        error::CheckoutError,
        id::{ExternalPaymentId, OrderId, TransactionId},
        money::Money,
        order::{NewOrder, NewOrderParams, OrderState, PurchaseOrder},
        payment::{AttemptState, NewPaymentAttempt, PaymentLookup, ReconcileOutcome},
        provider::{CreatePaymentRequest, PaymentGateway, ProviderPaymentSnapshot, RedirectUrls},
        store::{OrderDetails, OrderStore},
        ticket::Ticket,
    },
    chrono::{DateTime, Utc},
    serde::Serialize,
    std::sync::Arc,
};

/// Static inputs for payment initiation.
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub notify_url: String,
    pub return_url: String,
    pub cancel_url: String,
    pub payment_ttl: chrono::Duration,
}

impl CheckoutSettings {
    pub fn from_base_url(base_url: &str, payment_ttl: chrono::Duration) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            notify_url: format!("{base}/webhooks/khipu"),
            return_url: format!("{base}/checkout/success"),
            cancel_url: format!("{base}/checkout/cancelled"),
            payment_ttl,
        }
    }
}

/// Returned to the buyer-facing caller after a payment session is opened.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInitiation {
    pub order_id: OrderId,
    pub transaction_id: TransactionId,
    pub payment_id: ExternalPaymentId,
    pub notification_token: Option<String>,
    pub redirect_urls: RedirectUrls,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reconciliation {
    pub transaction_id: TransactionId,
    pub payment_state: AttemptState,
    pub order_id: OrderId,
    pub order_state: OrderState,
    pub outcome: ReconcileOutcome,
    pub snapshot: ProviderPaymentSnapshot,
}

/// Drives a raffle order from creation to a terminal state.
pub struct OrderLifecycle {
    store: Arc<dyn OrderStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn ConfirmationNotifier>,
    settings: CheckoutSettings,
}

impl OrderLifecycle {
    pub fn new(
        store: Arc<dyn OrderStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn ConfirmationNotifier>,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
            settings,
        }
    }

    /// Validate the request, allocate tickets and persist the pending order.
    #[tracing::instrument(name = "create_order", skip_all, fields(raffle_id = %params.raffle_id))]
    pub async fn create_order(
        &self,
        params: NewOrderParams,
    ) -> Result<(PurchaseOrder, Vec<Ticket>), CheckoutError> {
        let draft = NewOrder::new(params)?;
        let (order, tickets) = self.store.create_order_with_tickets(draft).await?;
        tracing::info!(
            order_id = %order.id,
            total = %order.total,
            first = tickets.first().map(|t| t.sequential_number.as_str()),
            last = tickets.last().map(|t| t.sequential_number.as_str()),
            "order created"
        );
        Ok((order, tickets))
    }

    /// Open a new payment session at the provider for a pending order.
    ///
    /// Every call that gets past validation leaves exactly one new attempt row.
    /// A provider failure keeps the order, its tickets and the attempt pending.
    #[tracing::instrument(name = "initiate_payment", skip_all, fields(order_id = %order_id))]
    pub async fn initiate(
        &self,
        order_id: OrderId,
        return_url: Option<String>,
        cancel_url: Option<String>,
    ) -> Result<PaymentInitiation, CheckoutError> {
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| CheckoutError::OrderNotFound(order_id.to_string()))?;
        order.ensure_accepts_payment()?;

        let expires_at = Utc::now() + self.settings.payment_ttl;
        let attempt = self
            .store
            .create_payment_attempt(NewPaymentAttempt::for_order(&order, expires_at))
            .await?;

        let request = CreatePaymentRequest {
            subject: payment_subject(&order),
            money: Money::new(order.total, order.currency),
            transaction_id: attempt.transaction_id.clone(),
            return_url: return_url
                .unwrap_or_else(|| with_order_param(&self.settings.return_url, order_id)),
            cancel_url: cancel_url
                .unwrap_or_else(|| with_order_param(&self.settings.cancel_url, order_id)),
            notify_url: self.settings.notify_url.clone(),
            payer_email: order.buyer.email.clone(),
            payer_name: order.buyer.name.clone(),
            custom: serde_json::json!({
                "orderId": order_id,
                "raffleId": order.raffle_id,
                "quantity": order.quantity,
            }),
            expires_at,
        };

        let created = match self.gateway.create_payment(&request).await {
            Ok(created) => created,
            Err(e) => {
                tracing::error!(
                    transaction_id = %attempt.transaction_id,
                    error = %e,
                    "provider rejected payment creation"
                );
                if let Err(record_err) = self
                    .store
                    .record_initiation_failure(attempt.id, &e.to_string())
                    .await
                {
                    tracing::error!(error = %record_err, "failed to record provider failure");
                }
                return Err(e);
            }
        };

        let attempt = self.store.record_provider_payment(attempt.id, &created).await?;
        tracing::info!(
            transaction_id = %attempt.transaction_id,
            external_id = %created.external_id,
            status = %created.status,
            "payment initiated"
        );

        Ok(PaymentInitiation {
            order_id,
            transaction_id: attempt.transaction_id,
            payment_id: created.external_id,
            notification_token: created.notification_token,
            redirect_urls: created.redirect_urls,
            expires_at,
        })
    }

    /// Fetch the authoritative status from the provider and apply it.
    /// `key` is a provider payment id or a local transaction id.
    pub async fn reconcile(&self, key: &str, actor: &str) -> Result<Reconciliation, CheckoutError> {
        self.reconcile_lookup(&PaymentLookup::Key(key.to_string()), actor)
            .await
    }

    #[tracing::instrument(name = "reconcile", skip_all, fields(key = %lookup, actor = actor))]
    pub async fn reconcile_lookup(
        &self,
        lookup: &PaymentLookup,
        actor: &str,
    ) -> Result<Reconciliation, CheckoutError> {
        let attempt = self
            .store
            .find_payment_attempt(lookup)
            .await?
            .ok_or_else(|| CheckoutError::PaymentNotFound(lookup.to_string()))?;
        let external_id = attempt
            .external_id
            .clone()
            .ok_or_else(|| CheckoutError::ExternalIdMissing(attempt.transaction_id.to_string()))?;

        let snapshot = self.gateway.get_payment(&external_id).await.inspect_err(|e| {
            tracing::error!(external_id = %external_id, error = %e, "provider status fetch failed");
        })?;

        let result = self
            .store
            .apply_reconciliation(attempt.id, &snapshot, actor)
            .await?;

        match result.outcome {
            ReconcileOutcome::SuccessOnClosedOrder => tracing::warn!(
                transaction_id = %attempt.transaction_id,
                order_id = %result.order.id,
                order_state = %result.order.state,
                "provider reports success for an order that is no longer pending"
            ),
            outcome => tracing::info!(
                transaction_id = %attempt.transaction_id,
                provider_status = %snapshot.status,
                ?outcome,
                "payment reconciled"
            ),
        }

        if result.newly_paid {
            self.dispatch_confirmation(result.order.id);
        }

        Ok(Reconciliation {
            transaction_id: result.attempt.transaction_id,
            payment_state: result.attempt.state,
            order_id: result.order.id,
            order_state: result.order.state,
            outcome: result.outcome,
            snapshot,
        })
    }

    /// Re-send the ticket confirmation. Returns once the hand-off is scheduled.
    pub async fn resend_confirmation(&self, order_id: OrderId) -> Result<(), CheckoutError> {
        let details = self.order_details(order_id).await?;
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            let order_id = details.order.id;
            if let Err(e) = notifier.send_confirmation(details).await {
                tracing::error!(order_id = %order_id, error = %e, "confirmation delivery failed");
            }
        });
        Ok(())
    }

    pub async fn order_details(&self, order_id: OrderId) -> Result<OrderDetails, CheckoutError> {
        self.store
            .get_order_details(order_id)
            .await?
            .ok_or_else(|| CheckoutError::OrderNotFound(order_id.to_string()))
    }

    /// Administrative cancellation of a pending order.
    pub async fn cancel_order(
        &self,
        order_id: OrderId,
        actor: &str,
    ) -> Result<PurchaseOrder, CheckoutError> {
        let order = self
            .store
            .update_order_state(order_id, OrderState::Cancelled, actor)
            .await?;
        tracing::info!(order_id = %order_id, actor, "order cancelled");
        Ok(order)
    }

    /// Reconcile pending attempts created before `older_than`.
    /// Failures are logged per attempt and left for the next sweep.
    pub async fn sweep_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<usize, CheckoutError> {
        let pending = self.store.list_pending_attempts(older_than, limit).await?;
        let mut settled = 0;
        for attempt in pending {
            let lookup = PaymentLookup::TransactionId(attempt.transaction_id.to_string());
            match self.reconcile_lookup(&lookup, "sweeper").await {
                Ok(r) if r.payment_state.is_terminal() => settled += 1,
                Ok(_) => {}
                Err(e) => tracing::warn!(
                    transaction_id = %attempt.transaction_id,
                    error = %e,
                    "sweep reconcile failed"
                ),
            }
        }
        Ok(settled)
    }

    fn dispatch_confirmation(&self, order_id: OrderId) {
        let store = Arc::clone(&self.store);
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            let sent = match store.get_order_details(order_id).await {
                Ok(Some(details)) => notifier.send_confirmation(details).await,
                Ok(None) => Err(CheckoutError::OrderNotFound(order_id.to_string())),
                Err(e) => Err(e),
            };
            if let Err(e) = sent {
                tracing::error!(order_id = %order_id, error = %e, "confirmation delivery failed");
            }
        });
    }
}

fn payment_subject(order: &PurchaseOrder) -> String {
    let raffle = order.raffle_title.as_deref().unwrap_or(&order.raffle_id);
    let noun = if order.quantity == 1 { "ticket" } else { "tickets" };
    format!("{raffle}: {} {noun}", order.quantity)
}

fn with_order_param(url: &str, order_id: OrderId) -> String {
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{url}{sep}orderId={order_id}")
}
