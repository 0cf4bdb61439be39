//! Process-local [`OrderStore`] used by tests and local development.
//!
//! A single mutex guards all state, which gives every operation the same
//! all-or-nothing, serialized behaviour the Postgres store gets from its
//! transactions and advisory locks.

use {
    crate::domain::{
        audit::NewAuditEntry,
        error::CheckoutError,
        id::OrderId,
        order::{NewOrder, OrderState, PurchaseOrder},
        payment::{
            AttemptState, NewPaymentAttempt, PaymentAttempt, PaymentLookup, plan_reconciliation,
        },
        provider::{CreatedPayment, ProviderPaymentSnapshot},
        store::{OrderDetails, OrderStore, ReconcileResult, StoreFuture},
        ticket::{Ticket, TicketState, allocate, parse_ticket_number, sort_by_number},
    },
    chrono::{DateTime, Utc},
    std::collections::HashMap,
    tokio::sync::Mutex,
    uuid::Uuid,
};

#[derive(Default)]
struct MemoryState {
    orders: HashMap<OrderId, PurchaseOrder>,
    tickets: Vec<Ticket>,
    attempts: Vec<PaymentAttempt>,
    audit: Vec<NewAuditEntry>,
}

impl MemoryState {
    fn highest_ticket(&self, raffle_id: &str) -> Option<&str> {
        self.tickets
            .iter()
            .filter(|t| t.raffle_id == raffle_id)
            .max_by_key(|t| parse_ticket_number(Some(t.sequential_number.as_str())))
            .map(|t| t.sequential_number.as_str())
    }

    fn attempt_index(&self, id: Uuid) -> Result<usize, CheckoutError> {
        self.attempts
            .iter()
            .position(|a| a.id == id)
            .ok_or_else(|| CheckoutError::PaymentNotFound(id.to_string()))
    }

    fn void_tickets(&mut self, order_id: OrderId) {
        for ticket in self.tickets.iter_mut().filter(|t| t.order_id == order_id) {
            ticket.state = TicketState::Void;
        }
    }
}

#[derive(Default)]
pub struct MemoryOrderStore {
    state: Mutex<MemoryState>,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every order, ticket, attempt and audit row.
    pub async fn reset(&self) {
        *self.state.lock().await = MemoryState::default();
    }

    pub async fn audit_entries(&self, entity_id: Uuid) -> Vec<NewAuditEntry> {
        self.state
            .lock()
            .await
            .audit
            .iter()
            .filter(|e| e.entity_id == entity_id)
            .cloned()
            .collect()
    }

    pub async fn tickets_for_raffle(&self, raffle_id: &str) -> Vec<Ticket> {
        self.state
            .lock()
            .await
            .tickets
            .iter()
            .filter(|t| t.raffle_id == raffle_id)
            .cloned()
            .collect()
    }

    pub async fn attempts_for_order(&self, order_id: OrderId) -> Vec<PaymentAttempt> {
        self.state
            .lock()
            .await
            .attempts
            .iter()
            .filter(|a| a.order_id == order_id)
            .cloned()
            .collect()
    }
}

impl OrderStore for MemoryOrderStore {
    fn create_order_with_tickets(
        &self,
        order: NewOrder,
    ) -> StoreFuture<'_, (PurchaseOrder, Vec<Ticket>)> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let drafts = allocate(
                order.raffle_id(),
                order.quantity(),
                &order.buyer().name,
                state.highest_ticket(order.raffle_id()),
            )?;

            for draft in &drafts {
                let taken = state.tickets.iter().any(|t| {
                    t.raffle_id == draft.raffle_id && t.sequential_number == draft.sequential_number
                });
                if taken {
                    return Err(CheckoutError::Conflict(format!(
                        "ticket {} already sold for raffle {}",
                        draft.sequential_number, draft.raffle_id
                    )));
                }
            }

            let now = Utc::now();
            let created = order.into_order(now);
            let tickets: Vec<Ticket> = drafts
                .into_iter()
                .map(|d| d.into_ticket(created.id, now))
                .collect();

            state.audit.push(NewAuditEntry::new(
                "order",
                created.id.as_uuid(),
                "created",
                "checkout",
                serde_json::json!({
                    "raffle_id": created.raffle_id,
                    "quantity": created.quantity,
                    "total": created.total.units(),
                }),
            ));
            state.orders.insert(created.id, created.clone());
            state.tickets.extend(tickets.iter().cloned());
            Ok((created, tickets))
        })
    }

    fn get_order(&self, id: OrderId) -> StoreFuture<'_, Option<PurchaseOrder>> {
        Box::pin(async move { Ok(self.state.lock().await.orders.get(&id).cloned()) })
    }

    fn get_order_details(&self, id: OrderId) -> StoreFuture<'_, Option<OrderDetails>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            let Some(order) = state.orders.get(&id).cloned() else {
                return Ok(None);
            };
            let mut tickets: Vec<Ticket> = state
                .tickets
                .iter()
                .filter(|t| t.order_id == id)
                .cloned()
                .collect();
            sort_by_number(&mut tickets);
            let attempts = state
                .attempts
                .iter()
                .filter(|a| a.order_id == id)
                .cloned()
                .collect();
            Ok(Some(OrderDetails {
                order,
                tickets,
                attempts,
            }))
        })
    }

    fn update_order_state<'a>(
        &'a self,
        id: OrderId,
        next: OrderState,
        actor: &'a str,
    ) -> StoreFuture<'a, PurchaseOrder> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let order = state
                .orders
                .get_mut(&id)
                .ok_or_else(|| CheckoutError::OrderNotFound(id.to_string()))?;
            let old = order.state;
            order.transition_state(next, Utc::now())?;
            let updated = order.clone();

            if matches!(next, OrderState::Expired | OrderState::Cancelled) {
                state.void_tickets(id);
            }
            state.audit.push(NewAuditEntry::new(
                "order",
                id.as_uuid(),
                "state_changed",
                actor,
                serde_json::json!({ "old_state": old.as_str(), "new_state": next.as_str() }),
            ));
            Ok(updated)
        })
    }

    fn find_payment_attempt<'a>(
        &'a self,
        lookup: &'a PaymentLookup,
    ) -> StoreFuture<'a, Option<PaymentAttempt>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state
                .attempts
                .iter()
                .rev()
                .find(|a| lookup.matches(a))
                .cloned())
        })
    }

    fn create_payment_attempt(&self, attempt: NewPaymentAttempt) -> StoreFuture<'_, PaymentAttempt> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state
                .orders
                .get(&attempt.order_id())
                .ok_or_else(|| CheckoutError::OrderNotFound(attempt.order_id().to_string()))?
                .ensure_accepts_payment()?;
            state.audit.push(attempt.audit_entry("checkout"));
            let created = attempt.into_attempt(Utc::now());
            state.attempts.push(created.clone());
            Ok(created)
        })
    }

    fn record_provider_payment<'a>(
        &'a self,
        attempt_id: Uuid,
        created: &'a CreatedPayment,
    ) -> StoreFuture<'a, PaymentAttempt> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let idx = state.attempt_index(attempt_id)?;
            let now = Utc::now();

            let attempt = &mut state.attempts[idx];
            attempt.external_id = Some(created.external_id.clone());
            attempt.notification_token = created.notification_token.clone();
            attempt.status_detail = Some(created.status.as_str().to_string());
            attempt.redirect_urls = created.redirect_urls.clone();
            attempt.metadata = created.raw.clone();
            attempt.updated_at = now;
            let attempt = attempt.clone();

            if let Some(order) = state.orders.get_mut(&attempt.order_id) {
                order.payment_id = Some(created.external_id.clone());
                order.redirect_urls = Some(created.redirect_urls.clone());
                order.updated_at = now;
            }
            Ok(attempt)
        })
    }

    fn record_initiation_failure<'a>(
        &'a self,
        attempt_id: Uuid,
        detail: &'a str,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let idx = state.attempt_index(attempt_id)?;
            state.attempts[idx].status_detail = Some(detail.to_string());
            state.attempts[idx].updated_at = Utc::now();
            state.audit.push(NewAuditEntry::new(
                "payment_attempt",
                attempt_id,
                "provider_failed",
                "checkout",
                serde_json::json!({ "detail": detail }),
            ));
            Ok(())
        })
    }

    fn apply_reconciliation<'a>(
        &'a self,
        attempt_id: Uuid,
        snapshot: &'a ProviderPaymentSnapshot,
        actor: &'a str,
    ) -> StoreFuture<'a, ReconcileResult> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let idx = state.attempt_index(attempt_id)?;
            let order_id = state.attempts[idx].order_id;
            let order_before = state
                .orders
                .get(&order_id)
                .map(|o| o.state)
                .ok_or_else(|| CheckoutError::OrderNotFound(order_id.to_string()))?;
            let other_session_open = state.attempts.iter().any(|a| {
                a.order_id == order_id
                    && a.id != attempt_id
                    && a.external_id.is_some()
                    && a.state == AttemptState::Pending
            });

            let plan = plan_reconciliation(
                state.attempts[idx].state,
                order_before,
                other_session_open,
                &snapshot.status,
            );
            let now = Utc::now();

            let entries = plan.audit_entries(&state.attempts[idx], order_before, snapshot, actor);
            state.attempts[idx].apply_snapshot(&plan, snapshot, now);
            let attempt = state.attempts[idx].clone();

            let mut newly_paid = false;
            if let Some(next) = plan.order_transition {
                if let Some(order) = state.orders.get_mut(&order_id) {
                    order.transition_state(next, now)?;
                    newly_paid = next == OrderState::Paid;
                }
                if matches!(next, OrderState::Expired | OrderState::Cancelled) {
                    state.void_tickets(order_id);
                }
            }
            state.audit.extend(entries);

            let order = state
                .orders
                .get(&order_id)
                .cloned()
                .ok_or_else(|| CheckoutError::OrderNotFound(order_id.to_string()))?;

            Ok(ReconcileResult {
                attempt,
                order,
                outcome: plan.outcome,
                newly_paid,
            })
        })
    }

    fn list_pending_attempts(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> StoreFuture<'_, Vec<PaymentAttempt>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            let limit = usize::try_from(limit).unwrap_or(0);
            let mut pending: Vec<&PaymentAttempt> = state
                .attempts
                .iter()
                .filter(|a| {
                    a.state == AttemptState::Pending
                        && a.external_id.is_some()
                        && a.created_at < older_than
                        && state
                            .orders
                            .get(&a.order_id)
                            .is_some_and(|o| o.state == OrderState::Pending)
                })
                .collect();
            pending.sort_by_key(|a| (a.updated_at, a.id));
            Ok(pending.into_iter().take(limit).cloned().collect())
        })
    }
}
