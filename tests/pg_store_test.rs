mod common;

use common::*;
use raffle_pay::{
    domain::{
        error::CheckoutError,
        id::ExternalPaymentId,
        order::{NewOrder, OrderState},
        payment::{AttemptState, NewPaymentAttempt, PaymentLookup, ProviderStatus, ReconcileOutcome},
        provider::{CreatedPayment, RedirectUrls},
        store::OrderStore,
        ticket::TicketState,
    },
    infra::postgres::PgOrderStore,
};
use std::collections::HashSet;

const DB: &str = "raffle_pay_test_store";

async fn store() -> PgOrderStore {
    PgOrderStore::new(setup_pool(DB).await)
}

fn raffle(tag: &str) -> String {
    format!("{tag}-{}", uuid::Uuid::now_v7().simple())
}

async fn order_with_payment(
    store: &PgOrderStore,
    raffle_id: &str,
    external_id: &str,
) -> (raffle_pay::domain::order::PurchaseOrder, uuid::Uuid) {
    let (order, _) = store
        .create_order_with_tickets(NewOrder::new(order_params(raffle_id, 2, 3000)).unwrap())
        .await
        .unwrap();
    let attempt = store
        .create_payment_attempt(NewPaymentAttempt::for_order(
            &order,
            chrono::Utc::now() + chrono::Duration::minutes(60),
        ))
        .await
        .unwrap();
    store
        .record_provider_payment(
            attempt.id,
            &CreatedPayment {
                external_id: ExternalPaymentId::new(external_id).unwrap(),
                status: ProviderStatus::Pending,
                redirect_urls: RedirectUrls {
                    payment_url: Some(format!("https://khipu.test/{external_id}")),
                    ..RedirectUrls::default()
                },
                notification_token: Some(format!("tok-{external_id}")),
                raw: serde_json::json!({"payment_id": external_id}),
            },
        )
        .await
        .unwrap();
    (order, attempt.id)
}

#[tokio::test]
#[ignore = "needs a local postgres"]
async fn create_order_allocates_sequential_tickets() {
    let store = store().await;
    let raffle_id = raffle("seq");

    let (order, first) = store
        .create_order_with_tickets(NewOrder::new(order_params(&raffle_id, 3, 3000)).unwrap())
        .await
        .unwrap();
    let (_, second) = store
        .create_order_with_tickets(NewOrder::new(order_params(&raffle_id, 2, 3000)).unwrap())
        .await
        .unwrap();

    assert_eq!(order.total.units(), 9000);
    let numbers: Vec<_> = first
        .iter()
        .chain(&second)
        .map(|t| t.sequential_number.as_str())
        .collect();
    assert_eq!(numbers, ["000001", "000002", "000003", "000004", "000005"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "needs a local postgres"]
async fn concurrent_orders_never_share_numbers() {
    let store = store().await;
    let raffle_id = raffle("race");

    let mut handles = Vec::new();
    for _ in 0..10 {
        let store = store.clone();
        let raffle_id = raffle_id.clone();
        handles.push(tokio::spawn(async move {
            store
                .create_order_with_tickets(NewOrder::new(order_params(&raffle_id, 2, 1000)).unwrap())
                .await
                .unwrap()
        }));
    }

    let mut numbers = HashSet::new();
    for handle in handles {
        let (_, tickets) = handle.await.unwrap();
        for t in tickets {
            assert!(numbers.insert(t.sequential_number), "duplicate ticket number");
        }
    }
    assert_eq!(numbers.len(), 20);
}

#[tokio::test]
#[ignore = "needs a local postgres"]
async fn reconciliation_pays_once_and_audits() {
    let store = store().await;
    let external_id = format!("khp-{}", uuid::Uuid::now_v7().simple());
    let (order, attempt_id) = order_with_payment(&store, &raffle("pay"), &external_id).await;

    let found = store
        .find_payment_attempt(&PaymentLookup::Key(format!("tok-{external_id}")))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, attempt_id);

    let snap = snapshot(&external_id, ProviderStatus::Done);
    let first = store.apply_reconciliation(attempt_id, &snap, "test").await.unwrap();
    let second = store.apply_reconciliation(attempt_id, &snap, "test").await.unwrap();

    assert_eq!(first.outcome, ReconcileOutcome::Paid);
    assert!(first.newly_paid);
    assert_eq!(first.attempt.state, AttemptState::Verified);
    assert_eq!(second.outcome, ReconcileOutcome::AlreadyTerminal);
    assert!(!second.newly_paid);
    assert_eq!(second.order.paid_at, first.order.paid_at);

    let details = store.get_order_details(order.id).await.unwrap().unwrap();
    assert_eq!(details.order.state, OrderState::Paid);
    assert_eq!(details.order.payment_id.as_ref().map(|p| p.as_str()), Some(external_id.as_str()));
    assert_eq!(count_audit_entries(store.pool(), attempt_id, "status_changed").await, 1);
    assert_eq!(count_audit_entries(store.pool(), order.id.as_uuid(), "state_changed").await, 1);
}

#[tokio::test]
#[ignore = "needs a local postgres"]
async fn expiry_voids_tickets() {
    let store = store().await;
    let external_id = format!("khp-{}", uuid::Uuid::now_v7().simple());
    let (order, attempt_id) = order_with_payment(&store, &raffle("exp"), &external_id).await;

    let result = store
        .apply_reconciliation(attempt_id, &snapshot(&external_id, ProviderStatus::Expired), "test")
        .await
        .unwrap();

    assert_eq!(result.order.state, OrderState::Expired);
    let details = store.get_order_details(order.id).await.unwrap().unwrap();
    assert!(details.tickets.iter().all(|t| t.state == TicketState::Void));

    let err = store
        .create_payment_attempt(NewPaymentAttempt::for_order(&order, chrono::Utc::now()))
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::OrderClosed { .. }));
}

#[tokio::test]
#[ignore = "needs a local postgres"]
async fn expiry_ignores_retry_without_provider_session() {
    let store = store().await;
    let external_id = format!("khp-{}", uuid::Uuid::now_v7().simple());
    let (order, attempt_id) = order_with_payment(&store, &raffle("retry"), &external_id).await;
    store
        .create_payment_attempt(NewPaymentAttempt::for_order(
            &order,
            chrono::Utc::now() + chrono::Duration::minutes(60),
        ))
        .await
        .unwrap();

    let result = store
        .apply_reconciliation(attempt_id, &snapshot(&external_id, ProviderStatus::Expired), "test")
        .await
        .unwrap();

    assert_eq!(result.outcome, ReconcileOutcome::Expired);
    assert_eq!(result.order.state, OrderState::Expired);
}

#[tokio::test]
#[ignore = "needs a local postgres"]
async fn paid_order_cannot_be_cancelled() {
    let store = store().await;
    let external_id = format!("khp-{}", uuid::Uuid::now_v7().simple());
    let (order, attempt_id) = order_with_payment(&store, &raffle("cancel"), &external_id).await;
    store
        .apply_reconciliation(attempt_id, &snapshot(&external_id, ProviderStatus::Done), "test")
        .await
        .unwrap();

    let err = store
        .update_order_state(order.id, OrderState::Cancelled, "test")
        .await
        .unwrap_err();

    assert!(matches!(err, CheckoutError::Conflict(_)));
}

#[tokio::test]
#[ignore = "needs a local postgres"]
async fn pending_sweep_lists_initiated_attempts() {
    let store = store().await;
    let external_id = format!("khp-{}", uuid::Uuid::now_v7().simple());
    let (_, attempt_id) = order_with_payment(&store, &raffle("sweep"), &external_id).await;

    let pending = store
        .list_pending_attempts(chrono::Utc::now() + chrono::Duration::seconds(5), 1000)
        .await
        .unwrap();

    assert!(pending.iter().any(|a| a.id == attempt_id));
}
