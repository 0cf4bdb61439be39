use {
    crate::domain::{
        error::CheckoutError,
        id::{ExternalPaymentId, OrderId, TransactionId},
        money::{Currency, MoneyAmount},
        payment::{AttemptState, NewPaymentAttempt, PaymentAttempt, PaymentLookup},
        provider::{CreatedPayment, Payer, RedirectUrls},
    },
    chrono::{DateTime, Utc},
    sqlx::{PgConnection, types::Json},
    uuid::Uuid,
};

const ATTEMPT_COLUMNS: &str = "id, transaction_id, external_id, notification_token, order_id, \
     amount, currency, state, status_detail, payer, metadata, redirect_urls, expires_at, \
     created_at, updated_at";

#[derive(sqlx::FromRow)]
struct AttemptRow {
    id: Uuid,
    transaction_id: String,
    external_id: Option<String>,
    notification_token: Option<String>,
    order_id: Uuid,
    amount: i64,
    currency: String,
    state: String,
    status_detail: Option<String>,
    payer: Option<Json<Payer>>,
    metadata: serde_json::Value,
    redirect_urls: Json<RedirectUrls>,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AttemptRow> for PaymentAttempt {
    type Error = CheckoutError;

    fn try_from(row: AttemptRow) -> Result<Self, Self::Error> {
        Ok(PaymentAttempt {
            id: row.id,
            transaction_id: TransactionId::new(row.transaction_id)?,
            external_id: row.external_id.map(ExternalPaymentId::new).transpose()?,
            notification_token: row.notification_token,
            order_id: OrderId::from_uuid(row.order_id),
            amount: MoneyAmount::new(row.amount)?,
            currency: Currency::try_from(row.currency.as_str())?,
            state: AttemptState::try_from(row.state.as_str())?,
            status_detail: row.status_detail,
            payer: row.payer.map(|Json(p)| p),
            metadata: row.metadata,
            redirect_urls: row.redirect_urls.0,
            expires_at: row.expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub async fn insert_attempt(
    conn: &mut PgConnection,
    attempt: &NewPaymentAttempt,
) -> Result<PaymentAttempt, CheckoutError> {
    let row = sqlx::query_as::<_, AttemptRow>(&format!(
        r#"
        INSERT INTO payment_attempts (id, transaction_id, order_id, amount, currency, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {ATTEMPT_COLUMNS}
        "#
    ))
    .bind(attempt.id())
    .bind(attempt.transaction_id().as_str())
    .bind(attempt.order_id().as_uuid())
    .bind(attempt.amount().units())
    .bind(attempt.currency().as_str())
    .bind(attempt.expires_at())
    .fetch_one(&mut *conn)
    .await?;

    row.try_into()
}

pub async fn find_attempt(
    conn: &mut PgConnection,
    lookup: &PaymentLookup,
) -> Result<Option<PaymentAttempt>, CheckoutError> {
    let (filter, key) = match lookup {
        PaymentLookup::ExternalId(k) => ("external_id = $1", k),
        PaymentLookup::TransactionId(k) => ("transaction_id = $1", k),
        PaymentLookup::NotificationToken(k) => ("notification_token = $1", k),
        PaymentLookup::Key(k) => (
            "(external_id = $1 OR transaction_id = $1 OR notification_token = $1)",
            k,
        ),
    };

    sqlx::query_as::<_, AttemptRow>(&format!(
        "SELECT {ATTEMPT_COLUMNS} FROM payment_attempts WHERE {filter} \
         ORDER BY created_at DESC, id DESC LIMIT 1"
    ))
    .bind(key)
    .fetch_optional(&mut *conn)
    .await?
    .map(PaymentAttempt::try_from)
    .transpose()
}

pub async fn get_attempt_for_update(
    conn: &mut PgConnection,
    id: Uuid,
) -> Result<Option<PaymentAttempt>, CheckoutError> {
    sqlx::query_as::<_, AttemptRow>(&format!(
        "SELECT {ATTEMPT_COLUMNS} FROM payment_attempts WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .map(PaymentAttempt::try_from)
    .transpose()
}

/// Whether another attempt of the order still has a live provider session.
pub async fn other_open_session_exists(
    conn: &mut PgConnection,
    order_id: OrderId,
    attempt_id: Uuid,
) -> Result<bool, CheckoutError> {
    let exists = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM payment_attempts
            WHERE order_id = $1 AND id <> $2
              AND external_id IS NOT NULL AND state = 'pending'
        )
        "#,
    )
    .bind(order_id.as_uuid())
    .bind(attempt_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(exists)
}

pub async fn list_attempts(
    conn: &mut PgConnection,
    order_id: OrderId,
) -> Result<Vec<PaymentAttempt>, CheckoutError> {
    sqlx::query_as::<_, AttemptRow>(&format!(
        "SELECT {ATTEMPT_COLUMNS} FROM payment_attempts WHERE order_id = $1 ORDER BY created_at, id"
    ))
    .bind(order_id.as_uuid())
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(PaymentAttempt::try_from)
    .collect()
}

pub async fn set_provider_payment(
    conn: &mut PgConnection,
    attempt_id: Uuid,
    created: &CreatedPayment,
) -> Result<PaymentAttempt, CheckoutError> {
    let row = sqlx::query_as::<_, AttemptRow>(&format!(
        r#"
        UPDATE payment_attempts
        SET external_id = $1, notification_token = $2, status_detail = $3,
            redirect_urls = $4, metadata = $5, updated_at = now()
        WHERE id = $6
        RETURNING {ATTEMPT_COLUMNS}
        "#
    ))
    .bind(created.external_id.as_str())
    .bind(created.notification_token.as_deref())
    .bind(created.status.as_str())
    .bind(Json(&created.redirect_urls))
    .bind(&created.raw)
    .bind(attempt_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| CheckoutError::PaymentNotFound(attempt_id.to_string()))?;

    row.try_into()
}

pub async fn set_status_detail(
    conn: &mut PgConnection,
    attempt_id: Uuid,
    detail: &str,
) -> Result<(), CheckoutError> {
    let result = sqlx::query(
        "UPDATE payment_attempts SET status_detail = $1, updated_at = now() WHERE id = $2",
    )
    .bind(detail)
    .bind(attempt_id)
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(CheckoutError::PaymentNotFound(attempt_id.to_string()));
    }
    Ok(())
}

/// Write back an attempt after `PaymentAttempt::apply_snapshot`.
pub async fn update_attempt(
    conn: &mut PgConnection,
    attempt: &PaymentAttempt,
) -> Result<(), CheckoutError> {
    sqlx::query(
        r#"
        UPDATE payment_attempts
        SET state = $1, status_detail = $2, payer = $3, metadata = $4,
            redirect_urls = $5, updated_at = $6
        WHERE id = $7
        "#,
    )
    .bind(attempt.state.as_str())
    .bind(attempt.status_detail.as_deref())
    .bind(attempt.payer.as_ref().map(Json))
    .bind(&attempt.metadata)
    .bind(Json(&attempt.redirect_urls))
    .bind(attempt.updated_at)
    .bind(attempt.id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn list_pending(
    conn: &mut PgConnection,
    older_than: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<PaymentAttempt>, CheckoutError> {
    sqlx::query_as::<_, AttemptRow>(&format!(
        r#"
        SELECT {ATTEMPT_COLUMNS} FROM payment_attempts a
        WHERE a.state = 'pending'
          AND a.external_id IS NOT NULL
          AND a.created_at < $1
          AND EXISTS (
              SELECT 1 FROM purchase_orders o WHERE o.id = a.order_id AND o.state = 'pending'
          )
        ORDER BY a.updated_at, a.id
        LIMIT $2
        "#
    ))
    .bind(older_than)
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(PaymentAttempt::try_from)
    .collect()
}
