use {
    crate::domain::{
        error::CheckoutError,
        id::{ExternalPaymentId, OrderId},
        money::{Currency, MoneyAmount},
        order::{Buyer, NewOrder, OrderState, PurchaseOrder},
        provider::RedirectUrls,
        ticket::{NewTicket, Ticket, TicketState},
    },
    chrono::{DateTime, Utc},
    sqlx::{PgConnection, types::Json},
    uuid::Uuid,
};

const ORDER_COLUMNS: &str = "id, raffle_id, raffle_title, quantity, unit_price, total, currency, \
     buyer_name, buyer_email, buyer_phone, buyer_tax_id, state, payment_id, redirect_urls, \
     paid_at, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    raffle_id: String,
    raffle_title: Option<String>,
    quantity: i64,
    unit_price: i64,
    total: i64,
    currency: String,
    buyer_name: String,
    buyer_email: String,
    buyer_phone: String,
    buyer_tax_id: Option<String>,
    state: String,
    payment_id: Option<String>,
    redirect_urls: Option<Json<RedirectUrls>>,
    paid_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for PurchaseOrder {
    type Error = CheckoutError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(PurchaseOrder {
            id: OrderId::from_uuid(row.id),
            raffle_id: row.raffle_id,
            raffle_title: row.raffle_title,
            quantity: row.quantity,
            unit_price: MoneyAmount::new(row.unit_price)?,
            total: MoneyAmount::new(row.total)?,
            currency: Currency::try_from(row.currency.as_str())?,
            buyer: Buyer {
                name: row.buyer_name,
                email: row.buyer_email,
                phone: row.buyer_phone,
                tax_id: row.buyer_tax_id,
            },
            state: OrderState::try_from(row.state.as_str())?,
            payment_id: row.payment_id.map(ExternalPaymentId::new).transpose()?,
            redirect_urls: row.redirect_urls.map(|Json(urls)| urls),
            paid_at: row.paid_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: Uuid,
    sequential_number: String,
    raffle_id: String,
    buyer_name: String,
    state: String,
    order_id: Uuid,
    purchased_at: DateTime<Utc>,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = CheckoutError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        Ok(Ticket {
            id: row.id,
            sequential_number: row.sequential_number,
            raffle_id: row.raffle_id,
            buyer_name: row.buyer_name,
            state: TicketState::try_from(row.state.as_str())?,
            order_id: OrderId::from_uuid(row.order_id),
            purchased_at: row.purchased_at,
        })
    }
}

/// Serialize ticket allocation for one raffle until the transaction ends.
/// Works before any ticket row for the raffle exists.
pub async fn lock_raffle(conn: &mut PgConnection, raffle_id: &str) -> Result<(), CheckoutError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext('raffle:' || $1))")
        .bind(raffle_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Highest sequential number sold for the raffle, compared numerically
/// (longer strings first, since numbers can outgrow the padding).
pub async fn highest_ticket_number(
    conn: &mut PgConnection,
    raffle_id: &str,
) -> Result<Option<String>, CheckoutError> {
    let highest = sqlx::query_scalar::<_, String>(
        r#"
        SELECT sequential_number FROM tickets
        WHERE raffle_id = $1
        ORDER BY length(sequential_number) DESC, sequential_number DESC
        LIMIT 1
        "#,
    )
    .bind(raffle_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(highest)
}

pub async fn insert_order(
    conn: &mut PgConnection,
    order: &NewOrder,
) -> Result<PurchaseOrder, CheckoutError> {
    let buyer = order.buyer();
    let row = sqlx::query_as::<_, OrderRow>(&format!(
        r#"
        INSERT INTO purchase_orders
            (id, raffle_id, raffle_title, quantity, unit_price, total, currency,
             buyer_name, buyer_email, buyer_phone, buyer_tax_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING {ORDER_COLUMNS}
        "#
    ))
    .bind(order.id().as_uuid())
    .bind(order.raffle_id())
    .bind(order.raffle_title())
    .bind(order.quantity())
    .bind(order.unit_price().units())
    .bind(order.total().units())
    .bind(order.currency().as_str())
    .bind(&buyer.name)
    .bind(&buyer.email)
    .bind(&buyer.phone)
    .bind(buyer.tax_id.as_deref())
    .fetch_one(&mut *conn)
    .await?;

    row.try_into()
}

pub async fn insert_tickets(
    conn: &mut PgConnection,
    order_id: OrderId,
    drafts: Vec<NewTicket>,
) -> Result<Vec<Ticket>, CheckoutError> {
    let mut tickets = Vec::with_capacity(drafts.len());
    for draft in drafts {
        let row = sqlx::query_as::<_, TicketRow>(
            r#"
            INSERT INTO tickets (id, sequential_number, raffle_id, buyer_name, order_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, sequential_number, raffle_id, buyer_name, state, order_id, purchased_at
            "#,
        )
        .bind(draft.id)
        .bind(&draft.sequential_number)
        .bind(&draft.raffle_id)
        .bind(&draft.buyer_name)
        .bind(order_id.as_uuid())
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db) = &e {
                if db.is_unique_violation() {
                    return CheckoutError::Conflict(format!(
                        "ticket {} already sold for raffle {}",
                        draft.sequential_number, draft.raffle_id
                    ));
                }
            }
            CheckoutError::Database(e)
        })?;
        tickets.push(row.try_into()?);
    }
    Ok(tickets)
}

pub async fn get_order(
    conn: &mut PgConnection,
    id: OrderId,
) -> Result<Option<PurchaseOrder>, CheckoutError> {
    sqlx::query_as::<_, OrderRow>(&format!(
        "SELECT {ORDER_COLUMNS} FROM purchase_orders WHERE id = $1"
    ))
    .bind(id.as_uuid())
    .fetch_optional(&mut *conn)
    .await?
    .map(PurchaseOrder::try_from)
    .transpose()
}

/// Same as [`get_order`] but row-locks the order until the transaction ends.
pub async fn get_order_for_update(
    conn: &mut PgConnection,
    id: OrderId,
) -> Result<Option<PurchaseOrder>, CheckoutError> {
    sqlx::query_as::<_, OrderRow>(&format!(
        "SELECT {ORDER_COLUMNS} FROM purchase_orders WHERE id = $1 FOR UPDATE"
    ))
    .bind(id.as_uuid())
    .fetch_optional(&mut *conn)
    .await?
    .map(PurchaseOrder::try_from)
    .transpose()
}

pub async fn list_tickets(
    conn: &mut PgConnection,
    order_id: OrderId,
) -> Result<Vec<Ticket>, CheckoutError> {
    sqlx::query_as::<_, TicketRow>(
        r#"
        SELECT id, sequential_number, raffle_id, buyer_name, state, order_id, purchased_at
        FROM tickets WHERE order_id = $1
        ORDER BY length(sequential_number), sequential_number
        "#,
    )
    .bind(order_id.as_uuid())
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(Ticket::try_from)
    .collect()
}

/// Persist a state change already validated by `PurchaseOrder::transition_state`.
pub async fn update_order_state(
    conn: &mut PgConnection,
    order: &PurchaseOrder,
) -> Result<(), CheckoutError> {
    sqlx::query(
        "UPDATE purchase_orders SET state = $1, paid_at = $2, updated_at = $3 WHERE id = $4",
    )
    .bind(order.state.as_str())
    .bind(order.paid_at)
    .bind(order.updated_at)
    .bind(order.id.as_uuid())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn void_tickets(conn: &mut PgConnection, order_id: OrderId) -> Result<u64, CheckoutError> {
    let result = sqlx::query("UPDATE tickets SET state = 'void' WHERE order_id = $1 AND state <> 'void'")
        .bind(order_id.as_uuid())
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn set_provider_fields(
    conn: &mut PgConnection,
    order_id: OrderId,
    payment_id: &ExternalPaymentId,
    redirect_urls: &RedirectUrls,
) -> Result<(), CheckoutError> {
    sqlx::query(
        r#"
        UPDATE purchase_orders
        SET payment_id = $1, redirect_urls = $2, updated_at = now()
        WHERE id = $3
        "#,
    )
    .bind(payment_id.as_str())
    .bind(Json(redirect_urls))
    .bind(order_id.as_uuid())
    .execute(&mut *conn)
    .await?;
    Ok(())
}
