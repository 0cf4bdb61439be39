use {
    super::error::CheckoutError,
    super::id::{ExternalPaymentId, OrderId},
    super::money::{Currency, MoneyAmount},
    super::provider::RedirectUrls,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::fmt,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    Pending,
    Paid,
    Expired,
    Cancelled,
}

impl OrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Only `pending` may move, and only into one of the terminal states.
    pub fn can_transition_to(&self, next: &OrderState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Paid)
                | (Self::Pending, Self::Expired)
                | (Self::Pending, Self::Cancelled)
        )
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for OrderState {
    type Error = CheckoutError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "expired" => Ok(Self::Expired),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(CheckoutError::Validation(format!(
                "unknown order state: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Buyer {
    pub name: String,
    pub email: String,
    pub phone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_id: Option<String>,
}

impl Buyer {
    fn validate(&self) -> Result<(), CheckoutError> {
        if self.name.trim().is_empty() {
            return Err(CheckoutError::Validation("buyer.name is required".into()));
        }
        if self.phone.trim().is_empty() {
            return Err(CheckoutError::Validation("buyer.phone is required".into()));
        }
        let email = self.email.trim();
        let well_formed = email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
        if !well_formed {
            return Err(CheckoutError::Validation(format!(
                "buyer.email is not a valid address: {email}"
            )));
        }
        Ok(())
    }
}

/// Persisted purchase order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseOrder {
    pub id: OrderId,
    pub raffle_id: String,
    pub raffle_title: Option<String>,
    pub quantity: i64,
    pub unit_price: MoneyAmount,
    pub total: MoneyAmount,
    pub currency: Currency,
    pub buyer: Buyer,
    pub state: OrderState,
    pub payment_id: Option<ExternalPaymentId>,
    pub redirect_urls: Option<RedirectUrls>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PurchaseOrder {
    /// Payment can only be opened while the order is pending.
    pub fn ensure_accepts_payment(&self) -> Result<(), CheckoutError> {
        match self.state {
            OrderState::Pending => Ok(()),
            OrderState::Paid => Err(CheckoutError::AlreadyPaid(self.id.to_string())),
            closed => Err(CheckoutError::OrderClosed {
                order_id: self.id.to_string(),
                state: closed.to_string(),
            }),
        }
    }

    pub fn transition_state(
        &mut self,
        next: OrderState,
        now: DateTime<Utc>,
    ) -> Result<(), CheckoutError> {
        if !self.state.can_transition_to(&next) {
            return Err(CheckoutError::Conflict(format!(
                "invalid order transition: {} → {}",
                self.state, next
            )));
        }
        self.state = next;
        if next == OrderState::Paid {
            self.paid_at = Some(now);
        }
        self.updated_at = now;
        Ok(())
    }
}

/// For INSERT — validated on construction, `total` fixed here and never recomputed.
#[derive(Debug, Clone)]
pub struct NewOrder {
    id: OrderId,
    raffle_id: String,
    raffle_title: Option<String>,
    quantity: i64,
    unit_price: MoneyAmount,
    total: MoneyAmount,
    currency: Currency,
    buyer: Buyer,
}

pub struct NewOrderParams {
    pub raffle_id: String,
    pub raffle_title: Option<String>,
    pub quantity: i64,
    pub unit_price: i64,
    pub currency: Currency,
    pub buyer: Buyer,
}

impl NewOrder {
    pub fn new(p: NewOrderParams) -> Result<Self, CheckoutError> {
        let raffle_id = p.raffle_id.trim().to_string();
        if raffle_id.is_empty() {
            return Err(CheckoutError::Validation("raffleId is required".into()));
        }
        if p.quantity < 1 {
            return Err(CheckoutError::InvalidQuantity(p.quantity));
        }
        if p.unit_price <= 0 {
            return Err(CheckoutError::Validation(format!(
                "unitPrice must be positive, got: {}",
                p.unit_price
            )));
        }
        p.buyer.validate()?;

        let unit_price = MoneyAmount::new(p.unit_price)?;
        let total = unit_price.checked_mul(p.quantity).ok_or_else(|| {
            CheckoutError::Validation("order total exceeds storage capacity".into())
        })?;

        Ok(Self {
            id: OrderId::generate(),
            raffle_id,
            raffle_title: p
                .raffle_title
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            quantity: p.quantity,
            unit_price,
            total,
            currency: p.currency,
            buyer: p.buyer,
        })
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn raffle_id(&self) -> &str {
        &self.raffle_id
    }

    pub fn raffle_title(&self) -> Option<&str> {
        self.raffle_title.as_deref()
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn unit_price(&self) -> MoneyAmount {
        self.unit_price
    }

    pub fn total(&self) -> MoneyAmount {
        self.total
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn buyer(&self) -> &Buyer {
        &self.buyer
    }

    /// Materialize the row as it looks right after insertion.
    pub fn into_order(self, now: DateTime<Utc>) -> PurchaseOrder {
        PurchaseOrder {
            id: self.id,
            raffle_id: self.raffle_id,
            raffle_title: self.raffle_title,
            quantity: self.quantity,
            unit_price: self.unit_price,
            total: self.total,
            currency: self.currency,
            buyer: self.buyer,
            state: OrderState::Pending,
            payment_id: None,
            redirect_urls: None,
            paid_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
