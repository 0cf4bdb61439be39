use {
    super::audit::NewAuditEntry,
    super::error::CheckoutError,
    super::id::{ExternalPaymentId, OrderId, TransactionId},
    super::money::{Currency, MoneyAmount},
    super::order::{OrderState, PurchaseOrder},
    super::provider::{Payer, ProviderPaymentSnapshot, RedirectUrls},
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::fmt,
    uuid::Uuid,
};

/// Raw provider status, parsed case-insensitively. Unrecognized strings are
/// kept verbatim and treated as non-terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProviderStatus {
    Pending,
    Verifying,
    Done,
    Verified,
    Expired,
    Cancelled,
    Unknown(String),
}

impl ProviderStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Self::Pending,
            "verifying" => Self::Verifying,
            "done" => Self::Done,
            "verified" => Self::Verified,
            "expired" => Self::Expired,
            "cancelled" | "canceled" => Self::Cancelled,
            _ => Self::Unknown(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Verifying => "verifying",
            Self::Done => "done",
            Self::Verified => "verified",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
            Self::Unknown(raw) => raw,
        }
    }

    /// Local attempt state this provider status maps to.
    pub fn attempt_state(&self) -> AttemptState {
        match self {
            Self::Done | Self::Verified => AttemptState::Verified,
            Self::Expired => AttemptState::Expired,
            Self::Cancelled => AttemptState::Cancelled,
            Self::Pending | Self::Verifying | Self::Unknown(_) => AttemptState::Pending,
        }
    }
}

impl From<String> for ProviderStatus {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<ProviderStatus> for String {
    fn from(status: ProviderStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    Pending,
    Verified,
    Done,
    Expired,
    Cancelled,
}

impl AttemptState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Done => "done",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Verified | Self::Done)
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for AttemptState {
    type Error = CheckoutError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "pending" => Ok(Self::Pending),
            "verified" => Ok(Self::Verified),
            "done" => Ok(Self::Done),
            "expired" => Ok(Self::Expired),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(CheckoutError::Validation(format!(
                "unknown payment attempt state: {other}"
            ))),
        }
    }
}

/// Full payment attempt record from the store (for reads).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentAttempt {
    pub id: Uuid,
    pub transaction_id: TransactionId,
    pub external_id: Option<ExternalPaymentId>,
    pub notification_token: Option<String>,
    pub order_id: OrderId,
    pub amount: MoneyAmount,
    pub currency: Currency,
    pub state: AttemptState,
    pub status_detail: Option<String>,
    pub payer: Option<Payer>,
    pub metadata: serde_json::Value,
    pub redirect_urls: RedirectUrls,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// For INSERT — always starts `pending`, without a provider id.
#[derive(Debug, Clone)]
pub struct NewPaymentAttempt {
    id: Uuid,
    transaction_id: TransactionId,
    order_id: OrderId,
    amount: MoneyAmount,
    currency: Currency,
    expires_at: DateTime<Utc>,
}

impl NewPaymentAttempt {
    pub fn for_order(order: &PurchaseOrder, expires_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            transaction_id: TransactionId::generate(),
            order_id: order.id,
            amount: order.total,
            currency: order.currency,
            expires_at,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn transaction_id(&self) -> &TransactionId {
        &self.transaction_id
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn amount(&self) -> MoneyAmount {
        self.amount
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn into_attempt(self, now: DateTime<Utc>) -> PaymentAttempt {
        PaymentAttempt {
            id: self.id,
            transaction_id: self.transaction_id,
            external_id: None,
            notification_token: None,
            order_id: self.order_id,
            amount: self.amount,
            currency: self.currency,
            state: AttemptState::Pending,
            status_detail: None,
            payer: None,
            metadata: serde_json::Value::Null,
            redirect_urls: RedirectUrls::default(),
            expires_at: self.expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn audit_entry(&self, actor: &str) -> NewAuditEntry {
        NewAuditEntry::new(
            "payment_attempt",
            self.id,
            "created",
            actor,
            serde_json::json!({
                "order_id": self.order_id.to_string(),
                "transaction_id": self.transaction_id.as_str(),
                "amount": self.amount.units(),
                "currency": self.currency.as_str(),
            }),
        )
    }
}

/// Lookup key for a payment attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentLookup {
    ExternalId(String),
    TransactionId(String),
    NotificationToken(String),
    /// Match any of the above, most recent attempt first.
    Key(String),
}

impl PaymentLookup {
    pub fn matches(&self, attempt: &PaymentAttempt) -> bool {
        let external = attempt.external_id.as_ref().map(|id| id.as_str());
        let token = attempt.notification_token.as_deref();
        match self {
            Self::ExternalId(k) => external == Some(k.as_str()),
            Self::TransactionId(k) => attempt.transaction_id.as_str() == k,
            Self::NotificationToken(k) => token == Some(k.as_str()),
            Self::Key(k) => {
                external == Some(k.as_str())
                    || attempt.transaction_id.as_str() == k
                    || token == Some(k.as_str())
            }
        }
    }
}

impl fmt::Display for PaymentLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExternalId(k)
            | Self::TransactionId(k)
            | Self::NotificationToken(k)
            | Self::Key(k) => write!(f, "{k}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptAction {
    /// Incoming state matches what we already have.
    Unchanged,
    /// Pending attempt moves to a terminal state.
    Advance { old: AttemptState },
    /// Incoming state conflicts with a state we must not leave.
    Anomaly { current: AttemptState },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// Attempt verified, order moved to `paid`.
    Paid,
    /// Attempt and order both expired.
    Expired,
    /// Attempt and order both cancelled.
    Cancelled,
    /// Provider still reports a non-terminal status.
    StillPending,
    /// Attempt closed, order left alone (superseded attempt or order already final).
    AttemptClosed,
    /// Attempt was already terminal; nothing changed.
    AlreadyTerminal,
    /// Provider reports success for an order that is no longer pending.
    SuccessOnClosedOrder,
}

/// What a reconciliation does to the attempt and its order, decided from
/// the locked current rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub action: AttemptAction,
    pub attempt_state: AttemptState,
    pub order_transition: Option<OrderState>,
    pub outcome: ReconcileOutcome,
}

impl ReconcilePlan {
    pub fn changes_anything(&self) -> bool {
        matches!(self.action, AttemptAction::Advance { .. }) || self.order_transition.is_some()
    }
}

/// Decide the effect of a provider status on an attempt and its order.
///
/// Terminal attempt states never change, and an order only ever leaves
/// `pending`. `other_session_open` is true when another attempt of the same
/// order still has a live provider session (external id, not terminal); a
/// failure of this attempt then leaves the order to that session.
pub fn plan_reconciliation(
    current: AttemptState,
    order_state: OrderState,
    other_session_open: bool,
    incoming: &ProviderStatus,
) -> ReconcilePlan {
    let incoming = incoming.attempt_state();

    if current.is_terminal() {
        let same = current == incoming || (current.is_success() && incoming.is_success());
        return ReconcilePlan {
            action: if same {
                AttemptAction::Unchanged
            } else {
                AttemptAction::Anomaly { current }
            },
            attempt_state: current,
            order_transition: None,
            outcome: ReconcileOutcome::AlreadyTerminal,
        };
    }

    match incoming {
        AttemptState::Pending => ReconcilePlan {
            action: AttemptAction::Unchanged,
            attempt_state: current,
            order_transition: None,
            outcome: ReconcileOutcome::StillPending,
        },
        AttemptState::Verified | AttemptState::Done => {
            if order_state.can_transition_to(&OrderState::Paid) {
                ReconcilePlan {
                    action: AttemptAction::Advance { old: current },
                    attempt_state: AttemptState::Verified,
                    order_transition: Some(OrderState::Paid),
                    outcome: ReconcileOutcome::Paid,
                }
            } else {
                // First success wins. A paid order keeps exactly one verified attempt.
                ReconcilePlan {
                    action: AttemptAction::Anomaly { current },
                    attempt_state: current,
                    order_transition: None,
                    outcome: ReconcileOutcome::SuccessOnClosedOrder,
                }
            }
        }
        AttemptState::Expired | AttemptState::Cancelled => {
            let target = if incoming == AttemptState::Expired {
                OrderState::Expired
            } else {
                OrderState::Cancelled
            };
            if !other_session_open && order_state.can_transition_to(&target) {
                ReconcilePlan {
                    action: AttemptAction::Advance { old: current },
                    attempt_state: incoming,
                    order_transition: Some(target),
                    outcome: if target == OrderState::Expired {
                        ReconcileOutcome::Expired
                    } else {
                        ReconcileOutcome::Cancelled
                    },
                }
            } else {
                ReconcilePlan {
                    action: AttemptAction::Advance { old: current },
                    attempt_state: incoming,
                    order_transition: None,
                    outcome: ReconcileOutcome::AttemptClosed,
                }
            }
        }
    }
}

impl PaymentAttempt {
    /// Copy the provider's view onto this attempt according to `plan`.
    /// Terminal attempts keep their recorded detail and metadata.
    pub fn apply_snapshot(
        &mut self,
        plan: &ReconcilePlan,
        snapshot: &ProviderPaymentSnapshot,
        now: DateTime<Utc>,
    ) {
        if self.state.is_terminal() {
            return;
        }
        self.state = plan.attempt_state;
        self.status_detail = snapshot
            .status_detail
            .clone()
            .or_else(|| Some(snapshot.status.as_str().to_string()));
        if snapshot.payer != Payer::default() {
            self.payer = Some(snapshot.payer.clone());
        }
        self.metadata = snapshot.raw.clone();
        if snapshot.redirect_urls != RedirectUrls::default() {
            self.redirect_urls = snapshot.redirect_urls.clone();
        }
        self.updated_at = now;
    }
}

impl ReconcilePlan {
    /// Audit rows describing this plan. Empty when nothing happened.
    pub fn audit_entries(
        &self,
        attempt: &PaymentAttempt,
        order_before: OrderState,
        snapshot: &ProviderPaymentSnapshot,
        actor: &str,
    ) -> Vec<NewAuditEntry> {
        let mut entries = Vec::new();
        match self.action {
            AttemptAction::Unchanged => {}
            AttemptAction::Advance { old } => entries.push(NewAuditEntry::new(
                "payment_attempt",
                attempt.id,
                "status_changed",
                actor,
                serde_json::json!({
                    "transaction_id": attempt.transaction_id.as_str(),
                    "provider_status": snapshot.status.as_str(),
                    "old_status": old.as_str(),
                    "new_status": self.attempt_state.as_str(),
                }),
            )),
            AttemptAction::Anomaly { current } => entries.push(NewAuditEntry::new(
                "payment_attempt",
                attempt.id,
                "event_received",
                actor,
                serde_json::json!({
                    "transaction_id": attempt.transaction_id.as_str(),
                    "provider_status": snapshot.status.as_str(),
                    "current_status": current.as_str(),
                    "order_state": order_before.as_str(),
                    "anomaly": true,
                }),
            )),
        }
        if let Some(next) = self.order_transition {
            entries.push(NewAuditEntry::new(
                "order",
                attempt.order_id.as_uuid(),
                "state_changed",
                actor,
                serde_json::json!({
                    "old_state": order_before.as_str(),
                    "new_state": next.as_str(),
                    "transaction_id": attempt.transaction_id.as_str(),
                }),
            ));
        }
        entries
    }
}
