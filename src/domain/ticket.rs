use {
    super::error::CheckoutError,
    super::id::OrderId,
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
    std::fmt,
    uuid::Uuid,
};

/// Width of the zero-padded sequential number.
pub const TICKET_NUMBER_WIDTH: usize = 6;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TicketState {
    Active,
    /// Owning order expired or was cancelled. The number stays reserved.
    Void,
}

impl TicketState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Void => "void",
        }
    }
}

impl fmt::Display for TicketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for TicketState {
    type Error = CheckoutError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "active" => Ok(Self::Active),
            "void" => Ok(Self::Void),
            other => Err(CheckoutError::Validation(format!(
                "unknown ticket state: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: Uuid,
    pub sequential_number: String,
    pub raffle_id: String,
    pub buyer_name: String,
    pub state: TicketState,
    pub order_id: OrderId,
    pub purchased_at: DateTime<Utc>,
}

/// Ticket draft produced by [`allocate`], not yet bound to an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTicket {
    pub id: Uuid,
    pub sequential_number: String,
    pub raffle_id: String,
    pub buyer_name: String,
}

impl NewTicket {
    pub fn into_ticket(self, order_id: OrderId, purchased_at: DateTime<Utc>) -> Ticket {
        Ticket {
            id: self.id,
            sequential_number: self.sequential_number,
            raffle_id: self.raffle_id,
            buyer_name: self.buyer_name,
            state: TicketState::Active,
            order_id,
            purchased_at,
        }
    }
}

/// Numeric value of a stored ticket number. Anything unparsable counts as 0.
pub fn parse_ticket_number(raw: Option<&str>) -> u64 {
    raw.and_then(|s| s.trim().parse::<u64>().ok()).unwrap_or(0)
}

pub fn format_ticket_number(n: u64) -> String {
    format!("{n:0width$}", width = TICKET_NUMBER_WIDTH)
}

/// Order tickets by numeric value; numbers can outgrow the padding.
pub fn sort_by_number(tickets: &mut [Ticket]) {
    tickets.sort_by_key(|t| parse_ticket_number(Some(t.sequential_number.as_str())));
}

/// Produce `count` consecutive ticket drafts after `highest`.
///
/// Callers must hold the per-raffle allocation lock from the moment `highest`
/// is read until the drafts are inserted.
pub fn allocate(
    raffle_id: &str,
    count: i64,
    buyer_name: &str,
    highest: Option<&str>,
) -> Result<Vec<NewTicket>, CheckoutError> {
    if count < 1 {
        return Err(CheckoutError::InvalidQuantity(count));
    }
    let start = parse_ticket_number(highest);
    // count >= 1 was checked above
    let count = count as u64;
    let last = start
        .checked_add(count)
        .ok_or_else(|| CheckoutError::Conflict(format!("ticket numbers exhausted for raffle {raffle_id}")))?;

    Ok((start + 1..=last)
        .map(|n| NewTicket {
            id: Uuid::now_v7(),
            sequential_number: format_ticket_number(n),
            raffle_id: raffle_id.to_string(),
            buyer_name: buyer_name.to_string(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_raffle_starts_at_one() {
        let tickets = allocate("R1", 3, "Ana", None).unwrap();
        let numbers: Vec<_> = tickets.iter().map(|t| t.sequential_number.as_str()).collect();
        assert_eq!(numbers, ["000001", "000002", "000003"]);
    }

    #[test]
    fn continues_after_highest() {
        let tickets = allocate("R1", 2, "Ana", Some("000041")).unwrap();
        assert_eq!(tickets[0].sequential_number, "000042");
        assert_eq!(tickets[1].sequential_number, "000043");
    }

    #[test]
    fn garbage_highest_counts_as_zero() {
        let tickets = allocate("R1", 1, "Ana", Some("abc")).unwrap();
        assert_eq!(tickets[0].sequential_number, "000001");
    }

    #[test]
    fn zero_count_is_invalid_quantity() {
        assert!(matches!(
            allocate("R1", 0, "Ana", None),
            Err(CheckoutError::InvalidQuantity(0))
        ));
    }

    #[test]
    fn numbers_past_width_keep_growing() {
        let tickets = allocate("R1", 1, "Ana", Some("999999")).unwrap();
        assert_eq!(tickets[0].sequential_number, "1000000");
    }

    #[test]
    fn sorts_numerically_past_width() {
        let order_id = OrderId::generate();
        let mut tickets: Vec<Ticket> = ["1000000", "999999", "000002"]
            .into_iter()
            .map(|n| {
                NewTicket {
                    id: Uuid::now_v7(),
                    sequential_number: n.to_string(),
                    raffle_id: "R1".into(),
                    buyer_name: "Ana".into(),
                }
                .into_ticket(order_id, Utc::now())
            })
            .collect();

        sort_by_number(&mut tickets);

        let numbers: Vec<_> = tickets.iter().map(|t| t.sequential_number.as_str()).collect();
        assert_eq!(numbers, ["000002", "999999", "1000000"]);
    }
}
