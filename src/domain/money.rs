use {
    super::error::CheckoutError,
    serde::{Deserialize, Serialize},
    std::fmt,
};

/// Amount in whole currency units (CLP has no minor unit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MoneyAmount(i64);

impl MoneyAmount {
    pub fn new(units: i64) -> Result<Self, CheckoutError> {
        if units < 0 {
            return Err(CheckoutError::Validation(format!(
                "MoneyAmount cannot be negative, got: {units}"
            )));
        }
        Ok(Self(units))
    }

    pub fn units(&self) -> i64 {
        self.0
    }

    pub fn checked_mul(self, quantity: i64) -> Option<MoneyAmount> {
        if quantity < 0 {
            return None;
        }
        self.0.checked_mul(quantity).map(MoneyAmount)
    }
}

impl fmt::Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    Clp,
    Usd,
    Eur,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clp => "CLP",
            Self::Usd => "USD",
            Self::Eur => "EUR",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for Currency {
    type Error = CheckoutError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CLP" => Ok(Self::Clp),
            "USD" => Ok(Self::Usd),
            "EUR" => Ok(Self::Eur),
            _ => Err(CheckoutError::Validation(format!("unknown currency: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    amount: MoneyAmount,
    currency: Currency,
}

impl Money {
    pub fn new(amount: MoneyAmount, currency: Currency) -> Self {
        Self { amount, currency }
    }

    pub fn amount(&self) -> MoneyAmount {
        self.amount
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }
}
