//! Currency allow-list and amount arithmetic shared by the session and
//! reconciliation paths.

use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Currencies the engine accepts. Anything else is rejected at the API
/// boundary before a provider is contacted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Ils,
    Usd,
    Eur,
    Gbp,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Ils => "ILS",
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
        }
    }

    /// ISO 4217 numeric code, used by form-based provider APIs.
    pub fn iso_numeric(&self) -> u32 {
        match self {
            Currency::Ils => 376,
            Currency::Usd => 840,
            Currency::Eur => 978,
            Currency::Gbp => 826,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ILS" => Ok(Currency::Ils),
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            "GBP" => Ok(Currency::Gbp),
            other => Err(format!("unsupported currency: {}", other)),
        }
    }
}

/// Number of fractional digits after trailing zeros are stripped.
/// `12.30` scales to 1, `12.345` to 3.
pub fn fraction_digits(amount: &BigDecimal) -> i64 {
    let (_, exponent) = amount.normalized().as_bigint_and_exponent();
    exponent.max(0)
}

/// Converts an amount into a settlement currency at the given rate,
/// rounded to two fractional digits.
pub fn convert(amount: &BigDecimal, rate: &BigDecimal) -> BigDecimal {
    (amount * rate).with_scale(2)
}
