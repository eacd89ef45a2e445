//! Concrete implementations of the storage and notification ports.

pub mod memory;
pub mod postgres;

use std::collections::HashMap;

use anyhow::anyhow;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use tracing::info;

use crate::domain::{Currency, DomainEvent};
use crate::ports::{Notifier, RateSource};

/// Notifier that writes domain events to the log stream. Deployments
/// that feed a message broker swap this out behind the same port.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: DomainEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_value(&event)?;
        info!(target: "domain_events", %payload, "domain event emitted");
        Ok(())
    }
}

/// Static conversion table loaded from configuration. Same-currency
/// conversions always rate 1.
pub struct FixedRateSource {
    rates: HashMap<(Currency, Currency), BigDecimal>,
}

impl FixedRateSource {
    pub fn new() -> Self {
        Self {
            rates: HashMap::new(),
        }
    }

    pub fn with_rate(mut self, from: Currency, to: Currency, rate: BigDecimal) -> Self {
        self.rates.insert((from, to), rate);
        self
    }
}

impl Default for FixedRateSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateSource for FixedRateSource {
    async fn rate(&self, from: Currency, to: Currency) -> anyhow::Result<BigDecimal> {
        if from == to {
            return Ok(BigDecimal::from(1));
        }
        self.rates
            .get(&(from, to))
            .cloned()
            .ok_or_else(|| anyhow!("no conversion rate configured from {} to {}", from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[tokio::test]
    async fn same_currency_rate_is_one() {
        let rates = FixedRateSource::new();
        let rate = rates.rate(Currency::Ils, Currency::Ils).await.unwrap();
        assert_eq!(rate, BigDecimal::from(1));
    }

    #[tokio::test]
    async fn configured_rate_is_returned() {
        let rates = FixedRateSource::new().with_rate(
            Currency::Usd,
            Currency::Ils,
            BigDecimal::from_str("3.70").unwrap(),
        );
        let rate = rates.rate(Currency::Usd, Currency::Ils).await.unwrap();
        assert_eq!(rate, BigDecimal::from_str("3.70").unwrap());
    }

    #[tokio::test]
    async fn missing_rate_is_an_error() {
        let rates = FixedRateSource::new();
        assert!(rates.rate(Currency::Usd, Currency::Eur).await.is_err());
    }
}
