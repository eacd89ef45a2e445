use anyhow::Result;
use bigdecimal::BigDecimal;
use dotenvy::dotenv;
use ipnet::IpNet;
use serde_json::json;
use std::env;
use std::net::IpAddr;
use std::str::FromStr;

use crate::domain::{Currency, Sealed};

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    /// Externally reachable base URL, used to build webhook callback
    /// URLs handed to providers.
    pub public_base_url: String,
    /// Absent means the in-memory stores; fine for development, loses
    /// everything on restart.
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub allowed_ips: AllowedIps,
    /// How many trailing X-Forwarded-For hops belong to our own proxies.
    pub trusted_proxy_depth: usize,
    pub admin_api_key: Option<Sealed>,
    pub worker_count: usize,
    pub apply_max_attempts: u32,
    pub apply_backoff_ms: u64,
    pub provider_call_timeout_secs: u64,
    /// Static conversion table for providers that settle in a currency
    /// other than the one charged, as `FROM:TO=RATE` entries.
    pub conversion_rates: Vec<(Currency, Currency, BigDecimal)>,
    pub providers: Vec<ProviderSettings>,
}

/// One configured payment provider.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub name: String,
    pub base_url: String,
    /// Credentials as a JSON document; each adapter knows its own shape.
    pub credentials: Sealed,
    /// Overrides the signing secret for callback verification where the
    /// provider separates it from the API credentials.
    pub webhook_secret: Option<Sealed>,
    pub settlement_currency: Option<Currency>,
}

/// Source filter for webhook endpoints.
#[derive(Debug, Clone)]
pub enum AllowedIps {
    Any,
    Cidrs(Vec<IpNet>),
}

impl AllowedIps {
    pub fn permits(&self, addr: IpAddr) -> bool {
        match self {
            AllowedIps::Any => true,
            AllowedIps::Cidrs(cidrs) => cidrs.iter().any(|net| net.contains(&addr)),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        let allowed_ips =
            parse_allowed_ips(&env::var("ALLOWED_IPS").unwrap_or_else(|_| "*".to_string()))?;

        Ok(Config {
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()?,
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            database_url: env::var("DATABASE_URL").ok(),
            redis_url: env::var("REDIS_URL").ok(),
            allowed_ips,
            trusted_proxy_depth: env::var("TRUSTED_PROXY_DEPTH")
                .unwrap_or_else(|_| "0".to_string())
                .parse()?,
            admin_api_key: env::var("ADMIN_API_KEY").ok().map(Sealed::new),
            worker_count: env::var("WORKER_COUNT")
                .unwrap_or_else(|_| "4".to_string())
                .parse()?,
            apply_max_attempts: env::var("APPLY_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            apply_backoff_ms: env::var("APPLY_BACKOFF_MS")
                .unwrap_or_else(|_| "200".to_string())
                .parse()?,
            provider_call_timeout_secs: env::var("PROVIDER_CALL_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            conversion_rates: parse_conversion_rates(
                &env::var("CONVERSION_RATES").unwrap_or_default(),
            )?,
            providers: provider_settings_from_env()?,
        })
    }
}

fn provider_settings_from_env() -> anyhow::Result<Vec<ProviderSettings>> {
    let mut providers = Vec::new();

    if env_flag("CARDCOM_ENABLED") {
        let terminal = required("CARDCOM_TERMINAL")?;
        let username = required("CARDCOM_API_USERNAME")?;
        providers.push(ProviderSettings {
            name: "cardcom".to_string(),
            base_url: env::var("CARDCOM_BASE_URL")
                .unwrap_or_else(|_| "https://secure.cardcom.solutions".to_string()),
            credentials: Sealed::new(
                json!({"terminal": terminal, "username": username}).to_string(),
            ),
            webhook_secret: None,
            settlement_currency: settlement_currency("CARDCOM_SETTLEMENT_CURRENCY")?,
        });
    }

    if env_flag("PAYPLUS_ENABLED") {
        let api_key = required("PAYPLUS_API_KEY")?;
        let secret_key = required("PAYPLUS_SECRET_KEY")?;
        let payment_page_uid = required("PAYPLUS_PAYMENT_PAGE_UID")?;
        providers.push(ProviderSettings {
            name: "payplus".to_string(),
            base_url: env::var("PAYPLUS_BASE_URL")
                .unwrap_or_else(|_| "https://restapi.payplus.co.il".to_string()),
            credentials: Sealed::new(
                json!({
                    "api_key": api_key,
                    "secret_key": secret_key,
                    "payment_page_uid": payment_page_uid,
                })
                .to_string(),
            ),
            webhook_secret: env::var("PAYPLUS_WEBHOOK_SECRET").ok().map(Sealed::new),
            settlement_currency: settlement_currency("PAYPLUS_SETTLEMENT_CURRENCY")?,
        });
    }

    Ok(providers)
}

fn required(name: &str) -> anyhow::Result<String> {
    env::var(name).map_err(|_| anyhow::anyhow!("{} is required", name))
}

fn env_flag(name: &str) -> bool {
    matches!(
        env::var(name).as_deref(),
        Ok("1") | Ok("true") | Ok("TRUE") | Ok("yes")
    )
}

fn settlement_currency(name: &str) -> anyhow::Result<Option<Currency>> {
    match env::var(name) {
        Ok(raw) => {
            let currency = raw
                .parse::<Currency>()
                .map_err(|e| anyhow::anyhow!("{}: {}", name, e))?;
            Ok(Some(currency))
        }
        Err(_) => Ok(None),
    }
}

fn parse_conversion_rates(raw: &str) -> anyhow::Result<Vec<(Currency, Currency, BigDecimal)>> {
    let mut rates = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (pair, rate) = entry.split_once('=').ok_or_else(|| {
            anyhow::anyhow!("conversion rate entry must look like FROM:TO=RATE, got '{}'", entry)
        })?;
        let (from, to) = pair.split_once(':').ok_or_else(|| {
            anyhow::anyhow!("conversion rate entry must look like FROM:TO=RATE, got '{}'", entry)
        })?;
        let from = Currency::from_str(from.trim()).map_err(|e| anyhow::anyhow!("{}", e))?;
        let to = Currency::from_str(to.trim()).map_err(|e| anyhow::anyhow!("{}", e))?;
        let rate = BigDecimal::from_str(rate.trim())
            .map_err(|e| anyhow::anyhow!("bad conversion rate in '{}': {}", entry, e))?;
        rates.push((from, to, rate));
    }
    Ok(rates)
}

fn parse_allowed_ips(raw: &str) -> anyhow::Result<AllowedIps> {
    let value = raw.trim();
    if value == "*" {
        return Ok(AllowedIps::Any);
    }

    let cidrs = value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::parse::<IpNet>)
        .collect::<Result<Vec<_>, _>>()?;

    if cidrs.is_empty() {
        anyhow::bail!("ALLOWED_IPS must be '*' or a comma-separated list of CIDRs");
    }

    Ok(AllowedIps::Cidrs(cidrs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_allows_everything() {
        let allowed = parse_allowed_ips("*").unwrap();
        assert!(allowed.permits("203.0.113.9".parse().unwrap()));
        assert!(allowed.permits("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn cidr_list_is_enforced() {
        let allowed = parse_allowed_ips("192.0.2.0/24, 198.51.100.7/32").unwrap();
        assert!(allowed.permits("192.0.2.200".parse().unwrap()));
        assert!(allowed.permits("198.51.100.7".parse().unwrap()));
        assert!(!allowed.permits("198.51.100.8".parse().unwrap()));
        assert!(!allowed.permits("203.0.113.9".parse().unwrap()));
    }

    #[test]
    fn garbage_and_empty_lists_are_rejected() {
        assert!(parse_allowed_ips("not-a-cidr").is_err());
        assert!(parse_allowed_ips("").is_err());
        assert!(parse_allowed_ips(" , ,").is_err());
    }

    #[test]
    fn conversion_rates_are_parsed() {
        let rates = parse_conversion_rates("USD:ILS=3.70, EUR:ILS=4.05").unwrap();
        assert_eq!(rates.len(), 2);
        assert_eq!(rates[0].0, Currency::Usd);
        assert_eq!(rates[0].1, Currency::Ils);
        assert_eq!(rates[0].2, BigDecimal::from_str("3.70").unwrap());
    }

    #[test]
    fn empty_rate_list_is_fine() {
        assert!(parse_conversion_rates("").unwrap().is_empty());
    }

    #[test]
    fn malformed_rate_entries_are_rejected() {
        assert!(parse_conversion_rates("USD-ILS=3.70").is_err());
        assert!(parse_conversion_rates("USD:ILS").is_err());
        assert!(parse_conversion_rates("USD:ILS=abc").is_err());
    }
}
