use std::fmt;

use bigdecimal::BigDecimal;
use url::Url;

use crate::domain::money;

pub const CUSTOMER_NAME_MAX_LEN: usize = 120;
pub const EMAIL_MAX_LEN: usize = 254;
pub const PHONE_MAX_LEN: usize = 32;
pub const USER_REF_MAX_LEN: usize = 64;
pub const DESCRIPTION_MAX_LEN: usize = 255;
pub const AMOUNT_MAX: u32 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.len() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

/// Charge amounts must be strictly positive, carry at most two
/// fractional digits and stay below a sanity cap.
pub fn validate_amount(amount: &BigDecimal) -> ValidationResult {
    if amount <= &BigDecimal::from(0) {
        return Err(ValidationError::new("amount", "must be greater than zero"));
    }

    if money::fraction_digits(amount) > 2 {
        return Err(ValidationError::new(
            "amount",
            "must have at most two fractional digits",
        ));
    }

    if amount > &BigDecimal::from(AMOUNT_MAX) {
        return Err(ValidationError::new(
            "amount",
            format!("must not exceed {}", AMOUNT_MAX),
        ));
    }

    Ok(())
}

pub fn validate_customer_name(name: &str) -> ValidationResult {
    let name = sanitize_string(name);
    validate_required("customer_name", &name)?;
    validate_max_len("customer_name", &name, CUSTOMER_NAME_MAX_LEN)?;

    Ok(())
}

pub fn validate_email(email: &str) -> ValidationResult {
    let email = sanitize_string(email);
    validate_required("customer_email", &email)?;
    validate_max_len("customer_email", &email, EMAIL_MAX_LEN)?;

    let mut parts = email.splitn(2, '@');
    let local = parts.next().unwrap_or_default();
    let domain = parts.next().unwrap_or_default();
    if local.is_empty() || domain.is_empty() || !domain.contains('.') {
        return Err(ValidationError::new(
            "customer_email",
            "must be a valid email address",
        ));
    }

    Ok(())
}

pub fn validate_phone(phone: &str) -> ValidationResult {
    let phone = sanitize_string(phone);
    validate_max_len("customer_phone", &phone, PHONE_MAX_LEN)?;

    if !phone
        .chars()
        .all(|ch| ch.is_ascii_digit() || matches!(ch, '+' | '-' | ' ' | '(' | ')'))
    {
        return Err(ValidationError::new(
            "customer_phone",
            "must contain only digits, spaces and + - ( )",
        ));
    }

    Ok(())
}

/// Redirect targets handed to a provider must be absolute http(s) URLs.
pub fn validate_redirect_url(field: &'static str, value: &str) -> ValidationResult {
    let parsed = Url::parse(value)
        .map_err(|_| ValidationError::new(field, "must be an absolute URL"))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ValidationError::new(field, "must use http or https"));
    }

    Ok(())
}
