//! Request validation for payment operations

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::CurrencyConfig;
use crate::error::ValidationErrors;
use crate::models::{CreatePaymentRequest, MAX_METADATA_BYTES};
use crate::{Error, Result};

/// Hard ceiling on a single payment
pub const MAX_AMOUNT: Decimal = dec!(999999.99);

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap()
});

static EXTERNAL_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{6,64}$").unwrap());

/// Validate a create request against the configured allow-lists
pub fn validate_create(request: &CreatePaymentRequest, currencies: &CurrencyConfig) -> Result<()> {
    let mut errors = ValidationErrors::new();

    if request.amount <= Decimal::ZERO {
        errors.add("amount", "must be greater than 0");
    } else if request.amount > MAX_AMOUNT {
        errors.add("amount", "cannot exceed 999,999.99");
    }
    if request.amount.scale() > 2 {
        errors.add("amount", "must have at most two decimal places");
    }

    let currency = request.currency.to_uppercase();
    if currency.len() != 3 {
        errors.add("currency", "must be a 3-character code");
    } else if !currencies.is_supported(&currency) {
        errors.add("currency", format!("{} is not supported", currency));
    }

    if let Some(email) = &request.customer_email {
        if !EMAIL_RE.is_match(email) {
            errors.add("customer_email", "invalid email format");
        }
    }

    if let Some(external_id) = &request.external_id {
        if !EXTERNAL_ID_RE.is_match(external_id) {
            errors.add(
                "external_id",
                "must be 6-64 characters of [A-Za-z0-9_-]",
            );
        }
    }

    if let Err(e) = validate_metadata_size(&serde_json::Value::Object(request.metadata.clone())) {
        errors.add("metadata", e.to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.into_error())
    }
}

/// Enforce the serialized metadata cap
pub fn validate_metadata_size(metadata: &serde_json::Value) -> Result<()> {
    let serialized = serde_json::to_vec(metadata).map_err(Error::Serialization)?;
    if serialized.len() > MAX_METADATA_BYTES {
        return Err(Error::validation(format!(
            "metadata exceeds {} bytes when serialized",
            MAX_METADATA_BYTES
        )));
    }
    Ok(())
}

/// Validate a refund amount against what is still refundable
pub fn validate_refund_amount(amount: Decimal, remaining: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(Error::payment("Refund amount must be greater than 0"));
    }
    if amount.scale() > 2 {
        return Err(Error::payment(
            "Refund amount must have at most two decimal places",
        ));
    }
    if amount > remaining {
        return Err(Error::payment(format!(
            "Refund amount ({}) exceeds remaining refundable amount ({})",
            amount, remaining
        )));
    }
    Ok(())
}
