//! Authorize.net request/response types and card validation

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::processor::{ProcessorError, ProcessorResult};

/// Card details assembled for one processor call; never persisted
#[derive(Clone)]
pub struct CreditCard {
    pub card_number: String,
    /// Expiration as `MMYY`
    pub expiration_date: String,
    pub card_code: String,
}

impl fmt::Debug for CreditCard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreditCard")
            .field("card_number", &format!("****{}", self.last_four()))
            .field("expiration_date", &self.expiration_date)
            .field("card_code", &"***")
            .finish()
    }
}

impl CreditCard {
    pub fn new(
        card_number: impl Into<String>,
        expiration_date: impl Into<String>,
        card_code: impl Into<String>,
    ) -> Self {
        Self {
            card_number: card_number.into(),
            expiration_date: expiration_date.into(),
            card_code: card_code.into(),
        }
    }

    /// Validate number, expiry and CVV before request assembly
    pub fn validate(&self, now: DateTime<Utc>) -> ProcessorResult<()> {
        let digits_only = self.card_number.chars().all(|c| c.is_ascii_digit());
        if !digits_only || self.card_number.len() < 13 || self.card_number.len() > 19 {
            return Err(ProcessorError::Validation(
                "Card number must be 13-19 digits".to_string(),
            ));
        }

        if !luhn_check(&self.card_number) {
            return Err(ProcessorError::Validation(
                "Card number failed Luhn check".to_string(),
            ));
        }

        let (month, year) = self.expiry_parts()?;
        // Valid through the end of the expiry month
        let expired = (year, month) < (now.year(), now.month());
        if expired {
            return Err(ProcessorError::Validation("Card is expired".to_string()));
        }

        let cvv_ok = (3..=4).contains(&self.card_code.len())
            && self.card_code.chars().all(|c| c.is_ascii_digit());
        if !cvv_ok {
            return Err(ProcessorError::Validation(
                "CVV must be 3-4 digits".to_string(),
            ));
        }

        Ok(())
    }

    fn expiry_parts(&self) -> ProcessorResult<(u32, i32)> {
        if self.expiration_date.len() != 4
            || !self.expiration_date.chars().all(|c| c.is_ascii_digit())
        {
            return Err(ProcessorError::Validation(
                "Expiration must be MMYY".to_string(),
            ));
        }

        let month: u32 = self.expiration_date[..2].parse().map_err(|_| {
            ProcessorError::Validation("Expiration must be MMYY".to_string())
        })?;
        let year: i32 = self.expiration_date[2..].parse().map_err(|_| {
            ProcessorError::Validation("Expiration must be MMYY".to_string())
        })?;

        if !(1..=12).contains(&month) {
            return Err(ProcessorError::Validation(
                "Expiration month out of range".to_string(),
            ));
        }

        Ok((month, 2000 + year))
    }

    pub fn last_four(&self) -> String {
        let len = self.card_number.len();
        if len >= 4 {
            self.card_number[len - 4..].to_string()
        } else {
            self.card_number.clone()
        }
    }

    /// Two-digit expiry month as persisted on the payment
    pub fn exp_month(&self) -> String {
        self.expiration_date.chars().take(2).collect()
    }

    /// Four-digit expiry year as persisted on the payment
    pub fn exp_year(&self) -> String {
        match self.expiry_parts() {
            Ok((_, year)) => year.to_string(),
            Err(_) => String::new(),
        }
    }

    /// Brand detection from the leading digits
    pub fn brand(&self) -> &'static str {
        let n = &self.card_number;
        if n.starts_with('4') {
            "visa"
        } else if n.starts_with("34") || n.starts_with("37") {
            "amex"
        } else if n.starts_with("6011") || n.starts_with("65") {
            "discover"
        } else if n
            .get(..2)
            .and_then(|p| p.parse::<u32>().ok())
            .map(|p| (51..=55).contains(&p))
            .unwrap_or(false)
            || n.get(..4)
                .and_then(|p| p.parse::<u32>().ok())
                .map(|p| (2221..=2720).contains(&p))
                .unwrap_or(false)
        {
            "mastercard"
        } else {
            "unknown"
        }
    }
}

/// Luhn checksum over an all-digit string
pub fn luhn_check(number: &str) -> bool {
    let mut sum = 0u32;
    let mut double = false;

    for c in number.chars().rev() {
        let mut digit = match c.to_digit(10) {
            Some(d) => d,
            None => return false,
        };
        if double {
            digit *= 2;
            if digit > 9 {
                digit -= 9;
            }
        }
        sum += digit;
        double = !double;
    }

    !number.is_empty() && sum % 10 == 0
}

/// Billing address sent with charge/authorize requests
#[derive(Debug, Clone)]
pub struct BillingAddress {
    pub first_name: String,
    pub last_name: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub country: String,
}

impl BillingAddress {
    pub fn validate(&self) -> ProcessorResult<()> {
        let required = [
            ("first_name", &self.first_name),
            ("last_name", &self.last_name),
            ("address", &self.address),
            ("city", &self.city),
            ("state", &self.state),
            ("zip", &self.zip),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ProcessorError::Validation(format!(
                    "Billing {} must not be empty",
                    field
                )));
            }
        }

        let country_ok =
            self.country.len() == 2 && self.country.chars().all(|c| c.is_ascii_alphabetic());
        if !country_ok {
            return Err(ProcessorError::Validation(
                "Billing country must be a 2-letter code".to_string(),
            ));
        }

        Ok(())
    }
}

/// Optional order metadata forwarded to the processor
#[derive(Debug, Clone)]
pub struct OrderInfo {
    pub invoice_number: String,
    pub description: Option<String>,
}

/// Upstream transaction kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    AuthCapture,
    AuthOnly,
    PriorAuthCapture,
    Refund,
    Void,
}

impl TransactionType {
    pub fn as_wire(&self) -> &'static str {
        match self {
            TransactionType::AuthCapture => "authCaptureTransaction",
            TransactionType::AuthOnly => "authOnlyTransaction",
            TransactionType::PriorAuthCapture => "priorAuthCaptureTransaction",
            TransactionType::Refund => "refundTransaction",
            TransactionType::Void => "voidTransaction",
        }
    }
}

/// Outcome classes of an upstream transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Captured,
    Declined,
    Error,
}

/// Parsed processor response handed back to the engine
#[derive(Debug, Clone)]
pub struct ProcessorResponse {
    pub transaction_id: Option<String>,
    pub status: TransactionStatus,
    pub response_code: String,
    pub response_text: String,
    pub auth_code: Option<String>,
    pub avs_response: Option<String>,
    pub cvv_response: Option<String>,
    pub amount: Option<String>,
    pub ref_id: Option<String>,
    pub raw: serde_json::Value,
}

/// Render an amount in the `"d+.dd"` wire form
pub fn format_amount(amount: Decimal) -> String {
    format!("{:.2}", amount)
}

// ---------------------------------------------------------------------------
// Wire envelope (request)
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct TransactionEnvelope {
    #[serde(rename = "createTransactionRequest")]
    pub create_transaction_request: CreateTransactionRequest,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransactionRequest {
    pub merchant_authentication: MerchantAuthentication,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_id: Option<String>,
    pub transaction_request: TransactionRequest,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MerchantAuthentication {
    pub name: String,
    pub transaction_key: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub transaction_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentWire>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bill_to: Option<BillToWire>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ref_trans_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<OrderWire>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentWire {
    pub credit_card: CreditCardWire,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditCardWire {
    pub card_number: String,
    pub expiration_date: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_code: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillToWire {
    pub first_name: String,
    pub last_name: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub country: String,
}

impl From<&BillingAddress> for BillToWire {
    fn from(billing: &BillingAddress) -> Self {
        Self {
            first_name: billing.first_name.clone(),
            last_name: billing.last_name.clone(),
            address: billing.address.clone(),
            city: billing.city.clone(),
            state: billing.state.clone(),
            zip: billing.zip.clone(),
            country: billing.country.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderWire {
    pub invoice_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ---------------------------------------------------------------------------
// Wire envelope (response)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ResponseEnvelope {
    pub messages: ResponseMessages,
    #[serde(rename = "transactionResponse")]
    pub transaction_response: Option<TransactionResponsePayload>,
    #[serde(rename = "refId")]
    pub ref_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseMessages {
    #[serde(rename = "resultCode")]
    pub result_code: String,
    #[serde(default)]
    pub message: Vec<ResponseMessage>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponsePayload {
    #[serde(default)]
    pub trans_id: Option<String>,
    #[serde(default)]
    pub response_code: Option<String>,
    #[serde(default)]
    pub response_text: Option<String>,
    #[serde(default)]
    pub auth_code: Option<String>,
    #[serde(default)]
    pub avs_result_code: Option<String>,
    #[serde(default)]
    pub cvv_result_code: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
}
