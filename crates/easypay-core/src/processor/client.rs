//! Authorize.net API client

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::ProcessorConfig;
use crate::processor::models::{
    format_amount, BillToWire, BillingAddress, CreateTransactionRequest, CreditCard,
    CreditCardWire, MerchantAuthentication, OrderInfo, OrderWire, PaymentWire, ProcessorResponse,
    ResponseEnvelope, TransactionEnvelope, TransactionRequest, TransactionStatus, TransactionType,
};
use crate::processor::{ProcessorClient, ProcessorError, ProcessorResult};

/// Message codes that indicate a credential problem rather than a
/// transaction problem
const AUTH_ERROR_CODES: [&str; 4] = ["E00005", "E00006", "E00007", "E00008"];

/// Authorize.net client for payment processing
pub struct AuthorizeNetClient {
    config: ProcessorConfig,
    endpoint: String,
    client: reqwest::Client,
}

impl AuthorizeNetClient {
    /// Build a client from processor configuration
    pub fn new(config: ProcessorConfig) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("EasyPay-Payment-Gateway/1.0")
            .build()
            .map_err(|e| crate::Error::Config(format!("HTTP client build failed: {}", e)))?;

        let endpoint = config.endpoint();

        info!(
            "Authorize.net client initialized for {}",
            if config.sandbox { "sandbox" } else { "production" }
        );

        Ok(Self {
            config,
            endpoint,
            client,
        })
    }

    fn credentials(&self) -> MerchantAuthentication {
        MerchantAuthentication {
            name: self.config.api_login_id.clone(),
            transaction_key: self.config.transaction_key.clone(),
        }
    }

    fn envelope(
        &self,
        ref_id: Option<&str>,
        transaction_request: TransactionRequest,
    ) -> TransactionEnvelope {
        TransactionEnvelope {
            create_transaction_request: CreateTransactionRequest {
                merchant_authentication: self.credentials(),
                ref_id: ref_id.map(String::from),
                transaction_request,
            },
        }
    }

    /// POST the envelope and decode the response body
    async fn send(&self, envelope: &TransactionEnvelope) -> ProcessorResult<serde_json::Value> {
        debug!("Sending request to Authorize.net: {}", self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .json(envelope)
            .send()
            .await
            .map_err(|e| {
                error!("HTTP error communicating with Authorize.net: {}", e);
                ProcessorError::Network(format!("Request failed: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProcessorError::Network(format!(
                "Unexpected HTTP status {}",
                status
            )));
        }

        response.json().await.map_err(|e| {
            error!("Invalid JSON response from Authorize.net: {}", e);
            ProcessorError::Network("Invalid response format".to_string())
        })
    }

    /// Two-level response parse: outer `messages.resultCode` for
    /// protocol-level failures, inner `responseCode` for the transaction
    /// outcome.
    fn parse(&self, raw: serde_json::Value) -> ProcessorResult<ProcessorResponse> {
        let envelope: ResponseEnvelope = serde_json::from_value(raw.clone())
            .map_err(|e| ProcessorError::Network(format!("Malformed envelope: {}", e)))?;

        if envelope.messages.result_code != "Ok" {
            let (code, text) = envelope
                .messages
                .message
                .first()
                .map(|m| (m.code.clone(), m.text.clone()))
                .unwrap_or_else(|| ("0".to_string(), "Transaction failed".to_string()));

            if AUTH_ERROR_CODES.contains(&code.as_str()) {
                return Err(ProcessorError::Authentication(text));
            }

            return Err(ProcessorError::Transaction {
                message: text,
                response_code: Some(code),
                transaction_id: envelope
                    .transaction_response
                    .and_then(|t| t.trans_id),
            });
        }

        let txn = envelope.transaction_response.ok_or_else(|| {
            ProcessorError::Transaction {
                message: "Response carried no transactionResponse".to_string(),
                response_code: None,
                transaction_id: None,
            }
        })?;

        let response_code = txn.response_code.clone().unwrap_or_else(|| "0".to_string());
        let status = match response_code.as_str() {
            "1" => TransactionStatus::Captured,
            "2" => TransactionStatus::Declined,
            _ => {
                return Err(ProcessorError::Transaction {
                    message: txn
                        .response_text
                        .unwrap_or_else(|| "Transaction failed".to_string()),
                    response_code: Some(response_code),
                    transaction_id: txn.trans_id,
                });
            }
        };

        Ok(ProcessorResponse {
            transaction_id: txn.trans_id,
            status,
            response_code,
            response_text: txn.response_text.unwrap_or_default(),
            auth_code: txn.auth_code,
            avs_response: txn.avs_result_code,
            cvv_response: txn.cvv_result_code,
            amount: txn.amount,
            ref_id: envelope.ref_id,
            raw,
        })
    }

    async fn submit_card_transaction(
        &self,
        transaction_type: TransactionType,
        amount: Decimal,
        card: &CreditCard,
        billing: &BillingAddress,
        order: Option<OrderInfo>,
        ref_id: Option<&str>,
    ) -> ProcessorResult<ProcessorResponse> {
        card.validate(chrono::Utc::now())?;
        billing.validate()?;

        let envelope = self.envelope(
            ref_id,
            TransactionRequest {
                transaction_type: transaction_type.as_wire(),
                amount: Some(format_amount(amount)),
                payment: Some(PaymentWire {
                    credit_card: CreditCardWire {
                        card_number: card.card_number.clone(),
                        expiration_date: card.expiration_date.clone(),
                        card_code: Some(card.card_code.clone()),
                    },
                }),
                bill_to: Some(BillToWire::from(billing)),
                ref_trans_id: None,
                order: order.map(|o| OrderWire {
                    invoice_number: o.invoice_number,
                    description: o.description,
                }),
            },
        );

        let raw = self.send(&envelope).await?;
        self.parse(raw)
    }
}

#[async_trait]
impl ProcessorClient for AuthorizeNetClient {
    async fn authenticate(&self) -> ProcessorResult<bool> {
        let envelope = self.envelope(
            Some("auth_check"),
            TransactionRequest {
                transaction_type: TransactionType::AuthOnly.as_wire(),
                amount: Some(format_amount(dec!(0.01))),
                payment: Some(PaymentWire {
                    credit_card: CreditCardWire {
                        card_number: "4111111111111111".to_string(),
                        expiration_date: "1225".to_string(),
                        card_code: Some("123".to_string()),
                    },
                }),
                bill_to: Some(BillToWire {
                    first_name: "Test".to_string(),
                    last_name: "User".to_string(),
                    address: "123 Test St".to_string(),
                    city: "Test City".to_string(),
                    state: "CA".to_string(),
                    zip: "12345".to_string(),
                    country: "US".to_string(),
                }),
                ref_trans_id: None,
                order: None,
            },
        );

        let raw = self.send(&envelope).await?;
        let result_code = raw
            .get("messages")
            .and_then(|m| m.get("resultCode"))
            .and_then(|c| c.as_str())
            .unwrap_or("Error");

        if result_code == "Ok" {
            info!("Authorize.net authentication check successful");
            Ok(true)
        } else {
            let text = raw
                .get("messages")
                .and_then(|m| m.get("message"))
                .and_then(|m| m.get(0))
                .and_then(|m| m.get("text"))
                .and_then(|t| t.as_str())
                .unwrap_or("Authentication failed");
            Err(ProcessorError::Authentication(text.to_string()))
        }
    }

    async fn charge_card(
        &self,
        amount: Decimal,
        card: &CreditCard,
        billing: &BillingAddress,
        order: Option<OrderInfo>,
        ref_id: Option<&str>,
    ) -> ProcessorResult<ProcessorResponse> {
        self.submit_card_transaction(
            TransactionType::AuthCapture,
            amount,
            card,
            billing,
            order,
            ref_id,
        )
        .await
    }

    async fn authorize_only(
        &self,
        amount: Decimal,
        card: &CreditCard,
        billing: &BillingAddress,
        order: Option<OrderInfo>,
        ref_id: Option<&str>,
    ) -> ProcessorResult<ProcessorResponse> {
        self.submit_card_transaction(
            TransactionType::AuthOnly,
            amount,
            card,
            billing,
            order,
            ref_id,
        )
        .await
    }

    async fn capture(
        &self,
        transaction_id: &str,
        amount: Option<Decimal>,
        ref_id: Option<&str>,
    ) -> ProcessorResult<ProcessorResponse> {
        let envelope = self.envelope(
            ref_id,
            TransactionRequest {
                transaction_type: TransactionType::PriorAuthCapture.as_wire(),
                amount: amount.map(format_amount),
                payment: None,
                bill_to: None,
                ref_trans_id: Some(transaction_id.to_string()),
                order: None,
            },
        );

        let raw = self.send(&envelope).await?;
        self.parse(raw)
    }

    async fn refund(
        &self,
        transaction_id: &str,
        amount: Decimal,
        card: &CreditCard,
        ref_id: Option<&str>,
    ) -> ProcessorResult<ProcessorResponse> {
        let envelope = self.envelope(
            ref_id,
            TransactionRequest {
                transaction_type: TransactionType::Refund.as_wire(),
                amount: Some(format_amount(amount)),
                // Refunds reference the card without CVV
                payment: Some(PaymentWire {
                    credit_card: CreditCardWire {
                        card_number: card.card_number.clone(),
                        expiration_date: card.expiration_date.clone(),
                        card_code: None,
                    },
                }),
                bill_to: None,
                ref_trans_id: Some(transaction_id.to_string()),
                order: None,
            },
        );

        let raw = self.send(&envelope).await?;
        self.parse(raw)
    }

    async fn void(
        &self,
        transaction_id: &str,
        ref_id: Option<&str>,
    ) -> ProcessorResult<ProcessorResponse> {
        let envelope = self.envelope(
            ref_id,
            TransactionRequest {
                transaction_type: TransactionType::Void.as_wire(),
                amount: None,
                payment: None,
                bill_to: None,
                ref_trans_id: Some(transaction_id.to_string()),
                order: None,
            },
        );

        let raw = self.send(&envelope).await?;
        self.parse(raw)
    }
}
