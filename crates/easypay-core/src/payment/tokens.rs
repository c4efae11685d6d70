//! Card token resolution
//!
//! Payments carry an opaque `card_token`; no PAN is ever persisted. The
//! sandbox vault below maps the well-known test tokens onto the
//! processor's test cards so the engine can assemble an upstream request.

use crate::processor::{BillingAddress, CreditCard};
use crate::{Error, Result};

/// Resolve an opaque card token into processor inputs
pub fn resolve_card_token(token: &str) -> Result<(CreditCard, BillingAddress)> {
    let card_number = match token {
        "tok_visa" => "4111111111111111",
        "tok_visa_4242" => "4242424242424242",
        "tok_mastercard" => "5424000000000015",
        "tok_amex" => "370000000000002",
        "tok_discover" => "6011000000000012",
        _ => {
            return Err(Error::validation(format!(
                "Unknown card token: {}",
                token
            )))
        }
    };

    Ok((
        CreditCard::new(card_number, "1230", "123"),
        default_billing_address(),
    ))
}

fn default_billing_address() -> BillingAddress {
    BillingAddress {
        first_name: "Test".to_string(),
        last_name: "Customer".to_string(),
        address: "123 Test St".to_string(),
        city: "Test City".to_string(),
        state: "CA".to_string(),
        zip: "12345".to_string(),
        country: "US".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::luhn_check;

    #[test]
    fn test_known_tokens_resolve_to_valid_cards() {
        for token in [
            "tok_visa",
            "tok_visa_4242",
            "tok_mastercard",
            "tok_amex",
            "tok_discover",
        ] {
            let (card, billing) = resolve_card_token(token).unwrap();
            assert!(luhn_check(&card.card_number), "token {} failed Luhn", token);
            assert!(billing.validate().is_ok());
        }
    }

    #[test]
    fn test_brand_matches_token() {
        let (card, _) = resolve_card_token("tok_visa_4242").unwrap();
        assert_eq!(card.brand(), "visa");
        assert_eq!(card.last_four(), "4242");

        let (card, _) = resolve_card_token("tok_mastercard").unwrap();
        assert_eq!(card.brand(), "mastercard");
    }

    #[test]
    fn test_unknown_token_rejected() {
        let err = resolve_card_token("tok_bogus").unwrap_err();
        assert_eq!(err.category(), "validation");
    }
}
