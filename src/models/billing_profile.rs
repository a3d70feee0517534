use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Maps a local user to exactly one gateway customer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CustomerBillingProfile {
    pub user_id: i64,
    pub external_customer_id: String,
    pub created_at: DateTime<Utc>,
}

/// Tokenized handle to a reusable payment instrument. Never holds raw card data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PaymentMethodReference {
    pub id: i64,
    pub user_id: i64,
    pub gateway_method_id: String,
    pub brand: Option<String>,
    pub last4: Option<String>,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

impl PaymentMethodReference {
    /// Display label, e.g. "Visa ending in 4242".
    pub fn label(&self) -> String {
        payment_method_label(self.brand.as_deref(), self.last4.as_deref())
    }
}

/// Values for persisting a newly saved payment method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPaymentMethod {
    pub user_id: i64,
    pub gateway_method_id: String,
    pub brand: Option<String>,
    pub last4: Option<String>,
    pub is_default: bool,
}

/// Builds the display label stored on paid invoices.
pub fn payment_method_label(brand: Option<&str>, last4: Option<&str>) -> String {
    let brand = match brand {
        Some(b) if !b.is_empty() => {
            let mut chars = b.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => "Card".to_string(),
            }
        }
        _ => "Card".to_string(),
    };
    match last4 {
        Some(digits) if !digits.is_empty() => format!("{} ending in {}", brand, digits),
        _ => brand,
    }
}
