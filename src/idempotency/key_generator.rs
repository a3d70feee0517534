use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Configuration for idempotency key generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyGeneratorConfig {
    /// Prefix for generated keys
    pub key_prefix: String,
}

impl Default for KeyGeneratorConfig {
    fn default() -> Self {
        Self {
            key_prefix: "settle".to_string(),
        }
    }
}

/// Attributes identifying one charge attempt against an invoice.
///
/// Retries of the same attempt (same invoice, instrument and amount) must hash to the same key
/// so the gateway replays the original authorization instead of charging again. Callers that
/// deliberately start a new attempt, e.g. after a decline, bump `attempt`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeAttempt {
    pub invoice_id: i64,
    /// Gateway payment method token or saved method reference.
    pub payment_method: String,
    pub amount_minor: i64,
    pub attempt: Option<u32>,
}

impl ChargeAttempt {
    pub fn new(invoice_id: i64, payment_method: impl Into<String>, amount_minor: i64) -> Self {
        Self {
            invoice_id,
            payment_method: payment_method.into(),
            amount_minor,
            attempt: None,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }
}

/// Generator for idempotency keys using SHA-256 hashing.
#[derive(Debug, Clone)]
pub struct IdempotencyKeyGenerator {
    config: KeyGeneratorConfig,
}

impl IdempotencyKeyGenerator {
    pub fn new(config: KeyGeneratorConfig) -> Self {
        Self { config }
    }

    pub fn with_default_config() -> Self {
        Self::new(KeyGeneratorConfig::default())
    }

    /// Generates the gateway idempotency key for a charge attempt.
    pub fn charge_key(&self, charge: &ChargeAttempt) -> String {
        let mut hasher = Sha256::new();

        hasher.update(b"inv:");
        hasher.update(charge.invoice_id.to_string().as_bytes());
        hasher.update(b"|pm:");
        hasher.update(charge.payment_method.trim().as_bytes());
        hasher.update(b"|amt:");
        hasher.update(charge.amount_minor.to_string().as_bytes());

        if let Some(attempt) = charge.attempt {
            hasher.update(b"|try:");
            hasher.update(attempt.to_string().as_bytes());
        }

        let hash_hex = hex::encode(hasher.finalize());

        format!("{}_{}", self.config.key_prefix, hash_hex)
    }
}

impl Default for IdempotencyKeyGenerator {
    fn default() -> Self {
        Self::with_default_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation_consistency() {
        let generator = IdempotencyKeyGenerator::with_default_config();
        let charge = ChargeAttempt::new(1042, "pm_card_visa", 15000);

        let key1 = generator.charge_key(&charge);
        let key2 = generator.charge_key(&charge.clone());

        assert_eq!(key1, key2);
        assert!(key1.starts_with("settle_"));
        // SHA-256 produces 64 hex chars + prefix + underscore
        assert_eq!(key1.len(), "settle_".len() + 64);
    }

    #[test]
    fn test_different_attributes_different_keys() {
        let generator = IdempotencyKeyGenerator::with_default_config();

        let base = ChargeAttempt::new(1042, "pm_card_visa", 15000);
        let other_amount = ChargeAttempt::new(1042, "pm_card_visa", 15001);
        let other_method = ChargeAttempt::new(1042, "pm_card_amex", 15000);
        let other_invoice = ChargeAttempt::new(1043, "pm_card_visa", 15000);

        let key = generator.charge_key(&base);
        assert_ne!(key, generator.charge_key(&other_amount));
        assert_ne!(key, generator.charge_key(&other_method));
        assert_ne!(key, generator.charge_key(&other_invoice));
    }

    #[test]
    fn test_attempt_number_starts_new_key() {
        let generator = IdempotencyKeyGenerator::with_default_config();
        let first = ChargeAttempt::new(7, "pm_1", 500);
        let retry = first.clone().with_attempt(2);

        assert_ne!(generator.charge_key(&first), generator.charge_key(&retry));
        assert_eq!(
            generator.charge_key(&retry),
            generator.charge_key(&ChargeAttempt::new(7, "pm_1", 500).with_attempt(2))
        );
    }

    #[test]
    fn test_custom_prefix() {
        let generator = IdempotencyKeyGenerator::new(KeyGeneratorConfig {
            key_prefix: "test".to_string(),
        });
        let key = generator.charge_key(&ChargeAttempt::new(1, "pm", 1));
        assert!(key.starts_with("test_"));
    }
}
