pub mod key_generator;

pub use key_generator::{ChargeAttempt, IdempotencyKeyGenerator, KeyGeneratorConfig};
