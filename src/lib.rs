pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod gateway;
pub mod idempotency;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod services;
