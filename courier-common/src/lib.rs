pub mod codec;
pub mod config;
pub mod dead_letter;
pub mod envelope;
pub mod metrics;
pub mod outcome;
pub mod pg_store;
pub mod retry;
pub mod sender;
pub mod sink;
pub mod validation;
