//! Turnstile - Fail-open Request Admission Guard
//!
//! This crate counts requests per client identity in a shared counter store
//! (Redis, or process memory for single instances) and rejects clients that
//! exceed their quota within a window. When the store cannot be reached the
//! guard lets traffic through instead of becoming a point of failure.

pub mod config;
pub mod error;
pub mod guard;
pub mod http;
pub mod store;
