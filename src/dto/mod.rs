//! Payloads served over HTTP.

pub mod health;
