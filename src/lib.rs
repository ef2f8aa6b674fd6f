//! Library crate for bloops-bot: session orchestration, recovery and storage for the
//! chat word game, exposed for the binary and for tests.

pub mod config;
pub mod dao;
pub mod dto;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod routes;
pub mod services;
pub mod state;
#[cfg(test)]
mod testing;
