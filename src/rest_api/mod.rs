//! REST API module for external integrations
//!
//! Exposes instance lifecycle operations over HTTP.

mod dto;
mod handlers;
mod server;

pub use server::{router, run_server};
