//! HTTP surface for Hotvault.
//!
//! The binary in `main.rs` loads [`hotvault_core::Config`], initializes telemetry and
//! hands off to [`setup::initialize_app`]. Integration tests build the same router
//! through [`setup::routes::setup_routes`] over an in-memory store.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod setup;
pub mod state;
pub mod telemetry;
