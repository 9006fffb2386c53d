//! Offline-first capture upload engine.
//!
//! Captures and their resources are recorded in SQLite; each resource gets a
//! resumable multipart upload request that sync passes drive to completion.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
