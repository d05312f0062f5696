//! Roster query kernel.
//!
//! Filter and sort compilation, keyset pagination and the listing
//! endpoints built on them. The `roster` binary serves the HTTP routes.

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod middleware;
pub mod paging;
pub mod queue;
pub mod routes;
pub mod snapshot;
pub mod sort;
pub mod state;
