//! Adsisto authentication core.
//!
//! Two-phase JWT authentication for the device console:
//! - clients prove ownership of a registered key with a self-signed assertion
//! - the server answers with a short-lived session token signed by its own key
//! - every protected request is checked against that session token and,
//!   where configured, a minimum access level
//!
//! Identities and their public keys live in a pluggable [`registry::KeyRegistry`].

pub mod api;
pub mod audit;
pub mod auth;
pub mod config;
pub mod registry;
