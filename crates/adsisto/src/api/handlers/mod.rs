//! API request handlers.
//!
//! - `auth`: login, logout and the current identity
//! - `keys`: key registry management
//! - `misc`: health check

mod auth;
mod keys;
mod misc;

pub use auth::{LoginRequest, LoginResponse, MeResponse, get_me, login, logout};
pub use keys::{
    DeleteKeyRequest, InsertKeyRequest, KeyEntry, KeysResponse, UpdateKeyRequest, delete_key,
    insert_key, list_keys, update_key,
};
pub use misc::{HealthResponse, health};
