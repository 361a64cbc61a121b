//! Credentials for the marketplace REST API
//!
//! Token issuance happens elsewhere (the web login); this client only stores
//! the bearer token it is given and refuses to use it once expired.

pub mod session;
pub mod tokens;

pub use session::{init, logout, status, InitOptions};
pub use tokens::StoredToken;
