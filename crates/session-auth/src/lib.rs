//! Session credentials for the API client
//!
//! Owns the access/refresh token pair: persistence through a `SessionStore`,
//! the token endpoint exchanges (login, refresh, logout), and the
//! `RefreshCoordinator` that guarantees at most one refresh exchange is in
//! flight no matter how many requests hit 401 at once.
//!
//! Credential flow:
//! 1. `RefreshCoordinator::login()` exchanges email/password for a token pair
//! 2. The pair is persisted via `SessionStore::set()`
//! 3. The dispatcher attaches the access token to every request
//! 4. A 401 calls `handle_unauthorized()`; concurrent callers share one exchange
//! 5. Exchange failure clears both tokens and publishes `RefreshState::Failed`
//! 6. `logout()` revokes the refresh token server-side and clears the store

pub mod constants;
pub mod coordinator;
pub mod error;
pub mod store;
pub mod token;

pub use constants::*;
pub use coordinator::{RefreshCoordinator, RefreshState};
pub use error::{Error, Result};
pub use store::{CredentialPair, FileSessionStore, MemorySessionStore, SessionStore};
pub use token::{TokenResponse, login, refresh_access_token, revoke};
