//! Authentication module for portal sessions and client credentials.
//!
//! This module provides:
//! - `UserCredential`, `Session`: the identity and the portal handle it buys
//! - `SessionPool`: one session per user, renewed on expiry, single login per user
//! - `CredentialVault`: seals credentials into expiring client tokens

pub mod pool;
pub mod session;
pub mod vault;

pub use pool::SessionPool;
pub use session::{Session, SessionStatus, UserCredential};
pub use vault::CredentialVault;
