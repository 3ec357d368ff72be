//! OAuth session management for accounting realms.
//!
//! `IntuitProvider` talks to the authorization server, `SessionManager` keeps
//! one token lifecycle per realm on top of it and persists every issued pair.

mod intuit;
pub(crate) mod session;
mod token;
mod traits;

pub use intuit::{IntuitProvider, ACCOUNTING_SCOPE, OPENID_SCOPE};
pub use session::{SessionManager, SessionState};
pub use token::ACCESS_TOKEN_LATENCY_SECS;
pub use traits::{OAuthProvider, TokenSet};
