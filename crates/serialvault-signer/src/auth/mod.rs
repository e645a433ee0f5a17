//! Authorization layer.
//!
//! Callers arrive already authenticated, carrying a fixed [`Scope`]. Every
//! check dispatches on that scope; nothing here escalates it.

pub mod guard;
pub mod scope;

pub use guard::Authorizer;
pub use scope::{AuthenticatedUser, Scope};
