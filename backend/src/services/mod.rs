pub mod cache;
pub mod events;
pub mod identity;
pub mod session_manager;
pub mod session_store;
pub mod token_blacklist;

pub use session_manager::{Actor, ExtendedSession, IssuedSession, SessionManager, SessionSettings};
pub use session_store::SessionStore;
