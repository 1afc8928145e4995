pub mod session;
pub mod session_query;

pub use session::*;
pub use session_query::*;
