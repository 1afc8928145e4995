pub mod common;
pub mod memory;
pub mod session;

pub use memory::MemorySessionRepository;
pub use session::{PgSessionRepository, SessionRepository};
