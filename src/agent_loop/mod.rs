//! The agent loop and the session handle around it.

mod dispatch;
pub mod events;
pub mod memory;
pub mod runner;
pub mod session;
pub mod state;

pub use events::{EventSink, SessionEvent};
pub use memory::MemoryBinding;
pub use runner::AgentLoop;
pub use session::{Session, SessionOptions};
pub use state::LoopState;
