pub mod gate;
pub mod repository;

pub use gate::AgentGate;
pub use repository::{Agent, AgentRepository, MemoryAgentRepository, PgAgentRepository};
