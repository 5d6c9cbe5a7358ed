use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("daily token budget exhausted")]
    BudgetExhausted,

    #[error(transparent)]
    Agent(#[from] herald_agents::AgentError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
