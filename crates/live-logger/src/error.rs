use crate::engine::EngineState;
use thiserror::Error;

/// Reasons the engine cannot reach or leave the polling phase.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Protocol(#[from] kwp2000::Error),
    #[error("engine is {0:?}, expected {1:?}")]
    InvalidState(EngineState, EngineState),
}
