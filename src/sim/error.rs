//! Error types for race construction and stepping

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("track needs at least {min} control points, got {found}")]
    TooFewControlPoints { found: usize, min: usize },

    #[error("degenerate track geometry: {reason}")]
    DegenerateTrack { reason: String },

    #[error("track has no straight long enough for a pit lane")]
    NoStraight,

    #[error("pit window of {window} samples cannot hold {stalls} stalls")]
    PitWindowTooShort { window: usize, stalls: usize },

    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown car id {id}")]
    UnknownCar { id: u32 },

    #[error("grid order must list every car exactly once")]
    IncompleteGridOrder,

    #[error("grid order can only change before the start")]
    RaceAlreadyStarted,

    #[error("car {id} is pitting without a stall")]
    MissingStall { id: u32 },

    #[error("car {id} reached a non-finite state")]
    NonFiniteState { id: u32 },

    #[error("race server lock poisoned")]
    LockPoisoned,
}

impl<T> From<std::sync::PoisonError<T>> for SimError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        SimError::LockPoisoned
    }
}

impl SimError {
    /// Errors a running race can shrug off by skipping the offending car
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SimError::NonFiniteState { .. } | SimError::MissingStall { .. }
        )
    }
}

pub type SimResult<T> = Result<T, SimError>;
