//! Sim Module
//!
//! Deterministic fixed-step racing core: track and pit geometry, the car
//! roster, the per-tick stepper and lap/split timing.

pub mod car;
pub mod config;
pub mod error;
pub mod geom;
pub mod physics;
pub mod pit;
pub mod race;
pub mod simulation;
pub mod splits;
pub mod track;
pub mod world;

pub use car::{AbilityStats, Car, Coefficients, PitState};
pub use config::RaceConfig;
pub use error::{SimError, SimResult};
pub use pit::PitFacility;
pub use race::{Race, RaceSnapshot, RaceStatus};
pub use simulation::{ControlCommand, RaceServer, SharedRaceServer};
pub use track::Track;
pub use world::WorldDescriptor;
