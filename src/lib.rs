//! Circuit Sim - Racing simulation core
//!
//! A fleet of autonomous cars laps a procedurally generated circuit at a
//! fixed tick rate, negotiating overtakes and a shared pit lane. Viewers
//! receive a world descriptor once and down-sampled snapshots after that;
//! control commands start, pause and regrid the race.

pub mod sim;

pub use sim::{
    ControlCommand, Race, RaceConfig, RaceServer, RaceSnapshot, RaceStatus, SharedRaceServer,
    SimError, SimResult, WorldDescriptor,
};
