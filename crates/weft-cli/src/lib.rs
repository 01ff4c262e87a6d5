mod local;
mod logging;
pub mod runner;
mod simulation;
