pub mod application;
pub mod cloud;
pub mod data;
pub mod error;
pub mod id;
pub mod monitor;
pub mod optimizer;
pub mod runtime;
pub mod scheduler;
pub mod task;
pub mod trace;
