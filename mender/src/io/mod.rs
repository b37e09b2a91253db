//! Side-effecting adapters: filesystem, child processes, and collaborators.

pub mod config;
pub mod discovery;
pub mod experiment_log;
pub mod process;
pub mod prompt;
pub mod reasoner;
pub mod sandbox;
pub mod tools;
