//! Daemon that watches which window holds input focus and turns every focus
//! session into a timed activity record. Activities flow from watchers through
//! optional filters into loggers that persist them locally or spool them for a
//! quantified-self service.
//!

pub mod agent;
pub mod daemon;
pub mod settings;
pub mod utils;
pub mod window_api;
