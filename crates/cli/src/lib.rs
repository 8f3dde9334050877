//! Stdio bridge for the ember embedded runtime.

pub mod cli;
pub mod commands;
pub mod logging;
pub mod providers;
