//! Command-line control panel for a studio server.

pub mod commands;
pub mod payload;
pub mod render;
