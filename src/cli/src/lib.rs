//! ocipeek CLI.

pub mod commands;
