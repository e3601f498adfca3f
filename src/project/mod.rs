//! Build-system inputs
//!
//! Per-file compiler options read from a `compile_commands.json`.

pub mod compilation_database;
