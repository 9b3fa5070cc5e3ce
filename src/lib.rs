pub mod api;
pub mod config;
pub mod error;
pub mod mutator;
pub mod parser;
pub mod refine;
// cmd and reports are modules of the binary crate (main.rs).
