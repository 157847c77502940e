// Repo Press - article generation API
//
// Accepts repository URLs, runs a slow generative analysis for each one, and
// streams live progress to any number of watching clients. Results are cached
// by slug so the expensive analysis runs at most once per repository.

pub mod config;
pub mod kernel;
pub mod server;

pub use config::*;
