pub mod config;
pub mod viya;
