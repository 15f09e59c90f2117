pub mod analyses;
pub mod analyze;
pub mod config;
pub mod recover;
pub mod serve;
pub mod status;
