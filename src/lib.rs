pub mod candidate;
pub mod classify;
pub mod cli;
pub mod config;
pub mod probe;
pub mod report;
pub mod transport;
pub mod util;
