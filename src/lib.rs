//! Tail a log file and ship its lines to CloudWatch Logs.

pub mod backend;
pub mod cli;
pub mod config;
pub mod shipper;
pub mod source;
