pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod mocap;
pub mod ratings;
pub mod report;
pub mod stats;
