//! Command implementations for the socketauth CLI

pub mod completion;
pub mod config;
pub mod run;
pub mod serve;
pub mod version;
