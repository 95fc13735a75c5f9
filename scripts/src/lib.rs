//! Scripts for deploying and verifying the Governor and its governance Token.

pub mod cli;
pub mod commands;
pub mod constants;
pub mod errors;
pub mod utils;

/// Our artifact utils
pub mod build;

/// Our deploy utils
pub mod deploy;

// Our output utils
mod output_writer;

pub mod tx;

/// Our explorer verification utils
pub mod verify;
