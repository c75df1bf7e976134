//! # capstone
//!
//! Operator CLI for the Capstone engine: configuration, logging setup,
//! command dispatch and console delivery of access codes.

pub mod cli;
pub mod config;
pub mod mailer;
