//! # Shell Module
//!
//! Entry point and CLI logic for the `conshell` binary: an interactive operator console
//! reading commands from stdin and printing process output to stdout.

pub mod cli;

pub use cli::run;
