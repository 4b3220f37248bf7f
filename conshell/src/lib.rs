//! # Conshell
//!
//! Process execution and streaming engine for a restricted operator console.
//!
//! An operator types shell commands into a text console that is not a terminal.
//! The engine launches each command through the platform shell, tracks it under a
//! small integer ID, and streams its combined stdout/stderr back to the console one
//! styled line at a time while the console stays responsive.
//!
//! ## Components
//!
//! - [`quoting`]: rebuilds a command line from already-split tokens for the target shell.
//! - [`environment`]: splits an environment profile into variables and prelude statements.
//! - [`registry`]: lowest-free ID allocation and the [`registry::ManagedProcess`] lifecycle object.
//! - [`engine`]: the execution pipeline (spawn, stream, timeout, stop, input, listing).
//! - [`decoder`]: the per-process byte pipeline (ANSI state machine, control-byte filter,
//!   UTF-8 decoding, line buffering and truncation).
//! - [`stats`]: process-tree memory and CPU sampling for the listing.
//! - [`platform`]: shell launch and memory sampling strategies, selected once at startup.
//! - [`console`]: a thin operator front-end (`run`, `stop`, `input`, `list`, `help`).

pub mod config;
pub mod console;
pub mod decoder;
pub mod engine;
pub mod environment;
pub mod error;
pub mod messages;
pub mod platform;
pub mod process_log;
pub mod quoting;
pub mod registry;
pub mod shell;
pub mod sink;
pub mod stats;
pub mod utils;

pub use config::EngineConfig;
pub use engine::{Engine, EngineRequest, ProcessSummary};
pub use error::{EngineError, ValidationError};
pub use sink::{ChannelSink, OutputSink};
