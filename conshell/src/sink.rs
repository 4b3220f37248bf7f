//! # Output Sinks
//!
//! The engine hands every operator-visible line to an [`OutputSink`]. A send is
//! fire-and-forget: the engine never waits for the line to be rendered and never learns
//! whether it was. Calls made from the same process task arrive in the order they were
//! made, which every implementation here preserves.
//!
//! - [`ChannelSink`] forwards lines over an unbounded channel. Tests and embedders read
//!   the receiving half.
//! - [`TerminalSink`] writes lines to stdout, either with style codes stripped or with
//!   them translated to ANSI escape sequences.

use crate::decoder::ansi::{strip_style_codes, style_to_ansi};
use std::io::Write;
use tokio::sync::mpsc;

/// Receives one styled line at a time for the operator.
pub trait OutputSink: Send + Sync {
    fn send(&self, line: String);
}

/// Sink backed by an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl OutputSink for ChannelSink {
    fn send(&self, line: String) {
        // A dropped receiver means nobody is watching any more.
        if self.sender.send(line).is_err() {
            tracing::trace!("Output receiver closed, dropping line");
        }
    }
}

/// Sink that prints to stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalSink {
    ansi: bool,
}

impl TerminalSink {
    pub fn new(ansi: bool) -> Self {
        Self { ansi }
    }

    pub fn render(&self, line: &str) -> String {
        if self.ansi {
            style_to_ansi(line)
        } else {
            strip_style_codes(line)
        }
    }
}

impl OutputSink for TerminalSink {
    fn send(&self, line: String) {
        let rendered = self.render(&line);
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{rendered}").and_then(|_| stdout.flush()) {
            tracing::warn!("Failed to write console line: {}", e);
        }
    }
}
