//! # Streaming Decoder
//!
//! Turns the raw combined output of one child process into console lines, incrementally,
//! as bytes arrive. Each byte goes through the same pipeline:
//!
//! 1. [`ansi::AnsiParser`] swallows escape sequences and turns SGR color sequences into
//!    console style codes (when styling is on).
//! 2. `\r` and `\n` end the current line. Empty lines are not emitted, so `\r\n` does not
//!    produce a blank line.
//! 3. Other control bytes below 0x20, except tab, are dropped. Under
//!    [`ControlBytePolicy::Terminate`] the first one is reported instead and decoding stops.
//! 4. Everything else accumulates in a [`lines::LineBuffer`]. A line that grows past the
//!    maximum length is emitted early, followed by a [`Decoded::Truncated`] marker, and the
//!    rest continues as the next line.
//!
//! The caller decides when the source is idle ([`StreamDecoder::flush_idle`]) and when it
//! has ended ([`StreamDecoder::finish`]).

pub mod ansi;
pub mod lines;

use ansi::{AnsiParser, Step};
use lines::LineBuffer;

/// What to do with stray control bytes in the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlBytePolicy {
    /// Drop them silently.
    #[default]
    Skip,
    /// Report the first one and stop decoding; the caller terminates the process.
    Terminate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderOptions {
    pub max_line_length: usize,
    pub styling: bool,
    pub control_bytes: ControlBytePolicy,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        Self {
            max_line_length: crate::config::DEFAULT_MAX_LINE_LENGTH,
            styling: true,
            control_bytes: ControlBytePolicy::Skip,
        }
    }
}

/// One unit of decoder output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Line(String),
    /// The previous line was cut at the maximum length.
    Truncated,
    /// A control byte was seen under [`ControlBytePolicy::Terminate`].
    ControlByte(u8),
}

#[derive(Debug)]
pub struct StreamDecoder {
    options: DecoderOptions,
    parser: AnsiParser,
    buffer: LineBuffer,
    lines_emitted: usize,
    halted: bool,
}

impl StreamDecoder {
    pub fn new(options: DecoderOptions) -> Self {
        Self {
            options,
            parser: AnsiParser::new(),
            buffer: LineBuffer::new(options.max_line_length),
            lines_emitted: 0,
            halted: false,
        }
    }

    /// True once a control byte stopped decoding.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    pub fn feed(&mut self, bytes: &[u8], emit: &mut impl FnMut(Decoded)) {
        for &byte in bytes {
            if self.halted {
                return;
            }
            match self.parser.advance(byte, self.options.styling) {
                Step::Consumed => {}
                Step::Style(codes) => {
                    self.buffer.extend(codes.as_bytes());
                    self.check_length(emit);
                }
                Step::Pass(b'\r' | b'\n') => self.end_line(emit),
                Step::Pass(byte) if byte < 0x20 && byte != b'\t' => {
                    if self.options.control_bytes == ControlBytePolicy::Terminate {
                        self.halted = true;
                        emit(Decoded::ControlByte(byte));
                    }
                }
                Step::Pass(byte) => {
                    self.buffer.push(byte);
                    self.check_length(emit);
                }
            }
        }
    }

    /// Emits pending partial content because no more input is immediately available.
    /// An unfinished multi-byte character stays buffered.
    pub fn flush_idle(&mut self, emit: &mut impl FnMut(Decoded)) {
        if self.halted || self.buffer.is_empty() {
            return;
        }
        let line = self.buffer.take_complete();
        self.emit_line(line, emit);
    }

    /// Flushes whatever is left at end of stream.
    ///
    /// A stream that produced no line at all yields one empty line, so an intentionally
    /// empty result is still visible.
    pub fn finish(mut self, emit: &mut impl FnMut(Decoded)) {
        if self.halted {
            return;
        }
        let line = self.buffer.take_line();
        if line.is_empty() && self.lines_emitted == 0 {
            emit(Decoded::Line(line));
            return;
        }
        self.emit_line(line, emit);
    }

    fn end_line(&mut self, emit: &mut impl FnMut(Decoded)) {
        if self.buffer.is_empty() {
            return;
        }
        let line = self.buffer.take_line();
        self.emit_line(line, emit);
    }

    fn check_length(&mut self, emit: &mut impl FnMut(Decoded)) {
        if !self.buffer.over_limit() {
            return;
        }
        // A split character held back as the whole remainder leaves nothing to mark.
        let line = self.buffer.take_complete();
        if self.emit_line(line, emit) {
            emit(Decoded::Truncated);
        }
    }

    fn emit_line(&mut self, line: String, emit: &mut impl FnMut(Decoded)) -> bool {
        if line.is_empty() {
            return false;
        }
        self.lines_emitted += 1;
        emit(Decoded::Line(line));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(max: usize) -> DecoderOptions {
        DecoderOptions {
            max_line_length: max,
            ..DecoderOptions::default()
        }
    }

    fn decode(options: DecoderOptions, chunks: &[&[u8]], idle_between: bool) -> Vec<Decoded> {
        let mut out = Vec::new();
        let mut decoder = StreamDecoder::new(options);
        for chunk in chunks {
            decoder.feed(chunk, &mut |d| out.push(d));
            if idle_between {
                decoder.flush_idle(&mut |d| out.push(d));
            }
        }
        decoder.finish(&mut |d| out.push(d));
        out
    }

    fn line(text: &str) -> Decoded {
        Decoded::Line(text.to_string())
    }

    #[test]
    fn red_hello_becomes_one_styled_line() {
        let out = decode(options(100), &[b"\x1b[31mHELLO\x1b[0m\n"], false);
        assert_eq!(out, vec![line("§cHELLO§r")]);
    }

    #[test]
    fn carriage_return_and_newline_each_end_a_line() {
        let out = decode(options(100), &[b"a\r\nb\rc\n\n"], false);
        assert_eq!(out, vec![line("a"), line("b"), line("c")]);
    }

    #[test]
    fn control_bytes_are_dropped_but_tab_kept() {
        let out = decode(options(100), &[b"a\x00\x07b\tc\n"], false);
        assert_eq!(out, vec![line("ab\tc")]);
    }

    #[test]
    fn strict_mode_reports_control_byte_and_stops() {
        let opts = DecoderOptions {
            control_bytes: ControlBytePolicy::Terminate,
            ..options(100)
        };
        let mut out = Vec::new();
        let mut decoder = StreamDecoder::new(opts);
        decoder.feed(b"ok\n\x07more\n", &mut |d| out.push(d));
        assert!(decoder.is_halted());
        decoder.finish(&mut |d| out.push(d));
        assert_eq!(out, vec![line("ok"), Decoded::ControlByte(0x07)]);
    }

    #[test]
    fn overlong_line_is_truncated_then_continues() {
        let out = decode(options(4), &[b"abcdefgh\n"], false);
        assert_eq!(
            out,
            vec![line("abcde"), Decoded::Truncated, line("fgh")]
        );
    }

    #[test]
    fn tiny_limit_never_marks_an_empty_split() {
        let emoji = "😀".as_bytes();
        let chunks: Vec<&[u8]> = emoji.chunks(1).collect();
        let out = decode(options(2), &chunks, false);
        assert_eq!(out, vec![line("😀"), Decoded::Truncated]);
    }

    #[test]
    fn idle_flush_emits_prompt_without_newline() {
        let mut out = Vec::new();
        let mut decoder = StreamDecoder::new(options(100));
        decoder.feed(b"Password: ", &mut |d| out.push(d));
        assert!(out.is_empty());
        decoder.flush_idle(&mut |d| out.push(d));
        assert_eq!(out, vec![line("Password: ")]);
        assert!(!decoder.has_pending());
    }

    #[test]
    fn character_split_across_reads_survives_idle_flush() {
        let euro = "€".as_bytes();
        let out = decode(options(100), &[&[b'1', euro[0]], &euro[1..], b"\n"], true);
        assert_eq!(out, vec![line("1"), line("€")]);
    }

    #[test]
    fn end_of_stream_flushes_partial_line() {
        let out = decode(options(100), &[b"done"], false);
        assert_eq!(out, vec![line("done")]);
    }

    #[test]
    fn silent_stream_yields_single_empty_line() {
        let out = decode(options(100), &[], false);
        assert_eq!(out, vec![line("")]);
    }

    #[test]
    fn escape_sequence_split_across_chunks() {
        let out = decode(options(100), &[b"\x1b[3", b"2mgo\n"], true);
        assert_eq!(out, vec![line("§ago")]);
    }

    #[test]
    fn invalid_bytes_are_substituted() {
        let out = decode(options(100), &[b"bad \xff byte\n"], false);
        assert_eq!(out, vec![line("bad \u{fffd} byte")]);
    }
}
