//! ANSI escape handling and the `§` style-code markup used by the console.

use regex::Regex;
use std::sync::LazyLock;

/// Style marker introducing a one-character style code (`§c` is red, `§r` resets).
pub const STYLE_MARKER: char = '§';

static STYLE_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("(?i)§[0-9a-fk-or]").expect("style code regex must compile"));

/// Maps an SGR parameter to the console style code it corresponds to.
///
/// Only reset, bold and the foreground colors have a counterpart; everything else
/// (backgrounds, underline, 256-color selectors) is dropped.
pub fn style_code(sgr: u32) -> Option<&'static str> {
    let code = match sgr {
        0 => "§r",
        1 => "§l",
        30 => "§0",
        31 | 91 => "§c",
        32 | 92 => "§a",
        33 | 93 => "§e",
        34 | 94 => "§9",
        35 => "§5",
        36 | 96 => "§b",
        37 => "§7",
        90 => "§8",
        95 => "§d",
        97 => "§f",
        _ => return None,
    };
    Some(code)
}

/// Removes every style code from `text`.
pub fn strip_style_codes(text: &str) -> String {
    STYLE_CODE.replace_all(text, "").into_owned()
}

fn ansi_for(code: char) -> Option<&'static str> {
    let sequence = match code.to_ascii_lowercase() {
        '0' => "\x1b[30m",
        '1' => "\x1b[34m",
        '2' => "\x1b[32m",
        '3' => "\x1b[36m",
        '4' => "\x1b[31m",
        '5' => "\x1b[35m",
        '6' => "\x1b[33m",
        '7' => "\x1b[37m",
        '8' => "\x1b[90m",
        '9' => "\x1b[94m",
        'a' => "\x1b[92m",
        'b' => "\x1b[96m",
        'c' => "\x1b[91m",
        'd' => "\x1b[95m",
        'e' => "\x1b[93m",
        'f' => "\x1b[97m",
        'k' => "\x1b[5m",
        'l' => "\x1b[1m",
        'm' => "\x1b[9m",
        'n' => "\x1b[4m",
        'o' => "\x1b[3m",
        'r' => "\x1b[0m",
        _ => return None,
    };
    Some(sequence)
}

/// Translates style codes back into ANSI sequences for a real terminal, resetting at the end.
pub fn style_to_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut styled = false;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == STYLE_MARKER
            && let Some(sequence) = chars.peek().copied().and_then(ansi_for)
        {
            chars.next();
            out.push_str(sequence);
            styled = true;
            continue;
        }
        out.push(c);
    }
    if styled {
        out.push_str("\x1b[0m");
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum AnsiState {
    #[default]
    Normal,
    Escape,
    Csi,
    /// `ESC (` designates a character set; the next byte is its name.
    GSet,
}

/// What the parser made of one input byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Not part of an escape sequence; the byte is ordinary output.
    Pass(u8),
    /// Swallowed by an escape sequence.
    Consumed,
    /// A color sequence ended; these style codes replace it.
    Style(String),
}

/// Byte-at-a-time escape sequence recognizer.
#[derive(Debug, Default)]
pub struct AnsiParser {
    state: AnsiState,
    params: String,
}

impl AnsiParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&mut self, byte: u8, styling: bool) -> Step {
        match self.state {
            AnsiState::Normal => {
                if byte == 0x1b {
                    self.state = AnsiState::Escape;
                    Step::Consumed
                } else {
                    Step::Pass(byte)
                }
            }
            AnsiState::Escape => {
                self.state = match byte {
                    b'[' => AnsiState::Csi,
                    b'(' => AnsiState::GSet,
                    _ => AnsiState::Normal,
                };
                Step::Consumed
            }
            AnsiState::GSet => {
                self.state = AnsiState::Normal;
                Step::Consumed
            }
            AnsiState::Csi => match byte {
                0x30..=0x3f => {
                    self.params.push(byte as char);
                    Step::Consumed
                }
                0x40..=0x7e => {
                    let params = std::mem::take(&mut self.params);
                    self.state = AnsiState::Normal;
                    if byte == b'm' && styling {
                        let codes = sgr_to_style(&params);
                        if !codes.is_empty() {
                            return Step::Style(codes);
                        }
                    }
                    Step::Consumed
                }
                _ => {
                    // Malformed sequence: abandon it along with the offending byte.
                    self.params.clear();
                    self.state = AnsiState::Normal;
                    Step::Consumed
                }
            },
        }
    }
}

fn sgr_to_style(params: &str) -> String {
    // `ESC[m` is shorthand for `ESC[0m`.
    if params.is_empty() {
        return "§r".to_string();
    }
    params
        .split(';')
        .filter_map(|param| param.parse::<u32>().ok())
        .filter_map(style_code)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(parser: &mut AnsiParser, bytes: &[u8], styling: bool) -> Vec<Step> {
        bytes.iter().map(|&b| parser.advance(b, styling)).collect()
    }

    #[test]
    fn red_sequence_becomes_style_code() {
        let mut parser = AnsiParser::new();
        let steps = run(&mut parser, b"\x1b[31m", true);
        assert_eq!(steps.last(), Some(&Step::Style("§c".to_string())));
        assert_eq!(parser.advance(b'x', true), Step::Pass(b'x'));
    }

    #[test]
    fn compound_sgr_maps_each_known_code() {
        let mut parser = AnsiParser::new();
        let steps = run(&mut parser, b"\x1b[1;4;92;48;5;200m", true);
        assert_eq!(steps.last(), Some(&Step::Style("§l§a".to_string())));
    }

    #[test]
    fn styling_disabled_swallows_color() {
        let mut parser = AnsiParser::new();
        let steps = run(&mut parser, b"\x1b[31mX", false);
        assert!(steps[..5].iter().all(|s| *s == Step::Consumed));
        assert_eq!(steps[5], Step::Pass(b'X'));
    }

    #[test]
    fn non_color_csi_is_dropped() {
        let mut parser = AnsiParser::new();
        let steps = run(&mut parser, b"\x1b[2K\x1b[10;5HA", true);
        assert_eq!(steps.last(), Some(&Step::Pass(b'A')));
        assert_eq!(steps.iter().filter(|s| matches!(s, Step::Pass(_))).count(), 1);
    }

    #[test]
    fn charset_designation_consumes_one_byte() {
        let mut parser = AnsiParser::new();
        let steps = run(&mut parser, b"\x1b(BZ", true);
        assert_eq!(
            steps,
            vec![Step::Consumed, Step::Consumed, Step::Consumed, Step::Pass(b'Z')]
        );
    }

    #[test]
    fn unknown_escape_returns_to_normal() {
        let mut parser = AnsiParser::new();
        let steps = run(&mut parser, b"\x1b7Q", true);
        assert_eq!(steps[2], Step::Pass(b'Q'));
    }

    #[test]
    fn malformed_csi_is_abandoned() {
        let mut parser = AnsiParser::new();
        let steps = run(&mut parser, b"\x1b[3\x01ok", true);
        assert_eq!(steps[3], Step::Consumed);
        assert_eq!(steps[4], Step::Pass(b'o'));
    }

    #[test]
    fn empty_sgr_is_reset() {
        let mut parser = AnsiParser::new();
        let steps = run(&mut parser, b"\x1b[m", true);
        assert_eq!(steps.last(), Some(&Step::Style("§r".to_string())));
    }

    #[test]
    fn strip_removes_only_style_codes() {
        assert_eq!(strip_style_codes("§cred§R §zkeep"), "red §zkeep");
    }

    #[test]
    fn style_to_ansi_resets_at_end() {
        assert_eq!(style_to_ansi("plain"), "plain");
        assert_eq!(style_to_ansi("§lB"), "\x1b[1mB\x1b[0m");
    }
}
