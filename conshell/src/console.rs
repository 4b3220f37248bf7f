//! # Operator Console
//!
//! A thin front-end over [`Engine`] that understands the operator verbs:
//!
//! ```text
//! run [-d dir] [-e env] [-t seconds] <command...>
//! stop <id>
//! input <id> <text>
//! list
//! help
//! ```
//!
//! `run` arguments are word-split with quote awareness: single and double quotes group
//! words and are removed, and runs of shell operator characters (`>`, `>>`, `2>&1`, `|`,
//! `&&`, `;`, ...) are split out of the surrounding words so they survive as operators.
//! Splitting and [`crate::quoting::build_command_line`] are inverses of each other.
//!
//! Every outcome, including parse errors, is reported to the engine's output sink.

use crate::{
    engine::{Engine, EngineRequest},
    error::{EngineError, ValidationError},
    messages::Severity,
    quoting::{SHELL_OPERATORS, ShellFamily},
};
use std::{iter::Peekable, path::PathBuf, str::CharIndices, time::Duration};
use tracing::debug;

const RUN_USAGE: &str = "run [-d dir] [-e env] [-t timeout] <command>";
const STOP_USAGE: &str = "stop <id>";
const INPUT_USAGE: &str = "input <id> <text>";

const OPERATOR_CHARS: &[char] = &['>', '<', '|', '&', ';'];

/// One parsed operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Run(EngineRequest),
    Stop(u32),
    Input { id: u32, text: String },
    List,
    Help,
}

impl ConsoleCommand {
    /// Parses one console line. `profile` is the currently selected environment profile,
    /// used when `run` has no `-e` flag.
    pub fn parse(
        line: &str,
        family: ShellFamily,
        profile: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let line = line.trim();
        let (verb, rest) = split_first_word(line);
        match verb.to_ascii_lowercase().as_str() {
            "run" => parse_run(rest, family, profile),
            "stop" => {
                let (id, _) = split_first_word(rest);
                if id.is_empty() {
                    return Err(ValidationError::Usage(STOP_USAGE));
                }
                Ok(ConsoleCommand::Stop(parse_id(id)?))
            }
            "input" => {
                let (id, text) = split_first_word(rest);
                if id.is_empty() || text.is_empty() {
                    return Err(ValidationError::Usage(INPUT_USAGE));
                }
                Ok(ConsoleCommand::Input {
                    id: parse_id(id)?,
                    text: text.to_string(),
                })
            }
            "list" => Ok(ConsoleCommand::List),
            _ => Ok(ConsoleCommand::Help),
        }
    }
}

fn split_first_word(text: &str) -> (&str, &str) {
    match text.split_once(char::is_whitespace) {
        Some((first, rest)) => (first, rest.trim_start()),
        None => (text, ""),
    }
}

fn parse_id(text: &str) -> Result<u32, ValidationError> {
    text.parse().map_err(|_| ValidationError::Number {
        what: "process id",
        value: text.to_string(),
    })
}

fn parse_run(
    rest: &str,
    family: ShellFamily,
    profile: Option<&str>,
) -> Result<ConsoleCommand, ValidationError> {
    let words = split_words(rest, family);
    if words.is_empty() {
        return Err(ValidationError::Usage(RUN_USAGE));
    }

    let mut request = EngineRequest {
        profile: profile.map(str::to_string),
        ..EngineRequest::default()
    };
    let mut i = 0;
    while i + 1 < words.len() {
        let value = &words[i + 1];
        match words[i].as_str() {
            "-d" => request.working_dir = Some(PathBuf::from(value)),
            "-e" => request.profile = Some(value.clone()),
            "-t" => {
                let seconds: u64 = value.parse().map_err(|_| ValidationError::Number {
                    what: "timeout",
                    value: value.clone(),
                })?;
                request.timeout = Some(Duration::from_secs(seconds));
            }
            _ => break,
        }
        i += 2;
    }
    request.tokens = words[i..].to_vec();
    if request.tokens.is_empty() {
        return Err(ValidationError::EmptyCommand);
    }
    Ok(ConsoleCommand::Run(request))
}

/// Splits raw console text into words for `family`, keeping shell operators as their own
/// words.
pub fn split_words(input: &str, family: ShellFamily) -> Vec<String> {
    let mut lexer = Lexer {
        input,
        chars: input.char_indices().peekable(),
        family,
        words: Vec::new(),
        current: String::new(),
        started: false,
        literal: false,
    };
    lexer.run();
    lexer.words
}

struct Lexer<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
    family: ShellFamily,
    words: Vec<String>,
    current: String,
    /// A word is in progress, possibly empty (`""`).
    started: bool,
    /// The word contains quoted or escaped text, so it cannot be an fd prefix.
    literal: bool,
}

impl Lexer<'_> {
    fn run(&mut self) {
        while let Some((at, c)) = self.chars.next() {
            match c {
                c if c.is_whitespace() => self.finish_word(),
                '\'' => {
                    self.mark_literal();
                    self.single_quoted();
                }
                '"' => {
                    self.mark_literal();
                    self.double_quoted();
                }
                '\\' if self.family == ShellFamily::Posix => {
                    self.mark_literal();
                    if let Some((_, escaped)) = self.chars.next() {
                        self.current.push(escaped);
                    }
                }
                c if OPERATOR_CHARS.contains(&c) => self.operator(at, c),
                c => {
                    self.started = true;
                    self.current.push(c);
                }
            }
        }
        self.finish_word();
    }

    fn mark_literal(&mut self) {
        self.started = true;
        self.literal = true;
    }

    fn finish_word(&mut self) {
        if self.started {
            self.words.push(std::mem::take(&mut self.current));
        }
        self.started = false;
        self.literal = false;
    }

    fn single_quoted(&mut self) {
        for (_, c) in self.chars.by_ref() {
            if c == '\'' {
                return;
            }
            self.current.push(c);
        }
    }

    fn double_quoted(&mut self) {
        while let Some((_, c)) = self.chars.next() {
            match c {
                '"' if self.family == ShellFamily::Windows
                    && matches!(self.chars.peek(), Some((_, '"'))) =>
                {
                    self.chars.next();
                    self.current.push('"');
                }
                '"' => return,
                '\\' if self.family == ShellFamily::Posix
                    && matches!(self.chars.peek(), Some((_, '"' | '\\'))) =>
                {
                    if let Some((_, escaped)) = self.chars.next() {
                        self.current.push(escaped);
                    }
                }
                c => self.current.push(c),
            }
        }
    }

    /// Handles an operator character at byte offset `at`, which has already been consumed.
    fn operator(&mut self, at: usize, c: char) {
        let input = self.input;
        let rest = &input[at..];

        // A bare number directly before a redirect is a file descriptor: `2>&1`, `1>`.
        let fd_prefix = self.started
            && !self.literal
            && !self.current.is_empty()
            && self.current.chars().all(|d| d.is_ascii_digit())
            && matches!(c, '>' | '<');
        if fd_prefix {
            let candidate = format!("{}{}", self.current, rest);
            if let Some(op) = longest_operator(&candidate)
                && op.len() > self.current.len()
            {
                self.skip(op.len() - self.current.len() - 1);
                self.current.clear();
                self.started = false;
                self.words.push(op.to_string());
                return;
            }
        }

        self.finish_word();
        let op = longest_operator(rest).unwrap_or(&rest[..c.len_utf8()]);
        self.skip(op.len() - c.len_utf8());
        self.words.push(op.to_string());
    }

    fn skip(&mut self, count: usize) {
        for _ in 0..count {
            self.chars.next();
        }
    }
}

fn longest_operator(text: &str) -> Option<&'static str> {
    SHELL_OPERATORS
        .iter()
        .copied()
        .filter(|op| text.starts_with(op))
        .max_by_key(|op| op.len())
}

/// Dispatches console lines to an [`Engine`] and reports the results.
#[derive(Clone)]
pub struct Console {
    engine: Engine,
    family: ShellFamily,
    profile: Option<String>,
}

impl Console {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            family: ShellFamily::current(),
            profile: None,
        }
    }

    /// Selects the environment profile used by `run` without `-e`.
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn with_family(mut self, family: ShellFamily) -> Self {
        self.family = family;
        self
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Parses and runs one console line.
    pub async fn handle_line(&self, line: &str) {
        match ConsoleCommand::parse(line, self.family, self.profile.as_deref()) {
            Ok(command) => self.dispatch(command).await,
            Err(e) => self.report_validation(&e),
        }
    }

    pub async fn dispatch(&self, command: ConsoleCommand) {
        debug!("Console command: {:?}", command);
        match command {
            ConsoleCommand::Run(request) => {
                if let Err(e) = self.engine.execute(request).await {
                    self.report_error(&e);
                }
            }
            ConsoleCommand::Stop(id) => {
                self.engine.stop(id).await;
            }
            ConsoleCommand::Input { id, text } => match self.engine.send_input(id, &text).await {
                Ok(()) => self
                    .engine
                    .report(Severity::Info, "input-sent", &[("id", id.to_string())]),
                Err(e) => self.report_error(&e),
            },
            ConsoleCommand::List => {
                for line in self.engine.list().await {
                    self.engine.emit(line);
                }
            }
            ConsoleCommand::Help => self.help(),
        }
    }

    fn help(&self) {
        self.engine.report(Severity::Info, "help-header", &[]);
        for key in ["help-run", "help-input", "help-list", "help-stop"] {
            let text = self.engine.messages().translate(key, &[]);
            self.engine.emit(format!("§f{text}"));
        }
    }

    fn report_error(&self, error: &EngineError) {
        let id = |id: &u32| [("id", id.to_string())];
        match error {
            EngineError::Validation(e) => self.report_validation(e),
            EngineError::NotFound(n) => {
                self.engine
                    .report(Severity::Error, "process-not-found", &id(n))
            }
            EngineError::NotReady(n) => self.engine.report(Severity::Warn, "not-ready", &id(n)),
            EngineError::NotInteractable(n) => {
                self.engine
                    .report(Severity::Error, "not-interactable", &id(n))
            }
            other => self.engine.report(
                Severity::Error,
                "process-error",
                &[("id", "-".to_string()), ("error", other.to_string())],
            ),
        }
    }

    fn report_validation(&self, error: &ValidationError) {
        let engine = &self.engine;
        match error {
            ValidationError::WorkingDirectory(dir) => engine.report(
                Severity::Error,
                "invalid-workdir",
                &[("dir", dir.display().to_string())],
            ),
            ValidationError::Number { what: "timeout", .. } => {
                engine.report(Severity::Error, "invalid-timeout", &[])
            }
            ValidationError::Number { .. } => engine.report(Severity::Error, "invalid-id", &[]),
            ValidationError::EmptyCommand => {
                engine.report(Severity::Error, "no-command-specified", &[])
            }
            ValidationError::Usage(usage) => {
                engine.report(Severity::Error, "usage", &[("usage", usage.to_string())])
            }
        }
    }
}
