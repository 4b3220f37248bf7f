//! Command-line reconstruction.
//!
//! Callers split raw operator input into words themselves. [`build_command_line`] turns
//! those words back into a single string for the target shell: operators stay bare so
//! they keep their shell meaning, everything else is quoted only when it has to be.

/// The two shell quoting dialects the engine targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShellFamily {
    /// `sh -c` style: single quotes, `'\''` for an embedded quote, `&&` between statements.
    Posix,
    /// `cmd.exe /c` style: double quotes, `""` for an embedded quote, `&` between statements.
    Windows,
}

/// Tokens emitted verbatim when a word is exactly one of them.
pub const SHELL_OPERATORS: &[&str] = &[
    ">", ">>", "<", "<<", "|", "||", "&&", ";", "&", "1>", "2>", "2>&1", ">&", "!",
];

const NEEDS_QUOTING: &[char] = &['>', '<', '|', '&', ';', '(', ')', '"', '\''];

impl ShellFamily {
    /// The family of the host operating system.
    pub fn current() -> Self {
        if cfg!(windows) {
            ShellFamily::Windows
        } else {
            ShellFamily::Posix
        }
    }

    /// Separator placed between prelude statements and the user command.
    pub fn command_joiner(self) -> &'static str {
        match self {
            ShellFamily::Posix => " && ",
            ShellFamily::Windows => " & ",
        }
    }

    /// Quotes a single word for this family, leaving words that need no quoting untouched.
    pub fn quote(self, token: &str) -> String {
        if token.is_empty() {
            return "\"\"".to_string();
        }
        if !self.needs_quoting(token) {
            return token.to_string();
        }
        match self {
            ShellFamily::Posix => format!("'{}'", token.replace('\'', r"'\''")),
            ShellFamily::Windows => format!("\"{}\"", token.replace('"', "\"\"")),
        }
    }

    fn needs_quoting(self, token: &str) -> bool {
        token.chars().any(|c| {
            c.is_whitespace()
                || NEEDS_QUOTING.contains(&c)
                || (self == ShellFamily::Posix && c == '\\')
        })
    }
}

/// True when `token` is exactly one of the recognised shell operators.
pub fn is_operator(token: &str) -> bool {
    SHELL_OPERATORS.contains(&token)
}

/// Joins already-split words into one command line for `family`.
pub fn build_command_line<S: AsRef<str>>(tokens: &[S], family: ShellFamily) -> String {
    tokens
        .iter()
        .map(|token| {
            let token = token.as_ref();
            if is_operator(token) {
                token.to_string()
            } else {
                family.quote(token)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
