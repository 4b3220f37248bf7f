//! Operator-facing message templates.
//!
//! The engine never formats user-visible text itself. Every notification goes through a
//! [`Translate`] implementation keyed by a short message name, with `{placeholder}`
//! substitution. [`MessageCatalog`] ships English defaults and accepts overrides from a
//! TOML table, where `&` may be used in place of the `§` style marker.

use anyhow::{Context, Result};
use std::{collections::HashMap, path::Path};

/// Which prefix a notification line starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl Severity {
    pub fn prefix_key(self) -> &'static str {
        match self {
            Severity::Info => "prefix",
            Severity::Warn => "warn-prefix",
            Severity::Error => "error-prefix",
        }
    }
}

/// Looks up a message template and fills in its placeholders.
pub trait Translate: Send + Sync {
    fn translate(&self, key: &str, placeholders: &[(&str, String)]) -> String;

    /// A full notification line: the severity prefix followed by the message.
    fn notification(&self, severity: Severity, key: &str, placeholders: &[(&str, String)]) -> String {
        format!(
            "{}{}",
            self.translate(severity.prefix_key(), &[]),
            self.translate(key, placeholders)
        )
    }
}

const DEFAULT_MESSAGES: &[(&str, &str)] = &[
    ("prefix", "§8[§bShell§8]§r "),
    ("warn-prefix", "§8[§eShell§8]§e "),
    ("error-prefix", "§8[§cShell§8]§c "),
    ("process-starting", "Starting process §f{id}"),
    ("process-exited", "Process {id} exited with code {code}"),
    ("process-timeout", "Process {id} timed out and was terminated"),
    ("process-error", "Process {id} failed: {error}"),
    ("process-stopped", "Process {id} stopped"),
    ("process-not-found", "No running process with that id"),
    ("not-ready", "Process {id} is still starting, try again shortly"),
    ("not-interactable", "Process {id} is not accepting input"),
    ("input-sent", "Sent input to process {id}"),
    ("invalid-workdir", "Working directory does not exist: {dir}"),
    ("invalid-id", "Invalid process id"),
    ("invalid-timeout", "Invalid timeout value"),
    ("no-command-specified", "No command specified"),
    ("list-header", "Running processes:"),
    ("list-empty", "No running processes"),
    ("list-starting", "§e(starting) "),
    ("process-stats", "§8[§7mem {mem} §8| §7cpu {cpu}§8]"),
    ("line-truncated", "§7(line truncated...)"),
    ("env-fallback", "Environment '{name}' not found, using default"),
    ("control-byte", "unexpected control byte 0x{byte} in output"),
    ("usage", "Usage: {usage}"),
    ("help-header", "Shell commands:"),
    ("help-run", "run [-d dir] [-e env] [-t seconds] <command> - start a command"),
    ("help-input", "input <id> <text> - send a line to a running process"),
    ("help-list", "list - show running processes"),
    ("help-stop", "stop <id> - kill a process and its children"),
];

/// Key to template map with English defaults for every message the engine emits.
#[derive(Debug, Clone)]
pub struct MessageCatalog {
    templates: HashMap<String, String>,
}

impl Default for MessageCatalog {
    fn default() -> Self {
        Self {
            templates: DEFAULT_MESSAGES
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl MessageCatalog {
    /// Loads overrides from a TOML table of `key = "template"` pairs on top of the defaults.
    /// A missing file leaves the defaults untouched.
    pub fn load(path: &Path) -> Result<Self> {
        let mut catalog = Self::default();
        if !path.exists() {
            return Ok(catalog);
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read messages {}", path.display()))?;
        let overrides: HashMap<String, String> = toml::from_str(&text)
            .with_context(|| format!("Failed to parse messages {}", path.display()))?;
        catalog.extend(overrides);
        Ok(catalog)
    }

    pub fn extend(&mut self, overrides: impl IntoIterator<Item = (String, String)>) {
        for (key, template) in overrides {
            self.templates.insert(key, template.replace('&', "§"));
        }
    }
}

impl Translate for MessageCatalog {
    fn translate(&self, key: &str, placeholders: &[(&str, String)]) -> String {
        let Some(template) = self.templates.get(key) else {
            return format!("Missing key: {key}");
        };
        placeholders
            .iter()
            .fold(template.clone(), |text, (name, value)| {
                text.replace(&format!("{{{name}}}"), value)
            })
    }
}
