//! # Environment Profiles
//!
//! A profile is a named, ordered list of setup lines. Each line is either a variable
//! assignment (`KEY=VALUE`) that is merged into the child's environment, or a prelude
//! statement that runs in the same shell invocation before the user's command.
//!
//! The `default` profile always exists, is always empty and is never persisted.

use crate::quoting::ShellFamily;
use anyhow::{Context, Result};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Mutex,
};
use tokio::process::Command;
use tracing::warn;

pub const DEFAULT_PROFILE: &str = "default";

/// Profile name to its ordered setup lines.
pub type Profiles = BTreeMap<String, Vec<String>>;

/// The result of splitting a profile into variables and prelude statements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentAssembly {
    pub variables: BTreeMap<String, String>,
    pub prelude: Vec<String>,
}

impl EnvironmentAssembly {
    /// Prefixes `command` with the prelude statements joined by the family's separator.
    pub fn wrap_command(&self, command: &str, family: ShellFamily) -> String {
        if self.prelude.is_empty() {
            return command.to_string();
        }
        let mut parts: Vec<&str> = self.prelude.iter().map(String::as_str).collect();
        parts.push(command);
        parts.join(family.command_joiner())
    }

    /// Adds the assigned variables on top of the inherited environment.
    pub fn apply(&self, command: &mut Command) {
        command.envs(&self.variables);
    }
}

/// Splits profile lines into variable assignments and prelude statements.
pub fn assemble_environment<S: AsRef<str>>(lines: &[S]) -> EnvironmentAssembly {
    let mut assembly = EnvironmentAssembly::default();
    for line in lines {
        let line = line.as_ref().trim();
        if line.is_empty() {
            continue;
        }
        match split_assignment(line) {
            Some((key, value)) => {
                assembly
                    .variables
                    .insert(key.to_string(), value.to_string());
            }
            None => assembly.prelude.push(line.to_string()),
        }
    }
    assembly
}

fn split_assignment(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty()
        || key.chars().any(char::is_whitespace)
        || key.eq_ignore_ascii_case("export")
        || key.eq_ignore_ascii_case("set")
    {
        return None;
    }
    Some((key, value.trim()))
}

pub fn is_default_profile(name: &str) -> bool {
    name.eq_ignore_ascii_case(DEFAULT_PROFILE)
}

/// Persistence for named profiles.
pub trait ProfileStore: Send + Sync {
    /// Loads every stored profile plus the empty `default` profile. Never fails: storage
    /// that cannot be read yields only `default`.
    fn load(&self) -> Profiles;

    /// Persists every profile except `default`.
    fn save(&self, profiles: &Profiles) -> Result<()>;
}

fn with_default(mut profiles: Profiles) -> Profiles {
    profiles.retain(|name, _| !is_default_profile(name));
    profiles.insert(DEFAULT_PROFILE.to_string(), Vec::new());
    profiles
}

fn without_default(profiles: &Profiles) -> Profiles {
    profiles
        .iter()
        .filter(|(name, _)| !is_default_profile(name))
        .map(|(name, lines)| (name.clone(), lines.clone()))
        .collect()
}

/// Profiles stored as a JSON object of name to array of lines.
#[derive(Debug, Clone)]
pub struct JsonProfileStore {
    path: PathBuf,
}

impl JsonProfileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Profiles> {
        let text = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read profiles {}", self.path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse profiles {}", self.path.display()))
    }
}

impl ProfileStore for JsonProfileStore {
    fn load(&self) -> Profiles {
        if !self.path.exists() {
            return with_default(Profiles::new());
        }
        match self.read() {
            Ok(profiles) => with_default(profiles),
            Err(e) => {
                warn!("{:#}; only the default profile is available", e);
                with_default(Profiles::new())
            }
        }
    }

    fn save(&self, profiles: &Profiles) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let text = serde_json::to_string_pretty(&without_default(profiles))?;
        std::fs::write(&self.path, text)
            .with_context(|| format!("Failed to write profiles {}", self.path.display()))
    }
}

/// In-memory store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    profiles: Mutex<Profiles>,
}

impl MemoryProfileStore {
    pub fn new(profiles: Profiles) -> Self {
        Self {
            profiles: Mutex::new(without_default(&profiles)),
        }
    }
}

impl ProfileStore for MemoryProfileStore {
    fn load(&self) -> Profiles {
        let profiles = self
            .profiles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        with_default(profiles.clone())
    }

    fn save(&self, profiles: &Profiles) -> Result<()> {
        let mut stored = self
            .profiles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *stored = without_default(profiles);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn assignments_and_statements_are_separated() {
        let assembly = assemble_environment(&[
            "JAVA_HOME=/opt/jdk",
            "  PATH = /usr/bin  ",
            "export FOO=bar",
            "set X=1",
            "cd /srv",
            "",
            "   ",
            "=oops",
            "MY VAR=1",
        ]);

        assert_eq!(assembly.variables.len(), 2);
        assert_eq!(assembly.variables["JAVA_HOME"], "/opt/jdk");
        assert_eq!(assembly.variables["PATH"], "/usr/bin");
        assert_eq!(
            assembly.prelude,
            vec!["export FOO=bar", "set X=1", "cd /srv", "=oops", "MY VAR=1"]
        );
    }

    #[test]
    fn keyword_check_is_case_insensitive() {
        let assembly = assemble_environment(&["EXPORT=1", "Set=2", "export=3"]);
        assert!(assembly.variables.is_empty());
        assert_eq!(assembly.prelude.len(), 3);
    }

    #[test]
    fn last_assignment_wins() {
        let assembly = assemble_environment(&["A=1", "A=2"]);
        assert_eq!(assembly.variables["A"], "2");
    }

    #[test]
    fn value_may_contain_equals() {
        let assembly = assemble_environment(&["OPTS=-Da=b -Dc=d"]);
        assert_eq!(assembly.variables["OPTS"], "-Da=b -Dc=d");
    }

    #[test]
    fn prelude_joiner_is_platform_specific() {
        let assembly = assemble_environment(&["cd /srv", "umask 022"]);
        assert_eq!(
            assembly.wrap_command("ls", ShellFamily::Posix),
            "cd /srv && umask 022 && ls"
        );
        assert_eq!(
            assembly.wrap_command("dir", ShellFamily::Windows),
            "cd /srv & umask 022 & dir"
        );
        assert_eq!(
            EnvironmentAssembly::default().wrap_command("ls", ShellFamily::Posix),
            "ls"
        );
    }

    #[test]
    fn json_store_round_trips_without_default() {
        let dir = TempDir::new().unwrap();
        let store = JsonProfileStore::new(dir.path().join("nested/profiles.json"));

        let mut profiles = Profiles::new();
        profiles.insert("build".to_string(), vec!["CC=clang".to_string()]);
        profiles.insert("Default".to_string(), vec!["IGNORED=1".to_string()]);
        store.save(&profiles).unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(!raw.to_lowercase().contains("default"));

        let loaded = store.load();
        assert_eq!(loaded["build"], vec!["CC=clang"]);
        assert!(loaded[DEFAULT_PROFILE].is_empty());
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn unreadable_store_yields_only_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("profiles.json");
        std::fs::write(&path, "{ not json").unwrap();

        let loaded = JsonProfileStore::new(&path).load();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key(DEFAULT_PROFILE));

        let missing = JsonProfileStore::new(dir.path().join("absent.json")).load();
        assert_eq!(missing.len(), 1);
    }

    #[test]
    fn memory_store_never_exposes_a_stored_default() {
        let mut profiles = Profiles::new();
        profiles.insert("DEFAULT".to_string(), vec!["A=1".to_string()]);
        profiles.insert("dev".to_string(), vec!["B=2".to_string()]);
        let store = MemoryProfileStore::new(profiles);

        let loaded = store.load();
        assert!(loaded[DEFAULT_PROFILE].is_empty());
        assert!(!loaded.contains_key("DEFAULT"));
        assert_eq!(loaded["dev"], vec!["B=2"]);
    }
}
