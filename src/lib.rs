use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

pub mod runner;

pub use runner::{ExecutionOutcome, Shell};

// Errors surfaced to the user as a one-line notice
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScriptError {
    #[error("Please enter a script name.")]
    EmptyName,
    #[error("Please enter a working directory.")]
    EmptyDir,
    #[error("Please enter at least one command.")]
    EmptyCommands,
    #[error("no script matches '{0}'")]
    NotFound(String),
    #[error("several scripts are named '{0}' (ids: {ids}); use an id instead", ids = .1.join(", "))]
    AmbiguousName(String, Vec<String>),
}

// A saved command sequence bound to a working directory
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub id: String,
    pub name: String,
    pub dir: String,
    pub commands: Vec<String>,
    #[serde(rename = "lastAccessed", default)]
    pub last_accessed: i64,
}

impl Script {
    // Commands as they are entered: one per line
    #[must_use]
    pub fn commands_text(&self) -> String {
        self.commands.join("\n")
    }

    /// The full command line, directory change included, for copying into a terminal.
    #[must_use]
    pub fn command_line(&self) -> String {
        runner::compose_command_line(&self.dir, &self.commands)
    }
}

/// The user-editable part of a script, validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptDraft {
    pub name: String,
    pub dir: String,
    pub commands: Vec<String>,
}

impl ScriptDraft {
    /// Validate raw input fields. `commands_text` holds one command per line.
    ///
    /// # Errors
    ///
    /// Returns the first empty field, checked in the order name, dir, commands.
    pub fn parse(name: &str, dir: &str, commands_text: &str) -> Result<Self, ScriptError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ScriptError::EmptyName);
        }

        let dir = dir.trim();
        if dir.is_empty() {
            return Err(ScriptError::EmptyDir);
        }

        let commands = split_commands(commands_text);
        if commands.is_empty() {
            return Err(ScriptError::EmptyCommands);
        }

        Ok(Self {
            name: name.to_string(),
            dir: dir.to_string(),
            commands,
        })
    }
}

// Split newline-delimited input into commands, dropping blank lines
#[must_use]
pub fn split_commands(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

// Current time as epoch milliseconds
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// The persisted collection. Always read and written as a whole.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct ScriptStore {
    pub scripts: Vec<Script>,
}

impl ScriptStore {
    #[must_use]
    pub fn new(scripts: Vec<Script>) -> Self {
        Self { scripts }
    }

    /// Load the store from a JSON file. A missing file is an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or is not a JSON array of scripts.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        if !path_ref.exists() {
            return Ok(Self::default());
        }

        let path_str = path_ref.to_string_lossy();
        let content = fs::read_to_string(path_ref)
            .with_context(|| format!("failed to read scripts from {path_str}"))?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_json::from_str(&content)
            .with_context(|| format!("failed to parse JSON from {path_str}"))
    }

    /// Save the whole collection, replacing the file in a single rename.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path_ref = path.as_ref();
        let path_str = path_ref.to_string_lossy();

        let content =
            serde_json::to_string_pretty(&self).context("failed to serialize scripts to JSON")?;

        let parent = match path_ref.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;

        let mut temp = tempfile::NamedTempFile::new_in(parent)
            .with_context(|| format!("failed to create temporary file next to {path_str}"))?;
        temp.write_all(content.as_bytes())
            .with_context(|| format!("failed to write scripts for {path_str}"))?;

        // Only the owner should read stored command lines
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(temp.path(), fs::Permissions::from_mode(0o600))
                .with_context(|| format!("failed to set permissions for {path_str}"))?;
        }

        temp.persist(path_ref)
            .with_context(|| format!("failed to write scripts to {path_str}"))?;

        Ok(())
    }

    // Id for the next script: highest numeric id + 1
    #[must_use]
    pub fn next_id(&self) -> String {
        let max = self
            .scripts
            .iter()
            .filter_map(|script| script.id.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        (max + 1).to_string()
    }

    pub fn add(&mut self, draft: ScriptDraft, now: i64) -> &Script {
        let script = Script {
            id: self.next_id(),
            name: draft.name,
            dir: draft.dir,
            commands: draft.commands,
            last_accessed: now,
        };
        self.scripts.push(script);
        &self.scripts[self.scripts.len() - 1]
    }

    /// Replace the editable fields of a script, keeping its id and last access time.
    ///
    /// # Errors
    ///
    /// Returns `ScriptError::NotFound` for an unknown id.
    pub fn update(&mut self, id: &str, draft: ScriptDraft) -> Result<&Script, ScriptError> {
        let script = self
            .scripts
            .iter_mut()
            .find(|script| script.id == id)
            .ok_or_else(|| ScriptError::NotFound(id.to_string()))?;

        script.name = draft.name;
        script.dir = draft.dir;
        script.commands = draft.commands;
        Ok(&*script)
    }

    /// Remove a script by id and hand it back.
    ///
    /// # Errors
    ///
    /// Returns `ScriptError::NotFound` for an unknown id.
    pub fn remove(&mut self, id: &str) -> Result<Script, ScriptError> {
        let index = self
            .scripts
            .iter()
            .position(|script| script.id == id)
            .ok_or_else(|| ScriptError::NotFound(id.to_string()))?;
        Ok(self.scripts.remove(index))
    }

    /// Record an access at `now`.
    ///
    /// # Errors
    ///
    /// Returns `ScriptError::NotFound` for an unknown id.
    pub fn touch(&mut self, id: &str, now: i64) -> Result<(), ScriptError> {
        let script = self
            .scripts
            .iter_mut()
            .find(|script| script.id == id)
            .ok_or_else(|| ScriptError::NotFound(id.to_string()))?;
        script.last_accessed = now;
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Script> {
        self.scripts.iter().find(|script| script.id == id)
    }

    /// Find a script by id, then by exact name, then by name ignoring case.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when nothing matches and `AmbiguousName` when a name is shared.
    pub fn resolve(&self, selector: &str) -> Result<&Script, ScriptError> {
        let selector = selector.trim();
        if let Some(script) = self.get(selector) {
            return Ok(script);
        }

        let exact: Vec<&Script> = self
            .scripts
            .iter()
            .filter(|script| script.name == selector)
            .collect();
        let matches = if exact.is_empty() {
            self.scripts
                .iter()
                .filter(|script| script.name.eq_ignore_ascii_case(selector))
                .collect()
        } else {
            exact
        };

        match matches.as_slice() {
            [] => Err(ScriptError::NotFound(selector.to_string())),
            [script] => Ok(script),
            many => Err(ScriptError::AmbiguousName(
                selector.to_string(),
                many.iter().map(|script| script.id.clone()).collect(),
            )),
        }
    }

    // Most recently used first; equal timestamps keep storage order
    #[must_use]
    pub fn by_recency(&self) -> Vec<&Script> {
        let mut sorted: Vec<&Script> = self.scripts.iter().collect();
        sorted.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));
        sorted
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }
}
