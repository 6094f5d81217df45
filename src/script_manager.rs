use crate::config::Config;
use anyhow::{Context, Result};
use script_saver::{now_millis, runner, ExecutionOutcome, Script, ScriptDraft, ScriptStore, Shell};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use tracing::{info, warn};

// Form input for an edit; `None` keeps the current value
#[derive(Debug, Default, Clone)]
pub struct ScriptEdit {
    pub name: Option<String>,
    pub dir: Option<String>,
    pub commands: Option<String>,
}

// ScriptManager runs each user flow as a fresh load-modify-save of the store
pub struct ScriptManager {
    store_path: PathBuf,
    shell: Shell,
}

impl ScriptManager {
    pub fn new(config: &Config) -> Self {
        Self {
            store_path: config.store_path.clone(),
            shell: config.shell.clone(),
        }
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    fn load(&self) -> Result<ScriptStore> {
        ScriptStore::from_file(&self.store_path).context("failed to load scripts")
    }

    fn persist(&self, store: &ScriptStore, action_msg: &str) -> Result<()> {
        store
            .save(&self.store_path)
            .with_context(|| format!("failed to save scripts after {action_msg}"))
    }

    // Save flow: append a validated script with the next id
    pub fn save_script(&self, draft: ScriptDraft) -> Result<Script> {
        let mut store = self.load()?;
        let script = store.add(draft, now_millis()).clone();
        self.persist(&store, "saving script")?;

        info!(script_id = %script.id, name = %script.name, path = %self.store_path.display(), "saved script");
        Ok(script)
    }

    // Edit flow: id and last access time are kept
    pub fn edit_script(&self, selector: &str, edit: ScriptEdit) -> Result<Script> {
        let mut store = self.load()?;
        let current = store.resolve(selector)?.clone();

        let name = edit.name.unwrap_or_else(|| current.name.clone());
        let dir = edit.dir.unwrap_or_else(|| current.dir.clone());
        let commands = edit.commands.unwrap_or_else(|| current.commands_text());
        let draft = ScriptDraft::parse(&name, &dir, &commands)?;

        let script = store.update(&current.id, draft)?.clone();
        self.persist(&store, "editing script")?;

        info!(script_id = %script.id, "updated script");
        Ok(script)
    }

    /// Delete flow. `confirm` sees the script first; declining leaves the store
    /// untouched and returns `None`.
    pub fn delete_script<F>(&self, selector: &str, confirm: F) -> Result<Option<Script>>
    where
        F: FnOnce(&Script) -> Result<bool>,
    {
        let mut store = self.load()?;
        let target = store.resolve(selector)?.clone();

        if !confirm(&target)? {
            info!(script_id = %target.id, "deletion cancelled");
            return Ok(None);
        }

        let removed = store.remove(&target.id)?;
        self.persist(&store, "deleting script")?;

        info!(script_id = %removed.id, "deleted script");
        Ok(Some(removed))
    }

    // All scripts, most recently used first
    pub fn list_scripts(&self) -> Result<Vec<Script>> {
        let store = self.load()?;
        Ok(store.by_recency().into_iter().cloned().collect())
    }

    pub fn find_script(&self, selector: &str) -> Result<Script> {
        let store = self.load()?;
        Ok(store.resolve(selector)?.clone())
    }

    /// Execute flow. The store is re-read after the run so edits made meanwhile
    /// are not overwritten; only a successful run moves the script to the top.
    pub fn execute_script(
        &self,
        selector: &str,
        cancel: &AtomicBool,
    ) -> Result<(Script, ExecutionOutcome)> {
        let mut script = self.find_script(selector)?;
        info!(script_id = %script.id, dir = %script.dir, "executing script");

        let outcome = runner::execute(&script, &self.shell, cancel);
        if !outcome.is_success() {
            return Ok((script, outcome));
        }

        let now = now_millis();
        let mut store = self.load()?;
        match store.touch(&script.id, now) {
            Ok(()) => {
                self.persist(&store, "recording script access")?;
                script.last_accessed = now;
            }
            Err(e) => warn!(script_id = %script.id, "not recording access: {e}"),
        }

        Ok((script, outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use script_saver::ScriptError;
    use tempfile::TempDir;

    fn manager_in(dir: &TempDir) -> ScriptManager {
        ScriptManager::new(&Config {
            store_path: dir.path().join("scripts.json"),
            shell: Shell::platform(),
        })
    }

    fn draft(name: &str, dir: &str, commands: &str) -> ScriptDraft {
        ScriptDraft::parse(name, dir, commands).unwrap()
    }

    #[test]
    fn test_save_assigns_sequential_ids() -> Result<()> {
        let temp = TempDir::new()?;
        let manager = manager_in(&temp);

        let first = manager.save_script(draft("Build", "C:\\proj", "npm install\nnpm run build"))?;
        let second = manager.save_script(draft("Test", "C:\\proj", "npm test"))?;

        assert_eq!(first.id, "1");
        assert_eq!(second.id, "2");
        assert_eq!(first.commands, vec!["npm install", "npm run build"]);
        assert!(first.last_accessed > 0);

        let stored = ScriptStore::from_file(manager.store_path())?;
        assert_eq!(stored.len(), 2);
        Ok(())
    }

    #[test]
    fn test_edit_keeps_id_and_timestamp() -> Result<()> {
        let temp = TempDir::new()?;
        let manager = manager_in(&temp);
        let saved = manager.save_script(draft("Build", "/proj", "make"))?;

        let edited = manager.edit_script(
            "Build",
            ScriptEdit {
                commands: Some("make clean\nmake".to_string()),
                ..ScriptEdit::default()
            },
        )?;

        assert_eq!(edited.id, saved.id);
        assert_eq!(edited.last_accessed, saved.last_accessed);
        assert_eq!(edited.name, "Build");
        assert_eq!(edited.dir, "/proj");
        assert_eq!(edited.commands, vec!["make clean", "make"]);
        Ok(())
    }

    #[test]
    fn test_edit_rejects_blank_field() -> Result<()> {
        let temp = TempDir::new()?;
        let manager = manager_in(&temp);
        manager.save_script(draft("Build", "/proj", "make"))?;

        let result = manager.edit_script(
            "1",
            ScriptEdit {
                dir: Some("   ".to_string()),
                ..ScriptEdit::default()
            },
        );
        let err = result.expect_err("blank dir must be rejected");
        assert_eq!(err.downcast_ref::<ScriptError>(), Some(&ScriptError::EmptyDir));

        assert_eq!(manager.find_script("1")?.dir, "/proj");
        Ok(())
    }

    #[test]
    fn test_delete_requires_confirmation() -> Result<()> {
        let temp = TempDir::new()?;
        let manager = manager_in(&temp);
        manager.save_script(draft("Build", "/proj", "make"))?;
        manager.save_script(draft("Deploy", "/proj", "make deploy"))?;

        let cancelled = manager.delete_script("1", |_| Ok(false))?;
        assert!(cancelled.is_none());
        assert_eq!(manager.list_scripts()?.len(), 2);

        let removed = manager.delete_script("1", |script| Ok(script.name == "Build"))?;
        assert_eq!(removed.map(|script| script.id), Some("1".to_string()));

        let remaining = manager.list_scripts()?;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "2");
        Ok(())
    }

    #[test]
    fn test_execute_moves_script_to_top() -> Result<()> {
        let temp = TempDir::new()?;
        let manager = manager_in(&temp);
        let work_dir = temp.path().to_string_lossy().to_string();

        manager.save_script(draft("Greet", &work_dir, "echo hi"))?;
        std::thread::sleep(std::time::Duration::from_millis(5));
        manager.save_script(draft("Other", &work_dir, "echo other"))?;
        assert_eq!(manager.list_scripts()?[0].name, "Other");

        std::thread::sleep(std::time::Duration::from_millis(5));
        let cancel = AtomicBool::new(false);
        let (script, outcome) = manager.execute_script("Greet", &cancel)?;

        assert!(outcome.is_success());
        assert_eq!(outcome.render(), "hi");
        assert_eq!(manager.list_scripts()?[0].id, script.id);
        Ok(())
    }

    #[test]
    fn test_failed_execution_keeps_timestamp() -> Result<()> {
        let temp = TempDir::new()?;
        let manager = manager_in(&temp);
        let work_dir = temp.path().to_string_lossy().to_string();
        let saved = manager.save_script(draft("Broken", &work_dir, "exit 1"))?;

        let cancel = AtomicBool::new(false);
        let (_, outcome) = manager.execute_script("1", &cancel)?;

        assert!(!outcome.is_success());
        assert_eq!(manager.find_script("1")?.last_accessed, saved.last_accessed);
        Ok(())
    }

    #[test]
    fn test_unknown_script() {
        let temp = TempDir::new().unwrap();
        let manager = manager_in(&temp);

        let err = manager.find_script("42").unwrap_err();
        assert_eq!(
            err.downcast_ref::<ScriptError>(),
            Some(&ScriptError::NotFound("42".to_string()))
        );
    }
}
