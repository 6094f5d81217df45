use anyhow::{Context, Result};
use script_saver::Shell;
use std::env;
use std::path::PathBuf;

// Environment overrides
pub const STORE_ENV: &str = "SCRIPT_SAVER_STORE";
pub const SHELL_ENV: &str = "SCRIPT_SAVER_SHELL";
pub const LOG_ENV: &str = "SCRIPT_SAVER_LOG";

const APP_DIR: &str = "script-saver";
const STORE_FILE: &str = "scripts.json";

// Runtime settings, resolved once per invocation
#[derive(Debug, Clone)]
pub struct Config {
    pub store_path: PathBuf,
    pub shell: Shell,
}

impl Config {
    /// Resolve settings from the `--store` flag (which clap already fills from
    /// `SCRIPT_SAVER_STORE`), the environment and platform defaults.
    pub fn resolve(store: Option<PathBuf>) -> Result<Self> {
        let store_path = match store {
            Some(path) => path,
            None => default_store_path()?,
        };

        let shell = env::var(SHELL_ENV)
            .ok()
            .filter(|program| !program.trim().is_empty())
            .map_or_else(Shell::platform, |program| Shell::new(program.trim()));

        Ok(Self { store_path, shell })
    }
}

fn default_store_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().with_context(|| {
        format!("could not determine a data directory; set {STORE_ENV} or pass --store")
    })?;
    Ok(data_dir.join(APP_DIR).join(STORE_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_store_path_wins() -> Result<()> {
        let config = Config::resolve(Some(PathBuf::from("/tmp/scripts.json")))?;
        assert_eq!(config.store_path, PathBuf::from("/tmp/scripts.json"));
        Ok(())
    }
}
