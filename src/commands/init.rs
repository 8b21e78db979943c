//! Init command implementation

use crate::config::{default_watch_dirs, Config};
use crate::error::{Error, Result};
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub base_dir: PathBuf,
    pub config_file: PathBuf,
    pub watch_list: PathBuf,
    pub watch_entries: Vec<String>,
    /// Whether an existing config was replaced
    pub overwritten: bool,
}

/// Write a default config and a seeded watch list
pub fn cmd_init(base_dir: Option<PathBuf>, force: bool) -> Result<InitReport> {
    let config = Config::defaults_at(base_dir);

    let existed = config.paths.config_file.exists();
    if existed && !force {
        return Err(Error::Config(format!(
            "Config already exists at {}. Use --force to overwrite.",
            config.paths.config_file.display()
        )));
    }
    config.save()?;

    let watch_list = config.watch_list_path();
    let entries = default_watch_dirs();
    if !watch_list.exists() || force {
        config.save_watch_list(&entries)?;
    } else {
        info!("Keeping existing watch list {}", watch_list.display());
    }

    Ok(InitReport {
        base_dir: config.paths.base_dir.clone(),
        config_file: config.paths.config_file.clone(),
        watch_list,
        watch_entries: entries.iter().map(|e| e.to_string()).collect(),
        overwritten: existed,
    })
}

pub fn print_init(report: &InitReport) {
    println!("✓ veridock initialized");
    println!("  Config:     {}", report.config_file.display());
    println!("  Watch list: {}", report.watch_list.display());
    for entry in &report.watch_entries {
        println!("    {}", entry);
    }
    println!();
    println!("Next steps:");
    println!("  1. Edit the watch list to choose which folders to watch");
    println!("  2. Run 'veridock daemon --detach' to start converting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_writes_config_and_watch_list() {
        let tmp = TempDir::new().unwrap();
        let report = cmd_init(Some(tmp.path().to_path_buf()), false).unwrap();

        assert!(report.config_file.exists());
        assert!(!report.overwritten);
        let list = std::fs::read_to_string(&report.watch_list).unwrap();
        assert!(list.contains("~/Downloads"));
        assert!(list.contains("~/Documents"));

        let config = Config::load(&report.config_file).unwrap();
        assert!(config.is_initialized());
    }

    #[test]
    fn test_init_refuses_to_overwrite_without_force() {
        let tmp = TempDir::new().unwrap();
        cmd_init(Some(tmp.path().to_path_buf()), false).unwrap();
        assert!(cmd_init(Some(tmp.path().to_path_buf()), false).is_err());

        std::fs::write(tmp.path().join("config.toml"), "[scan]\ninterval_secs = 0\n").unwrap();
        let report = cmd_init(Some(tmp.path().to_path_buf()), true).unwrap();
        assert!(report.overwritten);
        assert_eq!(Config::load(&report.config_file).unwrap().scan.interval_secs, 10);
    }
}
