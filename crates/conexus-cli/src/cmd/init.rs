//! `conexus init` and `conexus config`.

use anyhow::{bail, Context};
use conexus_kernel::config::{default_config_path, render_config};
use conexus_kernel::KernelConfig;
use std::path::{Path, PathBuf};
use tracing::info;

pub fn cmd_init(config: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let path = config.unwrap_or_else(default_config_path);
    write_default_config(&path, force)?;
    println!("Wrote {}", path.display());
    println!("Run `conexus keygen` and set identity_secret for a stable gateway identity.");
    Ok(())
}

pub fn cmd_show_config(config: &KernelConfig) -> anyhow::Result<()> {
    print!("{}", render_config(config).context("Failed to render config")?);
    Ok(())
}

fn write_default_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let rendered = render_config(&KernelConfig::default()).context("Failed to render config")?;
    std::fs::write(path, rendered).with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), "default config written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use conexus_kernel::config::load_config;

    #[test]
    fn test_write_default_config_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        write_default_config(&path, false).unwrap();
        assert_eq!(load_config(Some(&path)), KernelConfig::default());
    }

    #[test]
    fn test_write_default_config_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "log_level = \"debug\"\n").unwrap();

        assert!(write_default_config(&path, false).is_err());
        assert_eq!(load_config(Some(&path)).log_level, "debug");

        write_default_config(&path, true).unwrap();
        assert_eq!(load_config(Some(&path)).log_level, "info");
    }
}
