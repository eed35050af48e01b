//! `warden config`

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use warden_config::{ConfigLoader, WardenConfig};

pub fn validate(path: &Path) -> Result<()> {
    let config = ConfigLoader::new()
        .from_file(path)
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;

    println!("{} is valid", path.display());
    println!(
        "  pool: {} workers, enhanced={}, respawn={}",
        config
            .pool
            .count
            .map(|count| count.to_string())
            .unwrap_or_else(|| "cpu-count".to_string()),
        config.pool.enhanced,
        config.pool.respawn
    );
    println!("  child: respawn={}", config.child.respawn);
    Ok(())
}

pub fn generate(output: Option<PathBuf>, force: bool) -> Result<()> {
    let sample = WardenConfig::generate_sample();
    match output {
        Some(path) => {
            if path.exists() && !force {
                bail!("{} already exists, use --force to overwrite", path.display());
            }
            std::fs::write(&path, sample)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote sample configuration to {}", path.display());
        }
        None => print!("{}", sample),
    }
    Ok(())
}
