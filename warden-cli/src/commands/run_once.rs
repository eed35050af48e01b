//! `warden run-once`

use anyhow::{Context, Result};
use std::path::PathBuf;
use warden_config::ChildConfig;
use warden_process::{run_once, ProgramSpec};

pub async fn run(
    program: PathBuf,
    config: &ChildConfig,
    timeout: Option<u64>,
    args: Vec<String>,
) -> Result<()> {
    let mut spec = ProgramSpec::from_child_config(&program, config);
    if !args.is_empty() {
        spec = spec.with_args(args);
    }

    run_once(spec, super::millis(timeout))
        .await
        .with_context(|| format!("{} failed", program.display()))
}
