//! One-shot child. Fails with "no input" when `FIXTURE_FAIL` is set and never
//! finishes when `FIXTURE_HANG` is set.

use std::time::Duration;
use warden_runtime::run_once;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    warden_logging::init_simple_tracing("warn")?;

    let code = run_once("fixture-once", |_ctx| async {
        if std::env::var_os("FIXTURE_HANG").is_some() {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if std::env::var_os("FIXTURE_FAIL").is_some() {
            anyhow::bail!("no input");
        }
        Ok(())
    })
    .await;

    std::process::exit(code)
}
