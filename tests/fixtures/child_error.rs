//! Child whose start always fails with "bar"

use async_trait::async_trait;
use warden_runtime::{run_child, ChildContext, ChildProcess};

struct Broken;

#[async_trait]
impl ChildProcess for Broken {
    async fn start(&mut self, _ctx: &ChildContext) -> anyhow::Result<()> {
        anyhow::bail!("bar")
    }

    async fn stop(&mut self, _ctx: &ChildContext) -> anyhow::Result<()> {
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    warden_logging::init_simple_tracing("warn")?;
    std::process::exit(run_child("fixture-child-error", Broken).await)
}
