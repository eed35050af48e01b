//! Pool worker used by the integration tests.
//!
//! Reports a request for every `"serve"`, exits with the given code on
//! `{"crash": <code>}`, and fails its start with "foo" when `FIXTURE_ERROR`
//! is set.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;
use warden_ipc::WORKER_ID_ENV;
use warden_runtime::{run_worker, ChildContext, ChildProcess};

struct Server;

#[async_trait]
impl ChildProcess for Server {
    async fn start(&mut self, _ctx: &ChildContext) -> anyhow::Result<()> {
        if std::env::var_os("FIXTURE_ERROR").is_some() {
            anyhow::bail!("foo");
        }
        debug!("worker {:?} up", std::env::var(WORKER_ID_ENV).ok());
        Ok(())
    }

    async fn stop(&mut self, _ctx: &ChildContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_message(&mut self, ctx: &ChildContext, message: Value) -> anyhow::Result<()> {
        if message == json!("serve") {
            ctx.request().await?;
        } else if let Some(code) = message.get("crash").and_then(Value::as_i64) {
            std::process::exit(code as i32);
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    warden_logging::init_simple_tracing("warn")?;
    std::process::exit(run_worker("fixture-worker", Server).await)
}
