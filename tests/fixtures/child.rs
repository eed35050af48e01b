//! Supervised child used by the integration tests.
//!
//! Answers `"ping"` with `"pong"`, exits with the given code on
//! `{"exit": <code>}`, and fails its stop when `FIXTURE_STOP_ERROR` is set.

use async_trait::async_trait;
use serde_json::{json, Value};
use warden_runtime::{run_child, ChildContext, ChildProcess};

struct Echo;

#[async_trait]
impl ChildProcess for Echo {
    async fn start(&mut self, _ctx: &ChildContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&mut self, _ctx: &ChildContext) -> anyhow::Result<()> {
        match std::env::var("FIXTURE_STOP_ERROR") {
            Ok(message) => anyhow::bail!(message),
            Err(_) => Ok(()),
        }
    }

    async fn on_message(&mut self, ctx: &ChildContext, message: Value) -> anyhow::Result<()> {
        if message == json!("ping") {
            ctx.send(json!("pong")).await?;
        } else if let Some(code) = message.get("exit").and_then(Value::as_i64) {
            std::process::exit(code as i32);
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    warden_logging::init_simple_tracing("warn")?;
    std::process::exit(run_child("fixture-child", Echo).await)
}
