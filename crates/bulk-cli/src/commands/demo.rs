//! `bulk demo`: replay the two-session scenario.
//!
//! Session one gets `stat1..stat5` in two chunks; session two gets nested
//! explicit blocks and ends inside an unterminated block, which is
//! discarded on disconnect.

use anyhow::{Context, Result};
use bulk_core::{BulkConfig, BulkContext};
use tracing::{info, warn};

const FIRST: [&str; 2] = ["stat1\nstat2\nstat3\n", "stat4\nstat5\n"];
const SECOND: [&str; 2] = [
    "cmd1\ncmd2\n{\ncmd3\ncmd4\n}\n",
    "{\ncmd5\ncmd6\n{\ncmd7\ncmd8\n}\ncmd9\n}\n{\ncmd10\ncmd11\n",
];

pub async fn run(config: BulkConfig, block_size: usize) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        let ctx = BulkContext::new(&config).context("failed to start output pipeline")?;
        play(&ctx, block_size)?;
        if !ctx.shutdown() {
            warn!("output pipeline did not drain before shutdown");
        }
        Ok(())
    })
    .await
    .context("demo task panicked")?
}

/// Feed the scenario into `ctx`, interleaving the two sessions.
pub fn play(ctx: &BulkContext, block_size: usize) -> Result<()> {
    let first = ctx.open(block_size)?;
    let second = ctx.open(block_size)?;
    info!(block_size, "demo sessions opened");

    for (chunk_a, chunk_b) in FIRST.iter().zip(SECOND.iter()) {
        ctx.feed(first, chunk_a.as_bytes())?;
        ctx.feed(second, chunk_b.as_bytes())?;
    }

    ctx.close(first);
    ctx.close(second);
    Ok(())
}
