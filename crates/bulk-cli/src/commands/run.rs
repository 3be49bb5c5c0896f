//! Drivers feeding directive lines into an [`Interpreter`].
//!
//! Interactive mode reads stdin on a dedicated thread; script mode reads a
//! file up front. Both forward lines over a channel so the driver loop can
//! also react to Ctrl-C / SIGTERM. Every directive runs in `block_in_place`
//! because closing the last session waits for the output workers.

use anyhow::{Context, Result};
use bulk_core::{BulkConfig, BulkContext};
use std::io::{self, BufRead, Write};
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::interpreter::Interpreter;

const LINE_BUFFER: usize = 64;

/// `bulk` / `bulk interactive`: read directives from stdin.
pub async fn interactive(config: &BulkConfig) -> Result<()> {
    let (tx, rx) = mpsc::channel(LINE_BUFFER);
    std::thread::Builder::new()
        .name("bulk-stdin".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to read stdin");
                        break;
                    }
                }
            }
        })
        .context("failed to spawn stdin reader")?;

    drive(config, rx, true).await
}

/// `bulk run <FILE>`: execute a script non-interactively.
pub async fn script(config: &BulkConfig, path: &Path) -> Result<()> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read script {}", path.display()))?;
    info!(path = %path.display(), lines = content.lines().count(), "running script");

    let (tx, rx) = mpsc::channel(LINE_BUFFER);
    tokio::spawn(async move {
        for line in content.lines() {
            if tx.send(line.to_string()).await.is_err() {
                break;
            }
        }
    });

    drive(config, rx, false).await
}

async fn drive(config: &BulkConfig, mut lines: mpsc::Receiver<String>, interactive: bool) -> Result<()> {
    let ctx = BulkContext::new(config).context("failed to start output pipeline")?;
    let interpreter = Interpreter::new(&ctx, interactive);
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();

    if interactive {
        interpreter.banner(&mut stdout).context("failed to write to stdout")?;
    }

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else {
                    debug!("end of input");
                    break;
                };
                tokio::task::block_in_place(|| {
                    interpreter.execute_line(&line, &mut stdout, &mut stderr)
                })
                .context("failed to write output")?;
                if interpreter.should_stop() {
                    info!("exit requested");
                    break;
                }
            }
            _ = &mut shutdown => {
                info!("received shutdown signal");
                break;
            }
        }
    }

    let drained = tokio::task::block_in_place(|| {
        interpreter.disconnect_all();
        ctx.shutdown()
    });
    if !drained {
        warn!("output pipeline did not drain before shutdown");
    }
    stdout.flush().context("failed to flush stdout")?;
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
