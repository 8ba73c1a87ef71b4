use anyhow::{Context, Result, anyhow};
use durable_counter::storage::{codec, durable};
use durable_counter::{EngineConfig, PersistOutcome, PersistenceEngine};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

pub async fn get(config: EngineConfig) -> Result<()> {
    let engine = open(config).await?;
    println!("{}", engine.get_value());
    shutdown(&engine).await
}

pub async fn increment(config: EngineConfig, by: i64) -> Result<()> {
    let engine = open(config).await?;
    let value = engine.add(by);
    shutdown(&engine).await?;
    println!("{}", value);
    Ok(())
}

pub fn inspect(config: &EngineConfig) -> Result<()> {
    let path = config.path.display().to_string();
    let report = match durable::load(&config.path).context("failed to read counter file")? {
        None => json!({ "path": path, "status": "absent" }),
        Some(bytes) => match codec::validate(&bytes) {
            Ok(record) => json!({
                "path": path,
                "status": "valid",
                "visits": record.visits,
                "last_updated": record.last_updated,
                "version": record.version,
                "sealed": record.crc.is_some(),
            }),
            Err(rejection) => json!({
                "path": path,
                "status": "rejected",
                "reason": rejection.to_string(),
            }),
        },
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Reads stdin line by line: empty line or `+` increments, `get` prints,
/// `persist` flushes, `quit` exits. EOF and Ctrl-C exit too.
pub async fn watch(config: EngineConfig) -> Result<()> {
    let engine = open(config).await?;
    info!(path = %engine.location(), value = engine.get_value(), "Watching stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let signal = shutdown_signal();
    tokio::pin!(signal);

    loop {
        tokio::select! {
            _ = &mut signal => {
                info!("Shutdown signal received");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                match line.trim() {
                    "" | "+" => println!("{}", engine.increment()),
                    "get" => println!("{}", engine.get_value()),
                    "persist" => match engine.persist().await {
                        Ok(PersistOutcome::Saved { visits }) => println!("saved {}", visits),
                        Ok(PersistOutcome::Clean) => println!("clean"),
                        Err(err) => error!(error = %err, "Persist failed"),
                    },
                    "quit" | "exit" => break,
                    other => eprintln!("unknown command: {}", other),
                }
            }
        }
    }

    shutdown(&engine).await
}

async fn open(config: EngineConfig) -> Result<PersistenceEngine> {
    PersistenceEngine::open(config)
        .await
        .context("failed to initialize counter engine")
}

/// The flush timeout is enforced here, not by the engine.
async fn shutdown(engine: &PersistenceEngine) -> Result<()> {
    let timeout = engine.config().shutdown_flush_timeout;
    match tokio::time::timeout(timeout, engine.shutdown()).await {
        Ok(result) => {
            result.context("failed to flush counter on shutdown")?;
            Ok(())
        }
        Err(_) => Err(anyhow!("shutdown flush timed out after {:?}", timeout)),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "unable to install ctrl+c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "unable to install sigterm handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
