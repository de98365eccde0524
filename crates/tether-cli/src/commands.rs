//! Subcommand handlers.

use crate::Command;
use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use tether_core::{
    GetOptions, QueueEvent, RequestOrchestrator, TetherError, WriteOptions, Written,
};
use tracing::info;

pub(crate) async fn run(orchestrator: &RequestOrchestrator, command: Command) -> Result<()> {
    match command {
        Command::Get {
            path,
            query,
            refresh,
        } => {
            let mut options = GetOptions::new();
            for (name, value) in query {
                options = options.with_query(name, value);
            }
            if refresh {
                options = options.refresh();
            }
            let fetched = orchestrator
                .get::<Value>(&path, options)
                .await
                .map_err(describe)?;
            if fetched.cached {
                info!("Served from cache");
            }
            print_json(&fetched.data)
        }
        Command::Post { path, body, id } => {
            let body = parse_body(&body)?;
            let written = orchestrator
                .post(&path, &body, write_options(id))
                .await
                .map_err(describe)?;
            print_written(written)
        }
        Command::Put { path, body, id } => {
            let body = parse_body(&body)?;
            let written = orchestrator
                .put(&path, &body, write_options(id))
                .await
                .map_err(describe)?;
            print_written(written)
        }
        Command::Delete { path, id } => {
            let written = orchestrator
                .delete(&path, write_options(id))
                .await
                .map_err(describe)?;
            print_written(written)
        }
        Command::Pending => {
            for mutation in orchestrator.queue().list_pending()? {
                println!(
                    "{}\t{} {}\tqueued {}\tretries {}",
                    mutation.id,
                    mutation.method,
                    mutation.url,
                    mutation.enqueued_at.to_rfc3339(),
                    mutation.retry_count
                );
            }
            Ok(())
        }
        Command::Replay => {
            let report = orchestrator.replay_now().await?;
            print_json(&serde_json::to_value(report)?)
        }
        Command::Watch => watch(orchestrator).await,
        Command::Usage => {
            let usage = orchestrator.cache().usage()?;
            println!(
                "{} / {} bytes ({:.1}%), {} cached responses, {} queued writes",
                usage.used,
                usage.quota,
                usage.percent,
                usage.entries,
                orchestrator.queue().len()?
            );
            Ok(())
        }
        Command::ClearCache { expired } => {
            let removed = if expired {
                orchestrator.cache().cleanup_expired()?
            } else {
                orchestrator.cache().clear()?
            };
            println!("Removed {} cached responses", removed);
            Ok(())
        }
    }
}

async fn watch(orchestrator: &RequestOrchestrator) -> Result<()> {
    let mut events = orchestrator.queue().subscribe_events();
    orchestrator.init();
    info!(
        "Watching {} ({} queued writes), Ctrl+C to stop",
        orchestrator.base_url(),
        orchestrator.queue().len()?
    );

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    info!("Missed {} queue events", missed);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Shutdown signal received, exiting");
                break;
            }
        }
    }

    orchestrator.dispose();
    Ok(())
}

fn print_event(event: &QueueEvent) {
    match event {
        QueueEvent::Enqueued { id } => println!("queued     {}", id),
        QueueEvent::Delivered { id } => println!("delivered  {}", id),
        QueueEvent::Retained { id, retry_count } => {
            println!("retrying   {} (attempt {})", id, retry_count)
        }
        QueueEvent::Discarded { id, reason } => println!("discarded  {}: {}", id, reason),
    }
}

/// Lead with the HTTP status when the server answered.
fn describe(error: TetherError) -> anyhow::Error {
    match error.status() {
        Some(status) => anyhow::Error::new(error).context(format!("server answered {}", status)),
        None => error.into(),
    }
}

fn write_options(id: Option<String>) -> WriteOptions {
    match id {
        Some(id) => WriteOptions::new().with_mutation_id(id),
        None => WriteOptions::new(),
    }
}

fn parse_body(body: &str) -> Result<Value> {
    serde_json::from_str(body).context("request body must be valid JSON")
}

fn print_written(written: Written<Value>) -> Result<()> {
    match written {
        Written::Sent { data } => print_json(&data),
        Written::Queued { mutation_id } => {
            println!("Offline: queued as {}", mutation_id);
            Ok(())
        }
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parse a `name=value` query parameter.
pub(crate) fn parse_query(raw: &str) -> Result<(String, String)> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected name=value, got {}", raw))?;
    Ok((name.to_string(), value.to_string()))
}
