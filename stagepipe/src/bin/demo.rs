//! Runs a small fetch, execute and report chain.
//!
//! Usage: `stagepipe-demo [config.json] [operations]`

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use stagepipe::events::LoggingEventSink;
use stagepipe::observability::init_tracing;
use stagepipe::pipeline::{Pipeline, PipelineConfig};
use stagepipe::stages::{NullStage, PipelineStage, QueueBehavior, Stage, StageQueue, WorkUnit};

#[derive(Debug, Clone)]
struct Operation {
    name: String,
    fetched: bool,
    executed: bool,
}

impl Operation {
    fn new(name: String) -> Self {
        Self {
            name,
            fetched: false,
            executed: false,
        }
    }
}

impl WorkUnit for Operation {
    fn name(&self) -> &str {
        &self.name
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => PipelineConfig::from_file(&path).with_context(|| format!("loading {path}"))?,
        None => PipelineConfig::new(),
    };
    let operations: u64 = match args.next() {
        Some(n) => n.parse().context("operations must be a number")?,
        None => 10,
    };
    init_tracing(&config)?;

    let completed = Arc::new(AtomicU64::new(0));
    let errors = Arc::new(NullStage::discarding("errors"));
    let events = Arc::new(LoggingEventSink::debug());

    let counter = completed.clone();
    let report = Arc::new(
        PipelineStage::<Operation>::new(
            "report",
            Arc::new(
                QueueBehavior::new(StageQueue::from_config("report", &config), |op: &Operation| {
                    info!(operation = %op.name, fetched = op.fetched, executed = op.executed, "Operation complete");
                    Ok(None)
                })
                .with_after(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            ),
            Arc::new(NullStage::discarding("end")),
            errors.clone(),
        )
        .with_event_sink(events.clone()),
    );
    let execute = Arc::new(
        PipelineStage::<Operation>::new(
            "execute",
            Arc::new(QueueBehavior::new(
                StageQueue::from_config("execute", &config),
                |op: &Operation| {
                    Ok(Some(Operation {
                        executed: true,
                        ..op.clone()
                    }))
                },
            )),
            report.clone(),
            errors.clone(),
        )
        .with_event_sink(events.clone()),
    );
    let fetch = Arc::new(
        PipelineStage::<Operation>::new(
            "fetch",
            Arc::new(QueueBehavior::new(
                StageQueue::from_config("fetch", &config),
                |op: &Operation| {
                    Ok(Some(Operation {
                        fetched: true,
                        ..op.clone()
                    }))
                },
            )),
            execute.clone(),
            errors.clone(),
        )
        .with_event_sink(events),
    );

    let mut pipeline = Pipeline::new("demo", config);
    pipeline.add(fetch.clone())?.add(execute)?.add(report.clone())?;
    pipeline.start()?;

    for i in 0..operations {
        if !fetch.submit(Operation::new(format!("operation-{i}"))).await? {
            break;
        }
    }
    while completed.load(Ordering::SeqCst) < operations && !Stage::is_closed(&*report) {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Closing the tail is enough: the rest of the chain drains behind it.
    Stage::close(&*report);
    pipeline.join_with_timeout().await?;

    info!(
        completed = completed.load(Ordering::SeqCst),
        diverted = errors.discarded(),
        "Demo finished"
    );
    Ok(())
}
