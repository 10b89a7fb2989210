//! Write-throughput harness for the batching engine.
//!
//! Runs concurrent map writers against the in-process store and reports how
//! many round trips the batching saved.

use std::io::IsTerminal;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{ensure, Context};
use clap::Parser;
use remcoll::{CollectionBuilder, MemoryPool, RemoteMap};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "remcoll-bench")]
#[command(about = "Measure batched write throughput against the in-process store", long_about = None)]
struct Args {
    /// Total number of inserts across all writers
    #[arg(long, env = "REMCOLL_BENCH_OPS", default_value_t = 100_000)]
    ops: u64,

    /// Concurrent writers, each with its own map instance
    #[arg(long, env = "REMCOLL_BENCH_TASKS", default_value_t = 4)]
    tasks: u64,

    /// Let every writer share one map instance instead of owning one
    #[arg(long, env = "REMCOLL_BENCH_SHARED")]
    shared: bool,

    /// Flush after every write
    #[arg(long, env = "REMCOLL_SYNC_IMMEDIATE")]
    sync_immediate: bool,

    /// Buffered writes that force a flush
    #[arg(long, env = "REMCOLL_MAX_WITHOUT_SYNC", default_value_t = remcoll::DEFAULT_MAX_WITHOUT_SYNC)]
    max_without_sync: u64,

    /// Quiet period before a deferred flush, in milliseconds
    #[arg(long = "delay-ms", env = "REMCOLL_DELAY_MS", default_value_t = 100)]
    delay_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let ansi = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    tracing_subscriber::fmt()
        .with_ansi(ansi)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,remcoll=warn".into()),
        )
        .init();

    let args = Args::parse();
    ensure!(args.tasks > 0, "--tasks must be at least 1");
    run(args).await
}

async fn run(args: Args) -> anyhow::Result<()> {
    let pool = Arc::new(MemoryPool::new());
    let builder = CollectionBuilder::new(Arc::clone(&pool))
        .sync_immediate(args.sync_immediate)
        .max_without_sync(args.max_without_sync)
        .delay_before_sync(Duration::from_millis(args.delay_ms));
    let per_task = args.ops / args.tasks;

    info!(
        ops = per_task * args.tasks,
        tasks = args.tasks,
        shared = args.shared,
        sync_immediate = args.sync_immediate,
        max_without_sync = args.max_without_sync,
        delay_ms = args.delay_ms,
        "starting write benchmark"
    );

    let started = Instant::now();
    let shared: Arc<RemoteMap<MemoryPool, String, u64>> = Arc::new(builder.map("bench:shared"));
    let mut writers = Vec::new();
    for task in 0..args.tasks {
        let map = if args.shared {
            Arc::clone(&shared)
        } else {
            Arc::new(builder.map(format!("bench:{task}")))
        };
        writers.push(tokio::spawn(async move {
            for i in 0..per_task {
                map.insert(&format!("{task}:{i}"), &i).await?;
            }
            map.sync().await?;
            map.len().await
        }));
    }

    let mut stored = Vec::new();
    for (task, writer) in writers.into_iter().enumerate() {
        let len = writer
            .await
            .context("writer task panicked")?
            .with_context(|| format!("writer {task} failed"))?;
        stored.push(len);
    }
    let total = usize::try_from(per_task * args.tasks)?;
    if args.shared {
        let len = shared.len().await?;
        ensure!(len == total, "shared map holds {len} entries, expected {total}");
    } else {
        let sum: usize = stored.iter().sum();
        ensure!(sum == total, "maps hold {sum} entries, expected {total}");
    }
    let elapsed = started.elapsed();

    let store = pool.store().stats();
    let connections = pool.stats();
    #[allow(clippy::cast_precision_loss)]
    let throughput = (per_task * args.tasks) as f64 / elapsed.as_secs_f64().max(f64::EPSILON);
    info!(
        elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        ops_per_sec = throughput.round(),
        round_trips = store.round_trips,
        pipelines = store.pipelines,
        commands = store.commands,
        connections_created = connections.created,
        broken_returns = connections.broken_returns,
        "benchmark finished"
    );
    ensure!(
        connections.outstanding() == 0,
        "{} connections were never returned",
        connections.outstanding()
    );
    Ok(())
}
