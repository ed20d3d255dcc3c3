// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// dish_washing - run one washer and one wiper over a chosen table.
//
// Usage:
//   TABLE_LIMIT=3 dish_washing washing.txt wiping.txt dishes.txt shm
//   dish_washing washing.txt wiping.txt dishes.txt fifo --table-limit 2 --isolation thread

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dishrack::{
    BackendKind, Capacity, DurationTable, Isolation, Kitchen, RunConfig, TaskQueue,
};

#[derive(Parser, Debug)]
#[command(name = "dish_washing")]
#[command(version)]
#[command(about = "A washer and a wiper sharing a bounded table over IPC", long_about = None)]
struct Cli {
    /// Washing time per dish type (`<type>: <seconds>` per line)
    washing_times: PathBuf,

    /// Wiping time per dish type (`<type>: <seconds>` per line)
    wiping_times: PathBuf,

    /// Dishes to wash, in order (`<type>: <count>` per line)
    dishes: PathBuf,

    /// Table transport: fifo, pipe, msg, shm or socket
    workers: BackendKind,

    /// How many dishes fit on the table
    #[arg(long, env = "TABLE_LIMIT")]
    table_limit: Capacity,

    /// Run the wiper in a forked process or a thread
    #[arg(long, default_value = "process")]
    isolation: Isolation,

    /// Log filter directive; `RUST_LOG` wins when set
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => EnvFilter::try_new(level).with_context(|| format!("invalid log level {level:?}"))?,
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init()
        .context("installing log subscriber")?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let config = RunConfig {
        washing_times: DurationTable::load(&cli.washing_times)?,
        wiping_times: DurationTable::load(&cli.wiping_times)?,
        tasks: TaskQueue::load(&cli.dishes)?,
        table_limit: cli.table_limit,
        backend: cli.workers,
        isolation: cli.isolation,
    };

    let report = Kitchen::new(config)?.run()?;
    info!(washed = report.washed, "all dishes done");
    Ok(())
}
