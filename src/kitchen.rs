// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// One run of the kitchen: open the table, start the wiper, wash, join,
// release.

use tracing::{debug, info, warn};

use crate::backend::Table;
use crate::config::RunConfig;
use crate::context;
use crate::error::{Error, Result};
use crate::item::Item;
use crate::role::{Stopwatch, Washer, Wiper};

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// Dishes put on the table.
    pub washed: u64,
    /// Dishes taken, in order. `None` when the wiper ran in a child
    /// process.
    pub wiped: Option<Vec<Item>>,
}

#[derive(Debug, Clone)]
pub struct Kitchen {
    config: RunConfig,
}

impl Kitchen {
    /// Validate `config` up front; a kitchen that exists can always start.
    pub fn new(config: RunConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn run(&self) -> Result<Report> {
        let cfg = &self.config;
        let clock = Stopwatch::start();
        info!(
            backend = %cfg.backend,
            isolation = %cfg.isolation,
            table_limit = cfg.table_limit.get(),
            dishes = cfg.tasks.total(),
            "opening kitchen"
        );

        let Table {
            mut resources,
            washer,
            wiper,
        } = Table::open(cfg.backend, cfg.table_limit)?;

        let spawned = context::spawn(
            cfg.isolation,
            Wiper::new(cfg.wiping_times.clone(), clock),
            wiper,
            washer,
        );
        let (mut washer_end, wiper_ctx) = match spawned {
            Ok(v) => v,
            Err(e) => {
                if let Err(re) = resources.release() {
                    warn!(error = %re, "release after failed spawn");
                }
                return Err(e);
            }
        };

        let washed = Washer::new(cfg.washing_times.clone(), clock).work(&mut washer_end, &cfg.tasks);
        drop(washer_end);
        let wiped = wiper_ctx.join();
        let released = resources.release();
        debug!(elapsed = clock.secs(), "kitchen closed");

        let (washed, wiped) = match (washed, wiped) {
            (Ok(n), Ok(w)) => (n, w),
            // The washer only saw the wiper give up; report why it did.
            (Err(Error::PeerAborted { .. }), Err(e)) => return Err(e),
            (Err(e), _) | (Ok(_), Err(e)) => return Err(e),
        };
        released?;
        Ok(Report { washed, wiped })
    }
}
