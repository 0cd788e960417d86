use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use cron::Schedule;
use hrsync_common::SweepConfig;
use tracing::{debug, error, info};

use crate::lifecycle::ApprovalLifecycle;

const MAX_SLEEP_SLICE: Duration = Duration::from_secs(1);

/// Cron-driven sweep loop. Ticks are evaluated in UTC.
pub struct SweepScheduler {
    schedule: Schedule,
    expression: String,
}

impl SweepScheduler {
    pub fn new(expression: &str) -> Result<Self> {
        let schedule = Schedule::from_str(expression)
            .with_context(|| format!("invalid sweep schedule '{expression}'"))?;
        Ok(Self {
            schedule,
            expression: expression.to_string(),
        })
    }

    pub fn from_config(config: &SweepConfig) -> Result<Self> {
        Self::new(&config.schedule)
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Sweeps on every tick until `stop` is set. Returns the number of sweeps that ran.
    pub fn run(&self, lifecycle: &ApprovalLifecycle, stop: &AtomicBool) -> Result<usize> {
        info!(schedule = %self.expression, "sweep scheduler started");
        let mut runs = 0;
        while !stop.load(Ordering::Acquire) {
            let next = self
                .next_after(Utc::now())
                .ok_or_else(|| anyhow!("sweep schedule '{}' has no upcoming tick", self.expression))?;
            debug!(next = %next, "waiting for next sweep tick");
            if !sleep_until(next, stop) {
                break;
            }
            match lifecycle.sweep(Utc::now()) {
                Ok(Some(_)) => runs += 1,
                Ok(None) => {}
                Err(err) => error!(error = %err, "sweep failed"),
            }
        }
        info!(runs, "sweep scheduler stopped");
        Ok(runs)
    }
}

/// False when `stop` was raised before `deadline`.
fn sleep_until(deadline: DateTime<Utc>, stop: &AtomicBool) -> bool {
    loop {
        if stop.load(Ordering::Acquire) {
            return false;
        }
        let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        if remaining.is_zero() {
            return true;
        }
        thread::sleep(remaining.min(MAX_SLEEP_SLICE));
    }
}
