/// Per-pass counters and the end-of-run summary
use log::info;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Clone, Debug, Default)]
pub struct PassStats {
    pub trials: u64,
    pub commits: u64,
    pub bytes_removed: u64,
    pub timeouts: u64,
    pub wall_time: Duration,
    /// Set when the pass was dropped or aborted, with the reason.
    pub skipped: Option<String>,
}

/// Aggregated over the whole run; keyed by pass display name.
pub struct Statistics {
    orig_size: u64,
    started: Instant,
    passes: BTreeMap<String, PassStats>,
}

impl Statistics {
    pub fn new(orig_size: u64) -> Self {
        Self {
            orig_size,
            started: Instant::now(),
            passes: BTreeMap::new(),
        }
    }

    pub fn orig_size(&self) -> u64 {
        self.orig_size
    }

    pub fn pass_mut(&mut self, name: &str) -> &mut PassStats {
        self.passes.entry(name.to_string()).or_default()
    }

    pub fn pass(&self, name: &str) -> Option<&PassStats> {
        self.passes.get(name)
    }

    pub fn total_commits(&self) -> u64 {
        self.passes.values().map(|s| s.commits).sum()
    }

    /// Progress note logged after each commit.
    pub fn commit_note(&self, current_size: u64, line_count: usize) -> String {
        let pct = 100.0 - (current_size as f64 * 100.0 / self.orig_size.max(1) as f64);
        format!("({:.1}%, {} bytes, {} lines)", pct, current_size, line_count)
    }

    /// End-of-run summary: per-pass counters, skipped passes, totals.
    pub fn log_summary(&self, final_size: u64) {
        info!(
            "reduced from {} to {} bytes in {:.1?} ({} commits)",
            self.orig_size,
            final_size,
            self.started.elapsed(),
            self.total_commits()
        );
        for (name, stats) in &self.passes {
            match &stats.skipped {
                Some(reason) => info!("  {name}: skipped ({reason})"),
                None => info!(
                    "  {name}: {} trials, {} commits, {} bytes removed, {:.1?}",
                    stats.trials, stats.commits, stats.bytes_removed, stats.wall_time
                ),
            }
        }
    }
}
