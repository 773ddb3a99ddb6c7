use crate::instance::Instance;
use crate::quality::PartitionCosts;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;

/// Cooperative cancellation. Polled before each Lloyd iteration, each
/// instance sweep, each hypothetical post-optimisation removal and each
/// mini-batch.
pub trait CancelToken: Sync {
    fn is_cancelled(&self) -> bool;
}

pub struct NeverCancelled;

impl CancelToken for NeverCancelled {
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Remaining-memory oracle, consulted at row milestones inside database
/// passes and before sizable allocations.
pub trait MemoryOracle: Sync {
    fn remaining_bytes(&self) -> u64;
}

pub struct Unbounded;

impl MemoryOracle for Unbounded {
    fn remaining_bytes(&self) -> u64 {
        u64::MAX
    }
}

/// Optional progress reporting; both methods may be no-ops.
pub trait ProgressSink: Sync {
    fn set_label(&self, _label: &str) {}
    fn set_progress(&self, _percent: f64) {}
}

pub struct Silent;

impl ProgressSink for Silent {}

/// Finite, restartable sequence of instances backing the mini-batch engine.
/// Reads are sampled at the configured percentage, deterministically for a
/// given source seed.
pub trait StreamSource {
    fn open_for_read(&mut self) -> bool;
    fn read_one(&mut self) -> Option<Instance>;
    fn close(&mut self);
    fn set_sample_percentage(&mut self, percent: f64);
    /// total row count of the backing database, before sampling
    fn row_count(&self) -> usize;
}

/// Collaborators injected into one engine call. Defaults are all no-ops.
pub struct RunContext<'a> {
    pub cancel: &'a dyn CancelToken,
    pub memory: &'a dyn MemoryOracle,
    pub progress: &'a dyn ProgressSink,
    pub costs: &'a dyn PartitionCosts,
    /// minimum headroom the memory oracle must report, in bytes
    pub memory_headroom: u64,
}

static NEVER: NeverCancelled = NeverCancelled;
static UNBOUNDED: Unbounded = Unbounded;
static SILENT: Silent = Silent;

impl RunContext<'static> {
    pub fn new() -> Self {
        Self {
            cancel: &NEVER,
            memory: &UNBOUNDED,
            progress: &SILENT,
            costs: &crate::quality::MODL_COSTS,
            memory_headroom: 0,
        }
    }
}

impl Default for RunContext<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> RunContext<'a> {
    pub fn with_cancel(mut self, cancel: &'a dyn CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_memory(mut self, memory: &'a dyn MemoryOracle, headroom: u64) -> Self {
        self.memory = memory;
        self.memory_headroom = headroom;
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_costs(mut self, costs: &'a dyn PartitionCosts) -> Self {
        self.costs = costs;
        self
    }
}

/// ProgressSink that forwards phase labels and completion percentages to
/// the log, reporting each whole percent once.
pub struct LogProgress {
    reported: AtomicI64,
}

impl LogProgress {
    pub fn new() -> Self {
        Self {
            reported: AtomicI64::new(-1),
        }
    }

    /// true when the percentage crosses into a whole percent that has not
    /// been reported yet
    fn advance(&self, percent: f64) -> bool {
        let whole = percent.floor() as i64;
        self.reported.swap(whole, Ordering::Relaxed) != whole
    }
}

impl Default for LogProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for LogProgress {
    fn set_label(&self, label: &str) {
        if !label.is_empty() {
            log::info!("{label}");
        }
    }

    fn set_progress(&self, percent: f64) {
        if self.advance(percent) {
            log::info!("progress: {percent:6.2}%");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::FrequencyTable;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn default_context_is_inert() {
        let ctx = RunContext::new();
        assert!(!ctx.cancel.is_cancelled());
        assert_eq!(ctx.memory.remaining_bytes(), u64::MAX);
        assert_eq!(ctx.memory_headroom, 0);
        // the silent sink swallows everything without observable effect
        ctx.progress.set_label("ignored");
        ctx.progress.set_progress(50.0);
    }

    struct Spy {
        labels: AtomicUsize,
        updates: AtomicUsize,
    }

    impl ProgressSink for Spy {
        fn set_label(&self, _label: &str) {
            self.labels.fetch_add(1, Ordering::Relaxed);
        }

        fn set_progress(&self, _percent: f64) {
            self.updates.fetch_add(1, Ordering::Relaxed);
        }
    }

    struct AlwaysCancelled;

    impl CancelToken for AlwaysCancelled {
        fn is_cancelled(&self) -> bool {
            true
        }
    }

    struct Starved;

    impl MemoryOracle for Starved {
        fn remaining_bytes(&self) -> u64 {
            0
        }
    }

    struct FlatCosts;

    impl PartitionCosts for FlatCosts {
        fn discretisation_cost(&self, _table: &FrequencyTable) -> crate::Real {
            1.0
        }

        fn grouping_cost(&self, _table: &FrequencyTable, _distinct: usize) -> crate::Real {
            2.0
        }
    }

    #[test]
    fn builders_thread_collaborators_through() {
        let spy = Spy {
            labels: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
        };
        let token = AlwaysCancelled;
        let oracle = Starved;
        let costs = FlatCosts;
        let ctx = RunContext::new()
            .with_cancel(&token)
            .with_memory(&oracle, 42)
            .with_progress(&spy)
            .with_costs(&costs);
        assert!(ctx.cancel.is_cancelled());
        assert_eq!(ctx.memory.remaining_bytes(), 0);
        assert_eq!(ctx.memory_headroom, 42);
        ctx.progress.set_label("pass");
        ctx.progress.set_progress(10.0);
        ctx.progress.set_progress(20.0);
        assert_eq!(spy.labels.load(Ordering::Relaxed), 1);
        assert_eq!(spy.updates.load(Ordering::Relaxed), 2);
        let table = FrequencyTable::new(1, 1);
        assert_eq!(ctx.costs.discretisation_cost(&table), 1.0);
        assert_eq!(ctx.costs.grouping_cost(&table, 1), 2.0);
    }

    #[test]
    fn log_progress_reports_each_whole_percent_once() {
        let sink = LogProgress::new();
        assert!(sink.advance(0.0));
        assert!(!sink.advance(0.4));
        assert!(!sink.advance(0.9));
        assert!(sink.advance(1.0));
        assert!(sink.advance(0.5));
        // the sink itself never panics on edge inputs
        sink.set_label("");
        sink.set_progress(100.0);
        sink.set_progress(100.0);
    }
}
