use crate::resolver::FolderCache;
use crate::retry::RetryPolicy;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Process-wide tallies, updated concurrently by file tasks.
#[derive(Debug, Default)]
pub struct RunCounters {
    files_processed: AtomicUsize,
    files_moved: AtomicUsize,
    files_errored: AtomicUsize,
    files_archived: AtomicUsize,
    zips_created: AtomicUsize,
}

/// Point-in-time copy of [`RunCounters`] for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub files_processed: usize,
    pub files_moved: usize,
    pub files_errored: usize,
    pub files_archived: usize,
    pub zips_created: usize,
}

impl RunCounters {
    pub fn record_processed(&self) {
        self.files_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_moved(&self) {
        self.files_moved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_errored(&self, files: usize) {
        self.files_errored.fetch_add(files, Ordering::Relaxed);
    }

    pub fn record_archived(&self) {
        self.files_archived.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_zip(&self) {
        self.zips_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            files_processed: self.files_processed.load(Ordering::Relaxed),
            files_moved: self.files_moved.load(Ordering::Relaxed),
            files_errored: self.files_errored.load(Ordering::Relaxed),
            files_archived: self.files_archived.load(Ordering::Relaxed),
            zips_created: self.zips_created.load(Ordering::Relaxed),
        }
    }
}

/// State shared by every component for the duration of one run.
#[derive(Debug)]
pub struct RunContext {
    pub dry_run: bool,
    pub retry: RetryPolicy,
    pub folders: FolderCache,
    pub counters: RunCounters,
    cancelled: AtomicBool,
}

impl RunContext {
    pub fn new(dry_run: bool, retry: RetryPolicy) -> Self {
        Self {
            dry_run,
            retry,
            folders: FolderCache::default(),
            counters: RunCounters::default(),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Asks outstanding work to stop; tasks already running finish normally.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
