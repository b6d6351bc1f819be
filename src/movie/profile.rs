//! Lightweight profiling over the hot paths: call counts and accumulated
//! time per named scope, reset at movie start and summarized at movie end.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileScope {
    Tick,
    Conversion,
    Download,
    Encode,
}

const SCOPES: [(ProfileScope, &str); 4] = [
    (ProfileScope::Tick, "tick"),
    (ProfileScope::Conversion, "conversion"),
    (ProfileScope::Download, "download"),
    (ProfileScope::Encode, "encode"),
];

#[derive(Debug, Default)]
struct Entry {
    calls: AtomicU64,
    nanos: AtomicU64,
}

#[derive(Debug, Default)]
pub struct Profiler {
    entries: [Entry; SCOPES.len()],
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        for entry in &self.entries {
            entry.calls.store(0, Ordering::Relaxed);
            entry.nanos.store(0, Ordering::Relaxed);
        }
    }

    pub fn record(&self, scope: ProfileScope, nanos: u64) {
        let index = SCOPES.iter().position(|(s, _)| *s == scope).unwrap();
        self.entries[index].calls.fetch_add(1, Ordering::Relaxed);
        self.entries[index].nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    /// Times a closure under the given scope.
    pub fn measure<T>(&self, scope: ProfileScope, func: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = func();
        self.record(scope, start.elapsed().as_nanos() as u64);
        result
    }

    /// One line per scope that saw any calls.
    pub fn summary(&self) -> Vec<String> {
        SCOPES
            .iter()
            .zip(&self.entries)
            .filter(|(_, entry)| entry.calls.load(Ordering::Relaxed) > 0)
            .map(|((_, name), entry)| {
                let calls = entry.calls.load(Ordering::Relaxed);
                let total = entry.nanos.load(Ordering::Relaxed);
                let average = total / calls.max(1);
                format!(
                    "{name}: {calls} calls, {:.2} ms total, {:.3} ms avg",
                    total as f64 / 1e6,
                    average as f64 / 1e6
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_summarizes() {
        let profiler = Profiler::new();
        profiler.record(ProfileScope::Encode, 2_000_000);
        profiler.record(ProfileScope::Encode, 4_000_000);

        let summary = profiler.summary();
        assert_eq!(summary.len(), 1);
        assert!(summary[0].starts_with("encode: 2 calls"));

        profiler.reset();
        assert!(profiler.summary().is_empty());
    }

    #[test]
    fn measure_returns_the_closure_result() {
        let profiler = Profiler::new();
        let value = profiler.measure(ProfileScope::Tick, || 7);
        assert_eq!(value, 7);
        assert_eq!(profiler.summary().len(), 1);
    }
}
