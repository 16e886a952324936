// SPDX-License-Identifier: GPL-2.0

//! Process-wide analysis statistics.
//!
//! A fire-and-forget sink for counters and stopwatches. Nothing in the core
//! depends on the values collected here; hosts can print a report after a run
//! or ignore the module entirely.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

/// A resumable stopwatch accumulating elapsed wall-clock time.
#[derive(Debug, Clone, Default)]
struct Stopwatch {
    elapsed: Duration,
    started: Option<Instant>,
}

impl Stopwatch {
    fn start(&mut self) {
        self.elapsed = Duration::ZERO;
        self.started = Some(Instant::now());
    }

    fn resume(&mut self) {
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }
    }

    fn stop(&mut self) {
        if let Some(t) = self.started.take() {
            self.elapsed += t.elapsed();
        }
    }

    fn total(&self) -> Duration {
        match self.started {
            Some(t) => self.elapsed + t.elapsed(),
            None => self.elapsed,
        }
    }
}

#[derive(Debug, Default)]
struct Registry {
    counters: BTreeMap<String, u64>,
    watches: BTreeMap<String, Stopwatch>,
}

fn registry() -> &'static Mutex<Registry> {
    static REGISTRY: OnceLock<Mutex<Registry>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(Registry::default()))
}

fn with_registry<R>(f: impl FnOnce(&mut Registry) -> R) -> R {
    let mut guard = match registry().lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    };
    f(&mut guard)
}

/// Increment the named counter.
pub fn count(name: &str) {
    with_registry(|r| *r.counters.entry(name.to_string()).or_insert(0) += 1);
}

/// Raise the named counter to `v` if it is below it.
pub fn count_max(name: &str, v: u64) {
    with_registry(|r| {
        let c = r.counters.entry(name.to_string()).or_insert(0);
        *c = (*c).max(v);
    });
}

/// Current value of the named counter (0 if never touched).
pub fn get(name: &str) -> u64 {
    with_registry(|r| r.counters.get(name).copied().unwrap_or(0))
}

/// Start (and reset) the named stopwatch.
pub fn start(name: &str) {
    with_registry(|r| r.watches.entry(name.to_string()).or_default().start());
}

/// Resume the named stopwatch without resetting its accumulated time.
pub fn resume(name: &str) {
    with_registry(|r| r.watches.entry(name.to_string()).or_default().resume());
}

/// Stop the named stopwatch.
pub fn stop(name: &str) {
    with_registry(|r| {
        if let Some(w) = r.watches.get_mut(name) {
            w.stop();
        }
    });
}

/// Accumulated time of the named stopwatch.
pub fn elapsed(name: &str) -> Duration {
    with_registry(|r| r.watches.get(name).map(|w| w.total()).unwrap_or_default())
}

/// Clear every counter and stopwatch.
pub fn reset() {
    with_registry(|r| {
        r.counters.clear();
        r.watches.clear();
    });
}

/// Render all counters and stopwatches as a text report.
pub fn report() -> String {
    with_registry(|r| {
        let mut out = String::new();
        for (name, v) in &r.counters {
            let _ = writeln!(out, "{}: {}", name, v);
        }
        for (name, w) in &r.watches {
            let _ = writeln!(out, "{}: {:.6}s", name, w.total().as_secs_f64());
        }
        out
    })
}

/// RAII guard that resumes a stopwatch on construction and stops it on drop.
///
/// Used around every domain operation so nested operations accumulate into
/// their own buckets.
#[derive(Debug)]
pub struct ScopedTimer {
    name: &'static str,
}

impl ScopedTimer {
    /// Resume the named stopwatch until the guard is dropped.
    pub fn new(name: &'static str) -> Self {
        resume(name);
        ScopedTimer { name }
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        stop(self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        reset();
        count("t.a");
        count("t.a");
        count_max("t.b", 7);
        count_max("t.b", 3);
        assert_eq!(get("t.a"), 2);
        assert_eq!(get("t.b"), 7);
    }

    #[test]
    fn test_scoped_timer() {
        {
            let _t = ScopedTimer::new("t.scope");
        }
        // Stopped; further elapsed() calls must not grow unboundedly.
        let a = elapsed("t.scope");
        let b = elapsed("t.scope");
        assert_eq!(a, b);
    }
}
