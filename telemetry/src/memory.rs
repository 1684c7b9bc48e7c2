use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use sysinfo::{Pid, System};

/// Source of the process's current memory footprint, in bytes.
pub trait MemoryProbe: Send + Sync {
    fn current_bytes(&self) -> Option<u64>;
}

/// Resident memory of the current process, read through `sysinfo`.
pub struct ProcessMemoryProbe {
    pid: Option<Pid>,
    system: Mutex<System>,
}

impl ProcessMemoryProbe {
    pub fn new() -> Self {
        Self {
            pid: sysinfo::get_current_pid().ok(),
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for ProcessMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    fn current_bytes(&self) -> Option<u64> {
        let pid = self.pid?;
        let mut system = self.system.lock();
        if !system.refresh_process(pid) {
            return None;
        }
        system.process(pid).map(sysinfo::Process::memory)
    }
}

/// Decides per invocation whether to measure memory, and hands out scopes.
#[derive(Clone)]
pub struct MemorySampler {
    enabled: bool,
    ratio: f64,
    probe: Arc<dyn MemoryProbe>,
}

impl fmt::Debug for MemorySampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySampler")
            .field("enabled", &self.enabled)
            .field("ratio", &self.ratio)
            .finish_non_exhaustive()
    }
}

impl MemorySampler {
    pub fn new(enabled: bool, ratio: f64, probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            enabled,
            ratio: ratio.clamp(0.0, 1.0),
            probe,
        }
    }

    pub fn disabled() -> Self {
        Self::new(false, 0.0, Arc::new(ProcessMemoryProbe::new()))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Independent draw with probability equal to the sampling ratio.
    pub fn should_sample(&self) -> bool {
        self.enabled && self.ratio > 0.0 && rand::random::<f64>() < self.ratio
    }

    pub fn scope(&self, active: bool) -> MemoryScope {
        MemoryScope {
            probe: active.then(|| Arc::clone(&self.probe)),
            start_bytes: None,
            end_bytes: None,
            stopped: false,
        }
    }
}

/// Brackets one measured region. Inactive scopes never touch the probe.
pub struct MemoryScope {
    probe: Option<Arc<dyn MemoryProbe>>,
    start_bytes: Option<u64>,
    end_bytes: Option<u64>,
    stopped: bool,
}

impl MemoryScope {
    pub fn start(&mut self) {
        self.start_bytes = self.read();
    }

    /// Takes the end reading; later calls keep the first one.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.end_bytes = self.read();
    }

    fn read(&self) -> Option<u64> {
        let probe = self.probe.as_ref()?;
        panic::catch_unwind(AssertUnwindSafe(|| probe.current_bytes())).unwrap_or(None)
    }

    pub fn sample(&self) -> MemorySample {
        MemorySample {
            enabled: self.probe.is_some(),
            start_bytes: self.start_bytes,
            end_bytes: self.end_bytes,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemorySample {
    pub enabled: bool,
    pub start_bytes: Option<u64>,
    pub end_bytes: Option<u64>,
}

impl MemorySample {
    /// `end - start`, when sampling was active and both readings exist.
    pub fn delta(&self) -> Option<i64> {
        if !self.enabled {
            return None;
        }
        let start = i64::try_from(self.start_bytes?).ok()?;
        let end = i64::try_from(self.end_bytes?).ok()?;
        Some(end.saturating_sub(start))
    }

    /// The delta only when it is strictly positive; the value to observe.
    pub fn growth(&self) -> Option<u64> {
        self.delta()
            .filter(|delta| *delta > 0)
            .and_then(|delta| u64::try_from(delta).ok())
    }
}
