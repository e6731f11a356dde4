/*!
 * Memory pressure monitoring
 *
 * Classifies resident-set growth against a configured process budget
 * into LOW/MODERATE/HIGH and advises the prefetcher how deep its
 * buffer may be.
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::error::{NebulaError, Result};

/// Poll interval while waiting for memory relief
const RELIEF_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Memory pressure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressureLevel {
    Low,
    Moderate,
    High,
}

/// Source of used/max memory readings.
///
/// The production reader samples process RSS through sysinfo; tests
/// substitute a scripted reader.
pub trait MemoryReader: Send + Sync {
    /// Bytes currently in use by this process
    fn used_bytes(&self) -> u64;
    /// The budget those bytes are measured against
    fn max_bytes(&self) -> u64;
}

/// RSS-based reader bound to the current process
pub struct ProcessMemoryReader {
    pid: Pid,
    budget_bytes: u64,
}

impl ProcessMemoryReader {
    /// `budget_bytes` of zero means "total system memory"
    pub fn new(budget_bytes: u64) -> Self {
        let budget = if budget_bytes > 0 {
            budget_bytes
        } else {
            let mut system = System::new();
            system.refresh_memory();
            system.total_memory()
        };
        Self {
            pid: Pid::from_u32(std::process::id()),
            budget_bytes: budget,
        }
    }
}

impl MemoryReader for ProcessMemoryReader {
    fn used_bytes(&self) -> u64 {
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::nothing().with_memory(),
        );
        system
            .process(self.pid)
            .map(|p| p.memory())
            .unwrap_or(0)
    }

    fn max_bytes(&self) -> u64 {
        self.budget_bytes
    }
}

/// Classifies heap usage and recommends prefetch depth
pub struct MemoryPressureMonitor {
    reader: Box<dyn MemoryReader>,
    moderate_threshold: f64,
    high_threshold: f64,
    interrupted: Arc<AtomicBool>,
}

impl MemoryPressureMonitor {
    /// Monitor with default thresholds (moderate 0.70, high 0.85)
    pub fn new(reader: Box<dyn MemoryReader>) -> Self {
        Self {
            reader,
            moderate_threshold: 0.70,
            high_threshold: 0.85,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Monitor with explicit thresholds; requires `0 < moderate < high <= 1`
    pub fn with_thresholds(
        reader: Box<dyn MemoryReader>,
        moderate: f64,
        high: f64,
    ) -> Result<Self> {
        if !(moderate > 0.0 && moderate < high && high <= 1.0) {
            return Err(NebulaError::InvalidConfig(format!(
                "pressure thresholds must satisfy 0 < moderate < high <= 1, got ({}, {})",
                moderate, high
            )));
        }
        Ok(Self {
            reader,
            moderate_threshold: moderate,
            high_threshold: high,
            interrupted: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Monitor reading this process's RSS against `budget_bytes`
    /// (0 = total system memory)
    pub fn for_process(budget_bytes: u64) -> Self {
        Self::new(Box::new(ProcessMemoryReader::new(budget_bytes)))
    }

    /// Current used/max ratio
    pub fn usage_ratio(&self) -> f64 {
        let max = self.reader.max_bytes();
        if max == 0 {
            return 0.0;
        }
        self.reader.used_bytes() as f64 / max as f64
    }

    /// Classify current memory usage
    pub fn pressure_level(&self) -> PressureLevel {
        let ratio = self.usage_ratio();
        if ratio >= self.high_threshold {
            PressureLevel::High
        } else if ratio >= self.moderate_threshold {
            PressureLevel::Moderate
        } else {
            PressureLevel::Low
        }
    }

    /// Scale a configured prefetch depth by current pressure
    pub fn recommended_prefetch_count(&self, configured: usize) -> usize {
        match self.pressure_level() {
            PressureLevel::Low => configured,
            PressureLevel::Moderate => (configured / 2).max(1),
            PressureLevel::High => 1,
        }
    }

    /// Block until pressure drops below HIGH or the timeout elapses.
    ///
    /// Returns true when pressure is (or becomes) below HIGH, false on
    /// timeout or interruption. There is no collector to invoke; each
    /// poll re-samples RSS.
    pub fn wait_for_memory_relief(&self, timeout: Duration) -> bool {
        if self.pressure_level() != PressureLevel::High {
            return true;
        }

        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.interrupted.load(Ordering::Relaxed) {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            std::thread::sleep(RELIEF_POLL_INTERVAL.min(remaining));
            if self.pressure_level() != PressureLevel::High {
                return true;
            }
        }
        false
    }

    /// A handle that cancels any in-flight `wait_for_memory_relief`
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }
}
