//! Local sample store and host sampling
//!
//! The agent keeps the latest gauges and the counter increments of the
//! current report interval in a [`SampleStore`]. [`HostSampler`] fills it on
//! every poll tick using `sysinfo`.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{trace, warn};

use crate::metric::{self, MetricRecord};

pub const POLL_COUNT: &str = "PollCount";
pub const RANDOM_VALUE: &str = "RandomValue";

#[derive(Debug, Default)]
struct Samples {
    gauges: BTreeMap<String, f64>,
    counters: BTreeMap<String, i64>,
}

/// Gauges and counter increments collected since the last report
#[derive(Debug, Default)]
pub struct SampleStore {
    samples: Mutex<Samples>,
}

impl SampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_gauge(&self, name: impl Into<String>, value: f64) {
        self.samples.lock().gauges.insert(name.into(), value);
    }

    pub fn increment(&self, name: impl Into<String>, delta: i64) {
        let mut samples = self.samples.lock();
        let stored = samples.counters.entry(name.into()).or_insert(0);
        *stored = metric::accumulate(*stored, delta);
    }

    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.samples.lock().gauges.get(name).copied()
    }

    pub fn counter(&self, name: &str) -> Option<i64> {
        self.samples.lock().counters.get(name).copied()
    }

    /// Copy all gauges and take all counters in one critical section
    ///
    /// Counters restart from zero afterwards; gauges keep their last value.
    pub fn drain(&self) -> Vec<MetricRecord> {
        let mut samples = self.samples.lock();
        let counters = std::mem::take(&mut samples.counters);

        let mut records: Vec<MetricRecord> = samples
            .gauges
            .iter()
            .map(|(name, value)| MetricRecord::gauge(name.clone(), *value))
            .collect();

        records.extend(
            counters
                .into_iter()
                .map(|(name, delta)| MetricRecord::counter(name, delta)),
        );

        records
    }
}

/// Samples host memory, CPU and the agent's own process into a store
pub struct HostSampler {
    system: System,
    pid: Option<Pid>,
    store: Arc<SampleStore>,
}

impl HostSampler {
    pub fn new(store: Arc<SampleStore>) -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("process metrics disabled: {e}");
                None
            }
        };

        Self {
            system: System::new(),
            pid,
            store,
        }
    }

    pub fn store(&self) -> &Arc<SampleStore> {
        &self.store
    }

    /// One poll tick
    ///
    /// CPU usage is computed between two refreshes, so the first poll
    /// reports zero utilization.
    pub fn poll(&mut self) {
        self.store.increment(POLL_COUNT, 1);
        self.store
            .set_gauge(RANDOM_VALUE, rand::thread_rng().r#gen::<f64>());

        self.sample_memory();
        self.sample_cpu();
        self.sample_process();

        trace!("poll complete");
    }

    fn sample_memory(&mut self) {
        self.system.refresh_memory();

        self.store
            .set_gauge("TotalMemory", self.system.total_memory() as f64);
        self.store
            .set_gauge("FreeMemory", self.system.free_memory() as f64);
        self.store
            .set_gauge("UsedMemory", self.system.used_memory() as f64);
        self.store
            .set_gauge("AvailableMemory", self.system.available_memory() as f64);
        self.store
            .set_gauge("TotalSwap", self.system.total_swap() as f64);
        self.store
            .set_gauge("UsedSwap", self.system.used_swap() as f64);
    }

    fn sample_cpu(&mut self) {
        self.system.refresh_cpu_usage();

        for (i, cpu) in self.system.cpus().iter().enumerate() {
            self.store
                .set_gauge(format!("CPUutilization{}", i + 1), f64::from(cpu.cpu_usage()));
        }

        let load = System::load_average();
        self.store.set_gauge("LoadAverage1", load.one);
        self.store.set_gauge("LoadAverage5", load.five);
        self.store.set_gauge("LoadAverage15", load.fifteen);
    }

    fn sample_process(&mut self) {
        let Some(pid) = self.pid else {
            return;
        };

        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

        if let Some(process) = self.system.process(pid) {
            self.store.set_gauge("Alloc", process.memory() as f64);
            self.store.set_gauge("Sys", process.virtual_memory() as f64);
            self.store
                .set_gauge("ProcessCPU", f64::from(process.cpu_usage()));
        }
    }
}
