//! Metrics registry
//!
//! Lock-free counters and gauges on atomics, labeled families behind a
//! short-held `RwLock`, rendered into Prometheus exposition format for the
//! monitoring listener.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;

/// Histogram bucket upper bounds, in seconds.
const TIME_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0];

/// Monotonic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }
}

/// Settable gauge; `inc`/`dec` never underflow
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn set(&self, v: u64) {
        self.value.store(v, Ordering::SeqCst);
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::SeqCst);
    }

    pub fn dec(&self) {
        let _ = self
            .value
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1));
    }

    #[must_use]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }
}

/// Fixed-bucket latency histogram
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self {
            buckets: (0..TIME_BUCKETS.len()).map(|_| AtomicU64::new(0)).collect(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }
}

impl Histogram {
    pub fn observe(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();

        for (bucket, bound) in self.buckets.iter().zip(TIME_BUCKETS) {
            if secs <= *bound {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.sum_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }

    fn render(&self, out: &mut String, name: &str, labels: &str) {
        for (bucket, bound) in self.buckets.iter().zip(TIME_BUCKETS) {
            let _ = writeln!(
                out,
                "{name}_bucket{{{labels}le=\"{bound}\"}} {}",
                bucket.load(Ordering::SeqCst)
            );
        }

        let count = self.count.load(Ordering::SeqCst);
        let sum = self.sum_micros.load(Ordering::SeqCst) as f64 / 1_000_000.0;
        let _ = writeln!(out, "{name}_bucket{{{labels}le=\"+Inf\"}} {count}");
        let _ = writeln!(out, "{name}_sum{{{labels}}} {sum}");
        let _ = writeln!(out, "{name}_count{{{labels}}} {count}");
    }
}

/// Counter family keyed by one label value
#[derive(Debug, Default)]
pub struct CounterVec {
    series: RwLock<HashMap<String, Arc<Counter>>>,
}

impl CounterVec {
    pub fn inc(&self, key: &str) {
        self.entry(key).inc();
    }

    #[must_use]
    pub fn get(&self, key: &str) -> u64 {
        self.series.read().get(key).map_or(0, |c| c.get())
    }

    fn entry(&self, key: &str) -> Arc<Counter> {
        if let Some(counter) = self.series.read().get(key) {
            return counter.clone();
        }

        self.series
            .write()
            .entry(key.to_string())
            .or_default()
            .clone()
    }
}

/// Histogram family keyed by one label value
#[derive(Debug, Default)]
pub struct HistogramVec {
    series: RwLock<HashMap<String, Arc<Histogram>>>,
}

impl HistogramVec {
    pub fn observe(&self, key: &str, elapsed: Duration) {
        self.entry(key).observe(elapsed);
    }

    fn entry(&self, key: &str) -> Arc<Histogram> {
        if let Some(histogram) = self.series.read().get(key) {
            return histogram.clone();
        }

        self.series
            .write()
            .entry(key.to_string())
            .or_default()
            .clone()
    }
}

/// All provisioner metrics, shared by every component
#[derive(Debug)]
pub struct Metrics {
    site: String,

    /// RPC latency by `agent#action`
    pub rpc_time: HistogramVec,
    /// Helper run latency
    pub helper_time: Histogram,
    /// Identities found by broadcast discovery
    pub discovered: Counter,
    /// Identities found via lifecycle/registration events
    pub event_discovered: Counter,
    /// Completed discovery cycles
    pub discover_cycles: Counter,
    /// Failed RPCs by `agent#action`
    pub rpc_errors: CounterVec,
    /// Failed helper invocations
    pub helper_errors: Counter,
    /// Failed discovery cycles
    pub discovery_errors: Counter,
    /// Attempts that ended in a failure
    pub provision_errors: Counter,
    /// Attempts the helper deferred
    pub deferred: Counter,
    /// Nodes successfully provisioned
    pub provisioned: Counter,
    /// 1 while the pause gate is closed
    pub paused: Gauge,
    /// Workers currently inside the state machine
    pub busy_workers: Gauge,
}

impl Metrics {
    #[must_use]
    pub fn new(site: &str) -> Arc<Self> {
        Arc::new(Self {
            site: site.to_string(),
            rpc_time: HistogramVec::default(),
            helper_time: Histogram::default(),
            discovered: Counter::default(),
            event_discovered: Counter::default(),
            discover_cycles: Counter::default(),
            rpc_errors: CounterVec::default(),
            helper_errors: Counter::default(),
            discovery_errors: Counter::default(),
            provision_errors: Counter::default(),
            deferred: Counter::default(),
            provisioned: Counter::default(),
            paused: Gauge::default(),
            busy_workers: Gauge::default(),
        })
    }

    /// Render every metric in Prometheus exposition format.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(4096);
        let site = format!("site=\"{}\"", self.site);

        let _ = writeln!(out, "# HELP rpc_time Fabric RPC latency");
        let _ = writeln!(out, "# TYPE rpc_time histogram");
        for (target, histogram) in self.rpc_time.series.read().iter() {
            histogram.render(&mut out, "rpc_time", &format!("{site},target=\"{target}\","));
        }

        let _ = writeln!(out, "# HELP helper_time Helper run latency");
        let _ = writeln!(out, "# TYPE helper_time histogram");
        self.helper_time
            .render(&mut out, "helper_time", &format!("{site},"));

        self.render_counter(&mut out, "discovered", "Identities found by discovery", &self.discovered);
        self.render_counter(
            &mut out,
            "event_discovered",
            "Identities found via events",
            &self.event_discovered,
        );
        self.render_counter(
            &mut out,
            "discover_cycles",
            "Completed discovery cycles",
            &self.discover_cycles,
        );

        let _ = writeln!(out, "# HELP rpc_errors Failed fabric RPCs");
        let _ = writeln!(out, "# TYPE rpc_errors counter");
        for (target, counter) in self.rpc_errors.series.read().iter() {
            let _ = writeln!(
                out,
                "rpc_errors{{{site},target=\"{target}\"}} {}",
                counter.get()
            );
        }

        self.render_counter(&mut out, "helper_errors", "Failed helper runs", &self.helper_errors);
        self.render_counter(
            &mut out,
            "discovery_errors",
            "Failed discovery cycles",
            &self.discovery_errors,
        );
        self.render_counter(
            &mut out,
            "provision_errors",
            "Provisioning attempts that failed",
            &self.provision_errors,
        );
        self.render_counter(&mut out, "deferred", "Provisioning attempts deferred by the helper", &self.deferred);
        self.render_counter(&mut out, "provisioned", "Nodes provisioned", &self.provisioned);

        let _ = writeln!(out, "# HELP paused Whether provisioning is paused");
        let _ = writeln!(out, "# TYPE paused gauge");
        let _ = writeln!(out, "paused {}", self.paused.get());

        let _ = writeln!(out, "# HELP busy_workers Workers currently provisioning");
        let _ = writeln!(out, "# TYPE busy_workers gauge");
        let _ = writeln!(out, "busy_workers {}", self.busy_workers.get());

        out
    }

    fn render_counter(&self, out: &mut String, name: &str, help: &str, counter: &Counter) {
        let _ = writeln!(out, "# HELP {name} {help}");
        let _ = writeln!(out, "# TYPE {name} counter");
        let _ = writeln!(out, "{name}{{site=\"{}\"}} {}", self.site, counter.get());
    }
}
