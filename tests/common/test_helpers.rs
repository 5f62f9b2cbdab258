use flowgate::StatsNode;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing_subscriber::fmt::MakeWriter;

/// Statistics node whose readings the test sets directly.
#[derive(Debug, Default)]
pub struct Counters {
    qps_bits: AtomicU64,
    concurrency: AtomicU32,
}

impl Counters {
    pub fn with_qps(qps: f64) -> Arc<Self> {
        let counters = Arc::new(Self::default());
        counters.set_qps(qps);
        counters
    }

    pub fn with_concurrency(n: u32) -> Arc<Self> {
        let counters = Arc::new(Self::default());
        counters.set_concurrency(n);
        counters
    }

    pub fn set_qps(&self, qps: f64) {
        self.qps_bits.store(qps.to_bits(), Ordering::Release);
    }

    pub fn set_concurrency(&self, n: u32) {
        self.concurrency.store(n, Ordering::Release);
    }
}

impl StatsNode for Counters {
    fn current_qps(&self, _resource: &str) -> f64 {
        f64::from_bits(self.qps_bits.load(Ordering::Acquire))
    }

    fn current_concurrency(&self, _resource: &str) -> u32 {
        self.concurrency.load(Ordering::Acquire)
    }
}

/// Log sink shared between a test and its subscriber.
#[derive(Clone, Default)]
pub struct SharedWriter(pub Arc<Mutex<Vec<u8>>>);

impl SharedWriter {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl<'a> MakeWriter<'a> for SharedWriter {
    type Writer = SharedGuard;
    fn make_writer(&'a self) -> Self::Writer {
        SharedGuard(self.0.clone())
    }
}

pub struct SharedGuard(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for SharedGuard {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
