use std::str::FromStr;
use std::sync::{Arc, Mutex};

use tracing::Level;

// Initialize tracing for tests
#[ctor::ctor]
fn init_tracing() {
    // LOG_LEVEL overrides the default, unparseable values fall back to INFO
    let level = std::env::var("LOG_LEVEL").ok().and_then(|level| Level::from_str(&level).ok()).unwrap_or(Level::INFO);
    let _ = tracing_subscriber::fmt().with_max_level(level).with_test_writer().try_init();
}

/// Shared log that closures can append to from any thread
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

#[allow(unused)]
impl Journal {
    pub fn new() -> Self { Self::default() }

    pub fn record(&self, entry: impl Into<String>) { self.0.lock().unwrap().push(entry.into()); }

    pub fn entries(&self) -> Vec<String> { self.0.lock().unwrap().clone() }

    pub fn take(&self) -> Vec<String> { self.0.lock().unwrap().drain(..).collect() }
}

/// Name of the current thread, for asserting which pool ran a step
#[allow(unused)]
pub fn thread_name() -> String { std::thread::current().name().unwrap_or("unnamed").to_string() }
