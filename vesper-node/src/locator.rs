//! Service locator and counters.
//!
//! Named registry of shared services plus named counter closures polled by
//! diagnostics endpoints.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use vesper_core::{Error, Result};

type CounterSupplier = Box<dyn Fn() -> u64 + Send + Sync>;

struct Counter {
    name: String,
    supplier: CounterSupplier,
}

/// Name → service registry with named counters.
pub struct ServiceLocator {
    services: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
    counters: Mutex<Vec<Counter>>,
}

impl ServiceLocator {
    /// Create an empty locator.
    pub fn new() -> Self {
        Self {
            services: Mutex::new(HashMap::new()),
            counters: Mutex::new(Vec::new()),
        }
    }

    /// Register a service under a unique name.
    pub fn register_service<T: Any + Send + Sync>(
        &self,
        name: impl Into<String>,
        service: Arc<T>,
    ) -> Result<()> {
        let name = name.into();
        let mut services = self.services.lock();
        if services.contains_key(&name) {
            return Err(Error::invalid_argument(format!(
                "service '{name}' is already registered"
            )));
        }
        services.insert(name, service);
        Ok(())
    }

    /// Look up a service by name and type.
    pub fn service<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let services = self.services.lock();
        services.get(name).cloned()?.downcast::<T>().ok()
    }

    /// Number of registered services.
    pub fn num_services(&self) -> usize {
        self.services.lock().len()
    }

    /// Register a named counter.
    pub fn register_counter(
        &self,
        name: impl Into<String>,
        supplier: impl Fn() -> u64 + Send + Sync + 'static,
    ) {
        self.counters.lock().push(Counter {
            name: name.into(),
            supplier: Box::new(supplier),
        });
    }

    /// Read one counter by name.
    pub fn counter_value(&self, name: &str) -> Option<u64> {
        let counters = self.counters.lock();
        counters
            .iter()
            .find(|counter| counter.name == name)
            .map(|counter| (counter.supplier)())
    }

    /// Snapshot all counters in registration order.
    pub fn counters(&self) -> Vec<(String, u64)> {
        let counters = self.counters.lock();
        counters
            .iter()
            .map(|counter| (counter.name.clone(), (counter.supplier)()))
            .collect()
    }
}

impl Default for ServiceLocator {
    fn default() -> Self {
        Self::new()
    }
}
