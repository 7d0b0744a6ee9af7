//! Method registry, read lock-free on the dispatch path.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;

use crate::error::ServerError;
use crate::server::{HandlerFn, Service};

/// Immutable snapshot of every registered method.
#[derive(Clone, Default)]
pub struct Registry {
    services: HashMap<String, BTreeMap<String, HandlerFn>>,
}

impl Registry {
    /// Find the handler for a fully-qualified `Service.Method` name.
    pub fn lookup(&self, service_method: &str) -> Option<HandlerFn> {
        let (service, method) = service_method.rsplit_once('.')?;
        self.services.get(service)?.get(method).cloned()
    }

    pub fn contains_service(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Every registered `Service.Method`, sorted.
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .services
            .iter()
            .flat_map(|(service, methods)| methods.keys().map(move |m| format!("{service}.{m}")))
            .collect();
        names.sort();
        names
    }
}

/// Copy-on-write registry: writers clone and swap, readers load a snapshot.
#[derive(Default)]
pub struct MethodRegistry {
    current: ArcSwap<Registry>,
    write: Mutex<()>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `service` under `name`.
    pub fn register(&self, name: &str, service: Service) -> Result<(), ServerError> {
        if name.is_empty() || name.contains('.') || name.chars().any(char::is_whitespace) {
            return Err(ServerError::InvalidServiceName(name.to_string()));
        }
        if service.is_empty() {
            return Err(ServerError::NoMethods(name.to_string()));
        }

        let _writer = self.write.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.current.load();
        if current.contains_service(name) {
            return Err(ServerError::DuplicateService(name.to_string()));
        }
        let mut next = Registry::clone(&current);
        next.services.insert(name.to_string(), service.into_methods());
        self.current.store(Arc::new(next));
        tracing::debug!(service = %name, "Service registered");
        Ok(())
    }

    pub fn lookup(&self, service_method: &str) -> Option<HandlerFn> {
        self.current.load().lookup(service_method)
    }

    pub fn snapshot(&self) -> Arc<Registry> {
        self.current.load_full()
    }
}
