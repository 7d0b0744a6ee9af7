//! Pools grouped by logical server name.

use std::collections::HashMap;

use crate::pool::{Pool, PoolConnection};

/// Owns one [`Pool`] per configured server.
#[derive(Debug)]
pub struct PoolManager<C: PoolConnection> {
    pools: HashMap<String, Pool<C>>,
}

impl<C: PoolConnection> PoolManager<C> {
    pub fn new() -> Self {
        Self { pools: HashMap::new() }
    }

    /// Register `pool` under `name`, replacing and closing any previous one.
    pub fn add(&mut self, name: impl Into<String>, pool: Pool<C>) {
        if let Some(previous) = self.pools.insert(name.into(), pool) {
            previous.close();
        }
    }

    pub fn get(&self, name: &str) -> Option<&Pool<C>> {
        self.pools.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.pools.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn close_all(&self) {
        for pool in self.pools.values() {
            pool.close();
        }
    }
}

impl<C: PoolConnection> Default for PoolManager<C> {
    fn default() -> Self {
        Self::new()
    }
}
