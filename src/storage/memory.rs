//! In-memory storage backend. All state vanishes at process exit.

use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{info, warn};

use super::{Basket, BasketsDatabase, StoreError};
use crate::basket::{
    BasketAuth, BasketConfig, BasketNamesPage, BasketNamesQueryPage, RequestData, RequestsPage,
    RequestsQueryPage, ResponseConfig,
};
use crate::token::{generate_token, secure_compare};

struct BasketState {
    token: String,
    config: BasketConfig,
    /// Collected requests, newest first.
    requests: VecDeque<RequestData>,
    total_count: u64,
    responses: HashMap<String, ResponseConfig>,
}

impl BasketState {
    fn apply_limit(&mut self) {
        // keep requests up to the configured capacity
        if self.requests.len() > self.config.capacity {
            self.requests.truncate(self.config.capacity);
        }
    }
}

/// Basket backed by process memory, guarded by its own readers-writer lock.
pub struct MemoryBasket {
    state: RwLock<BasketState>,
}

impl MemoryBasket {
    fn new(token: String, config: BasketConfig) -> Self {
        let capacity = config.capacity;
        Self {
            state: RwLock::new(BasketState {
                token,
                config,
                requests: VecDeque::with_capacity(capacity),
                total_count: 0,
                responses: HashMap::new(),
            }),
        }
    }
}

impl Basket for MemoryBasket {
    fn config(&self) -> BasketConfig {
        self.state.read().config.clone()
    }

    fn update(&self, config: BasketConfig) {
        let mut state = self.state.write();
        state.config = config;
        state.apply_limit();
    }

    fn authorize(&self, token: &str) -> bool {
        secure_compare(token, &self.state.read().token)
    }

    fn get_response(&self, method: &str) -> Option<ResponseConfig> {
        self.state.read().responses.get(method).cloned()
    }

    fn set_response(&self, method: &str, response: ResponseConfig) {
        self.state
            .write()
            .responses
            .insert(method.to_string(), response);
    }

    fn add(&self, data: RequestData) -> RequestData {
        let mut state = self.state.write();
        state.requests.push_front(data.clone());
        state.total_count += 1;
        state.apply_limit();
        data
    }

    fn clear(&self) {
        let mut state = self.state.write();
        let capacity = state.config.capacity;
        // requests are dropped, the total counter survives
        state.requests = VecDeque::with_capacity(capacity);
    }

    fn size(&self) -> usize {
        self.state.read().requests.len()
    }

    fn get_requests(&self, max: usize, skip: usize) -> RequestsPage {
        let state = self.state.read();
        let size = state.requests.len();

        RequestsPage {
            requests: state
                .requests
                .iter()
                .skip(skip)
                .take(max)
                .cloned()
                .collect(),
            count: size,
            total_count: state.total_count,
            has_more: skip + max < size,
        }
    }

    fn find_requests(
        &self,
        query: &str,
        scope: &str,
        max: usize,
        skip: usize,
    ) -> RequestsQueryPage {
        let state = self.state.read();

        let mut requests = Vec::with_capacity(max);
        let mut skipped = 0;
        for (index, request) in state.requests.iter().enumerate() {
            if request.matches(query, scope) {
                if skipped < skip {
                    skipped += 1;
                } else {
                    requests.push(request.clone());
                }
            }

            // early exit: more records of any kind left means more pages
            if requests.len() == max {
                return RequestsQueryPage {
                    requests,
                    has_more: index + 1 < state.requests.len(),
                };
            }
        }

        RequestsQueryPage {
            requests,
            has_more: false,
        }
    }
}

struct DatabaseState {
    baskets: HashMap<String, Arc<MemoryBasket>>,
    /// Insertion-ordered names for deterministic listing.
    names: Vec<String>,
}

/// In-memory baskets database.
pub struct MemoryDatabase {
    state: RwLock<DatabaseState>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        info!("using in-memory database to store baskets");
        Self {
            state: RwLock::new(DatabaseState {
                baskets: HashMap::new(),
                names: Vec::new(),
            }),
        }
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl BasketsDatabase for MemoryDatabase {
    fn create(&self, name: &str, config: BasketConfig) -> Result<BasketAuth, StoreError> {
        let token = generate_token().map_err(StoreError::Token)?;

        let mut state = self.state.write();
        if state.baskets.contains_key(name) {
            return Err(StoreError::NameConflict(name.to_string()));
        }

        state.baskets.insert(
            name.to_string(),
            Arc::new(MemoryBasket::new(token.clone(), config)),
        );
        state.names.push(name.to_string());

        Ok(BasketAuth { token })
    }

    fn get(&self, name: &str) -> Option<Arc<dyn Basket>> {
        match self.state.read().baskets.get(name) {
            Some(basket) => Some(Arc::clone(basket) as Arc<dyn Basket>),
            None => {
                warn!("no basket found: {name}");
                None
            }
        }
    }

    fn delete(&self, name: &str) {
        let mut state = self.state.write();
        state.baskets.remove(name);
        state.names.retain(|n| n != name);
    }

    fn size(&self) -> usize {
        self.state.read().names.len()
    }

    fn get_names(&self, max: usize, skip: usize) -> BasketNamesPage {
        let state = self.state.read();
        let size = state.names.len();

        BasketNamesPage {
            names: state.names.iter().skip(skip).take(max).cloned().collect(),
            count: size,
            has_more: skip + max < size,
        }
    }

    fn find_names(&self, query: &str, max: usize, skip: usize) -> BasketNamesQueryPage {
        let state = self.state.read();

        let mut names = Vec::with_capacity(max);
        let mut skipped = 0;
        for (index, name) in state.names.iter().enumerate() {
            if name.contains(query) {
                if skipped < skip {
                    skipped += 1;
                } else {
                    names.push(name.clone());
                }
            }

            if names.len() == max {
                return BasketNamesQueryPage {
                    names,
                    has_more: index + 1 < state.names.len(),
                };
            }
        }

        BasketNamesQueryPage {
            names,
            has_more: false,
        }
    }

    fn release(&self) {
        info!("releasing in-memory database resources");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testsuite;

    #[test]
    fn test_memory_database_contract() {
        testsuite::run_database_suite(&MemoryDatabase::new());
    }

    #[test]
    fn test_memory_basket_contract() {
        testsuite::run_basket_suite(&MemoryDatabase::new());
    }

    #[test]
    fn test_memory_names_are_creation_ordered() {
        let db = MemoryDatabase::new();
        for name in ["zeta", "alpha", "mid"] {
            db.create(name, BasketConfig::with_capacity(5)).unwrap();
        }
        let page = db.get_names(10, 0);
        assert_eq!(page.names, vec!["zeta", "alpha", "mid"]);
    }
}
