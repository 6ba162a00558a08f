//! Embedded key-value storage backend on RocksDB.
//!
//! Buckets are modeled as key prefixes. Each basket owns a scalar namespace
//! `b/<name>/{token,url,opts,capacity,total,count,seq}`, a request ring
//! `b/<name>/r/<big-endian u32>` -> JSON record keyed by a monotone sequence,
//! and per-method responses `b/<name>/m/<METHOD>` -> JSON. A separate
//! `n/<name>` keyspace indexes basket names, which makes listing lexicographic.
//! Every mutation runs in a single RocksDB transaction.

use rocksdb::{Direction, IteratorMode, Options, TransactionDB, TransactionDBOptions};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::{Basket, BasketsDatabase, StoreError};
use crate::basket::{
    BasketAuth, BasketConfig, BasketNamesPage, BasketNamesQueryPage, RequestData, RequestsPage,
    RequestsQueryPage, ResponseConfig,
};
use crate::token::{generate_token, secure_compare};

const FIELD_TOKEN: &str = "token";
const FIELD_FORWARD_URL: &str = "url";
const FIELD_OPTIONS: &str = "opts";
const FIELD_CAPACITY: &str = "capacity";
const FIELD_TOTAL_COUNT: &str = "total";
const FIELD_COUNT: &str = "count";
const FIELD_SEQUENCE: &str = "seq";

const OPT_EXPAND_PATH: u8 = 1;
const OPT_INSECURE_TLS: u8 = 1 << 1;
const OPT_PROXY_RESPONSE: u8 = 1 << 2;

fn itob(value: u32) -> [u8; 4] {
    value.to_be_bytes()
}

fn btoi(bytes: Option<Vec<u8>>) -> u32 {
    match bytes {
        Some(b) if b.len() == 4 => u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
        _ => 0,
    }
}

fn to_opts(config: &BasketConfig) -> [u8; 1] {
    let mut opts = 0u8;
    if config.expand_path {
        opts |= OPT_EXPAND_PATH;
    }
    if config.insecure_tls {
        opts |= OPT_INSECURE_TLS;
    }
    if config.proxy_response {
        opts |= OPT_PROXY_RESPONSE;
    }
    [opts]
}

fn from_opts(opts: Option<Vec<u8>>, config: &mut BasketConfig) {
    let opts = opts.and_then(|b| b.first().copied()).unwrap_or(0);
    config.expand_path = opts & OPT_EXPAND_PATH != 0;
    config.insecure_tls = opts & OPT_INSECURE_TLS != 0;
    config.proxy_response = opts & OPT_PROXY_RESPONSE != 0;
}

fn name_key(name: &str) -> Vec<u8> {
    format!("n/{name}").into_bytes()
}

fn bucket_prefix(name: &str) -> Vec<u8> {
    format!("b/{name}/").into_bytes()
}

fn scalar_key(name: &str, field: &str) -> Vec<u8> {
    format!("b/{name}/{field}").into_bytes()
}

fn requests_prefix(name: &str) -> Vec<u8> {
    format!("b/{name}/r/").into_bytes()
}

fn request_key(name: &str, seq: u32) -> Vec<u8> {
    let mut key = requests_prefix(name);
    key.extend_from_slice(&itob(seq));
    key
}

fn response_key(name: &str, method: &str) -> Vec<u8> {
    format!("b/{name}/m/{method}").into_bytes()
}

/// First key lexicographically above every key carrying `prefix`.
fn prefix_successor(prefix: &[u8]) -> Vec<u8> {
    let mut bound = prefix.to_vec();
    if let Some(last) = bound.last_mut() {
        *last += 1;
    }
    bound
}

/// Basket handle; all state lives in the backend keyed by the basket name.
pub struct RocksBasket {
    db: Arc<TransactionDB>,
    name: String,
}

impl RocksBasket {
    fn get_scalar(&self, field: &str) -> Option<Vec<u8>> {
        match self.db.get(scalar_key(&self.name, field)) {
            Ok(value) => value,
            Err(e) => {
                error!("failed to read '{field}'; basket: {} - {e}", self.name);
                None
            }
        }
    }
}

impl Basket for RocksBasket {
    fn config(&self) -> BasketConfig {
        let mut config = BasketConfig::with_capacity(0);

        config.forward_url = self
            .get_scalar(FIELD_FORWARD_URL)
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default();
        config.capacity = btoi(self.get_scalar(FIELD_CAPACITY)) as usize;
        from_opts(self.get_scalar(FIELD_OPTIONS), &mut config);

        config
    }

    fn update(&self, config: BasketConfig) {
        let result: anyhow::Result<()> = (|| {
            let txn = self.db.transaction();
            let count = btoi(txn.get_for_update(scalar_key(&self.name, FIELD_COUNT), true)?);
            let capacity = config.capacity as u32;

            txn.put(
                scalar_key(&self.name, FIELD_FORWARD_URL),
                config.forward_url.as_bytes(),
            )?;
            txn.put(scalar_key(&self.name, FIELD_OPTIONS), to_opts(&config))?;
            txn.put(scalar_key(&self.name, FIELD_CAPACITY), itob(capacity))?;

            if count > capacity {
                // drop the oldest ring entries until the new capacity holds
                let mut excess = count - capacity;
                let prefix = requests_prefix(&self.name);
                for item in self
                    .db
                    .iterator(IteratorMode::From(&prefix, Direction::Forward))
                {
                    let (key, _) = item?;
                    if excess == 0 || !key.starts_with(&prefix) {
                        break;
                    }
                    txn.delete(key)?;
                    excess -= 1;
                }
                txn.put(scalar_key(&self.name, FIELD_COUNT), itob(capacity))?;
            }

            txn.commit()?;
            Ok(())
        })();

        if let Err(e) = result {
            error!("failed to update basket: {} - {e}", self.name);
        }
    }

    fn authorize(&self, token: &str) -> bool {
        match self.get_scalar(FIELD_TOKEN) {
            Some(stored) => secure_compare(token, &String::from_utf8_lossy(&stored)),
            None => false,
        }
    }

    fn get_response(&self, method: &str) -> Option<ResponseConfig> {
        let raw = match self.db.get(response_key(&self.name, method)) {
            Ok(value) => value?,
            Err(e) => {
                error!(
                    "failed to get response for HTTP {method} of basket: {} - {e}",
                    self.name
                );
                return None;
            }
        };

        match serde_json::from_slice(&raw) {
            Ok(response) => Some(response),
            Err(e) => {
                // a corrupted stored response falls back to the default
                error!(
                    "failed to parse response for HTTP {method} of basket: {} - {e}",
                    self.name
                );
                None
            }
        }
    }

    fn set_response(&self, method: &str, response: ResponseConfig) {
        let result: anyhow::Result<()> = (|| {
            let raw = serde_json::to_vec(&response)?;
            self.db.put(response_key(&self.name, method), raw)?;
            Ok(())
        })();

        if let Err(e) = result {
            error!(
                "failed to update response for HTTP {method} of basket: {} - {e}",
                self.name
            );
        }
    }

    fn add(&self, data: RequestData) -> RequestData {
        let result: anyhow::Result<()> = (|| {
            let txn = self.db.transaction();

            let capacity = btoi(txn.get_for_update(scalar_key(&self.name, FIELD_CAPACITY), true)?);
            let count = btoi(txn.get_for_update(scalar_key(&self.name, FIELD_COUNT), true)?);
            let total = btoi(txn.get_for_update(scalar_key(&self.name, FIELD_TOTAL_COUNT), true)?);
            let seq = btoi(txn.get_for_update(scalar_key(&self.name, FIELD_SEQUENCE), true)?) + 1;

            txn.put(request_key(&self.name, seq), serde_json::to_vec(&data)?)?;
            txn.put(scalar_key(&self.name, FIELD_SEQUENCE), itob(seq))?;
            txn.put(scalar_key(&self.name, FIELD_TOTAL_COUNT), itob(total + 1))?;

            if count < capacity {
                txn.put(scalar_key(&self.name, FIELD_COUNT), itob(count + 1))?;
            } else {
                // at capacity: do not grow the counter, evict the oldest entry
                let prefix = requests_prefix(&self.name);
                for item in self
                    .db
                    .iterator(IteratorMode::From(&prefix, Direction::Forward))
                {
                    let (key, _) = item?;
                    if key.starts_with(&prefix) {
                        txn.delete(key)?;
                    }
                    break;
                }

                if count > capacity {
                    warn!(
                        "number of requests: {count} exceeds capacity: {capacity}; basket: {}",
                        self.name
                    );
                }
            }

            txn.commit()?;
            Ok(())
        })();

        if let Err(e) = result {
            error!(
                "failed to collect incoming HTTP request in basket: {} - {e}",
                self.name
            );
        }

        data
    }

    fn clear(&self) {
        let result: anyhow::Result<()> = (|| {
            let txn = self.db.transaction();
            let prefix = requests_prefix(&self.name);
            for item in self
                .db
                .iterator(IteratorMode::From(&prefix, Direction::Forward))
            {
                let (key, _) = item?;
                if !key.starts_with(&prefix) {
                    break;
                }
                txn.delete(key)?;
            }
            // the ring empties, the total counter survives
            txn.put(scalar_key(&self.name, FIELD_COUNT), itob(0))?;
            txn.commit()?;
            Ok(())
        })();

        if let Err(e) = result {
            error!(
                "failed to delete collected requests in basket: {} - {e}",
                self.name
            );
        }
    }

    fn size(&self) -> usize {
        btoi(self.get_scalar(FIELD_COUNT)) as usize
    }

    fn get_requests(&self, max: usize, skip: usize) -> RequestsPage {
        let snapshot = self.db.snapshot();
        let read = |field: &str| match snapshot.get(scalar_key(&self.name, field)) {
            Ok(value) => value,
            Err(e) => {
                error!("failed to read '{field}'; basket: {} - {e}", self.name);
                None
            }
        };

        let mut page = RequestsPage {
            total_count: btoi(read(FIELD_TOTAL_COUNT)) as u64,
            count: btoi(read(FIELD_COUNT)) as usize,
            ..Default::default()
        };

        let prefix = requests_prefix(&self.name);
        let bound = prefix_successor(&prefix);
        let last = skip + max;
        let mut index = 0;
        for item in snapshot.iterator(IteratorMode::From(&bound, Direction::Reverse)) {
            let (key, value) = match item {
                Ok(entry) => entry,
                Err(e) => {
                    error!("failed to scan requests of basket: {} - {e}", self.name);
                    break;
                }
            };
            if !key.starts_with(&prefix) {
                break;
            }

            if index >= skip && index < last {
                match serde_json::from_slice(&value) {
                    Ok(request) => page.requests.push(request),
                    Err(e) => {
                        // skip the corrupted record, keep the page going
                        error!(
                            "failed to parse HTTP request data in basket: {} - {e}",
                            self.name
                        );
                    }
                }
            } else if index >= last {
                page.has_more = true;
                break;
            }
            index += 1;
        }

        page
    }

    fn find_requests(
        &self,
        query: &str,
        scope: &str,
        max: usize,
        skip: usize,
    ) -> RequestsQueryPage {
        let snapshot = self.db.snapshot();
        let mut page = RequestsQueryPage::default();

        let prefix = requests_prefix(&self.name);
        let bound = prefix_successor(&prefix);
        let mut skipped = 0;
        let mut iter = snapshot.iterator(IteratorMode::From(&bound, Direction::Reverse));
        while let Some(item) = iter.next() {
            let (key, value) = match item {
                Ok(entry) => entry,
                Err(e) => {
                    error!("failed to scan requests of basket: {} - {e}", self.name);
                    break;
                }
            };
            if !key.starts_with(&prefix) {
                break;
            }

            let request: RequestData = match serde_json::from_slice(&value) {
                Ok(request) => request,
                Err(e) => {
                    error!(
                        "failed to parse HTTP request data in basket: {} - {e}",
                        self.name
                    );
                    continue;
                }
            };

            if request.matches(query, scope) {
                if skipped < skip {
                    skipped += 1;
                } else {
                    page.requests.push(request);
                }
            }

            if page.requests.len() == max {
                // any subsequent record of any kind means more pages
                page.has_more = matches!(iter.next(), Some(Ok((key, _))) if key.starts_with(&prefix));
                break;
            }
        }

        page
    }
}

/// Baskets database backed by an embedded RocksDB instance.
pub struct RocksDatabase {
    db: Arc<TransactionDB>,
}

impl RocksDatabase {
    pub fn open(file: &Path) -> anyhow::Result<Self> {
        info!("using key-value database to store baskets");
        info!("key-value database location: {}", file.display());

        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = TransactionDB::open(&opts, &TransactionDBOptions::default(), file)?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl BasketsDatabase for RocksDatabase {
    fn create(&self, name: &str, config: BasketConfig) -> Result<BasketAuth, StoreError> {
        let token = generate_token().map_err(StoreError::Token)?;

        let result: anyhow::Result<bool> = (|| {
            let txn = self.db.transaction();
            if txn.get_for_update(name_key(name), true)?.is_some() {
                return Ok(false);
            }

            txn.put(name_key(name), b"")?;
            txn.put(scalar_key(name, FIELD_TOKEN), token.as_bytes())?;
            txn.put(
                scalar_key(name, FIELD_FORWARD_URL),
                config.forward_url.as_bytes(),
            )?;
            txn.put(scalar_key(name, FIELD_OPTIONS), to_opts(&config))?;
            txn.put(
                scalar_key(name, FIELD_CAPACITY),
                itob(config.capacity as u32),
            )?;
            txn.put(scalar_key(name, FIELD_TOTAL_COUNT), itob(0))?;
            txn.put(scalar_key(name, FIELD_COUNT), itob(0))?;
            txn.put(scalar_key(name, FIELD_SEQUENCE), itob(0))?;
            txn.commit()?;
            Ok(true)
        })();

        match result {
            Ok(true) => Ok(BasketAuth { token }),
            Ok(false) => Err(StoreError::NameConflict(name.to_string())),
            Err(e) => Err(StoreError::Backend(e)),
        }
    }

    fn get(&self, name: &str) -> Option<Arc<dyn Basket>> {
        match self.db.get(name_key(name)) {
            Ok(Some(_)) => Some(Arc::new(RocksBasket {
                db: Arc::clone(&self.db),
                name: name.to_string(),
            })),
            Ok(None) => {
                warn!("no basket found: {name}");
                None
            }
            Err(e) => {
                error!("failed to get basket: {name} - {e}");
                None
            }
        }
    }

    fn delete(&self, name: &str) {
        let result: anyhow::Result<()> = (|| {
            let txn = self.db.transaction();
            let prefix = bucket_prefix(name);
            for item in self
                .db
                .iterator(IteratorMode::From(&prefix, Direction::Forward))
            {
                let (key, _) = item?;
                if !key.starts_with(&prefix) {
                    break;
                }
                txn.delete(key)?;
            }
            txn.delete(name_key(name))?;
            txn.commit()?;
            Ok(())
        })();

        if let Err(e) = result {
            error!("failed to delete basket: {name} - {e}");
        }
    }

    fn size(&self) -> usize {
        let prefix = b"n/".to_vec();
        let mut size = 0;
        for item in self
            .db
            .iterator(IteratorMode::From(&prefix, Direction::Forward))
        {
            match item {
                Ok((key, _)) if key.starts_with(&prefix) => size += 1,
                _ => break,
            }
        }
        size
    }

    fn get_names(&self, max: usize, skip: usize) -> BasketNamesPage {
        let mut page = BasketNamesPage::default();
        let prefix = b"n/".to_vec();
        let last = skip + max;

        for item in self
            .db
            .iterator(IteratorMode::From(&prefix, Direction::Forward))
        {
            let (key, _) = match item {
                Ok(entry) => entry,
                Err(e) => {
                    error!("failed to scan basket names: {e}");
                    break;
                }
            };
            if !key.starts_with(&prefix) {
                break;
            }

            if page.count >= skip && page.count < last {
                page.names
                    .push(String::from_utf8_lossy(&key[prefix.len()..]).into_owned());
            } else if page.count >= last {
                // keep iterating, the count covers every basket
                page.has_more = true;
            }
            page.count += 1;
        }

        page
    }

    fn find_names(&self, query: &str, max: usize, skip: usize) -> BasketNamesQueryPage {
        let mut page = BasketNamesQueryPage::default();
        let prefix = b"n/".to_vec();
        let mut skipped = 0;

        let mut iter = self
            .db
            .iterator(IteratorMode::From(&prefix, Direction::Forward));
        while let Some(item) = iter.next() {
            let (key, _) = match item {
                Ok(entry) => entry,
                Err(e) => {
                    error!("failed to scan basket names: {e}");
                    break;
                }
            };
            if !key.starts_with(&prefix) {
                break;
            }

            let name = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            if name.contains(query) {
                if skipped < skip {
                    skipped += 1;
                } else {
                    page.names.push(name);
                }
            }

            if page.names.len() == max {
                page.has_more = matches!(iter.next(), Some(Ok((key, _))) if key.starts_with(&prefix));
                break;
            }
        }

        page
    }

    fn release(&self) {
        info!("closing key-value database");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testsuite;

    fn open_test_database(dir: &tempfile::TempDir) -> RocksDatabase {
        RocksDatabase::open(&dir.path().join("baskets.kv")).unwrap()
    }

    #[test]
    fn test_rocks_database_contract() {
        let dir = tempfile::tempdir().unwrap();
        testsuite::run_database_suite(&open_test_database(&dir));
    }

    #[test]
    fn test_rocks_basket_contract() {
        let dir = tempfile::tempdir().unwrap();
        testsuite::run_basket_suite(&open_test_database(&dir));
    }

    #[test]
    fn test_rocks_names_are_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_test_database(&dir);
        for name in ["zeta", "alpha", "mid"] {
            db.create(name, BasketConfig::with_capacity(5)).unwrap();
        }
        let page = db.get_names(10, 0);
        assert_eq!(page.names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_rocks_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("baskets.kv");

        let token = {
            let db = RocksDatabase::open(&path).unwrap();
            let auth = db
                .create("persistent", BasketConfig::with_capacity(7))
                .unwrap();
            db.get("persistent")
                .unwrap()
                .add(testsuite::test_request("kept"));
            auth.token
        };

        let db = RocksDatabase::open(&path).unwrap();
        let basket = db.get("persistent").expect("basket is expected");
        assert!(basket.authorize(&token));
        assert_eq!(basket.config().capacity, 7);
        assert_eq!(basket.size(), 1);
        assert_eq!(basket.get_requests(10, 0).requests[0].body, "kept");
    }

    #[test]
    fn test_opts_round_trip() {
        let mut config = BasketConfig::with_capacity(1);
        config.expand_path = true;
        config.proxy_response = true;

        let mut decoded = BasketConfig::with_capacity(1);
        from_opts(Some(to_opts(&config).to_vec()), &mut decoded);
        assert!(decoded.expand_path);
        assert!(!decoded.insecure_tls);
        assert!(decoded.proxy_response);

        from_opts(None, &mut decoded);
        assert!(!decoded.expand_path);
        assert!(!decoded.insecure_tls);
        assert!(!decoded.proxy_response);
    }
}
