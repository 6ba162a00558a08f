//! SQL storage backend on embedded SQLite.
//!
//! Statements are written with PostgreSQL-style `$n` placeholders and
//! rewritten to the `?n` form before execution, so the schema and queries
//! stay portable across dialects.

use parking_lot::Mutex;
use regex::Regex;
use rusqlite::{params, Connection, ErrorCode, OpenFlags};
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::{error, info, warn};

use super::{Basket, BasketsDatabase, StoreError};
use crate::basket::{
    BasketAuth, BasketConfig, BasketNamesPage, BasketNamesQueryPage, RequestData, RequestsPage,
    RequestsQueryPage, ResponseConfig,
};
use crate::token::{generate_token, secure_compare};

const SCHEMA_VERSION: i64 = 1;

/// DDL statements creating schema v1.
const SQL_SCHEMA: &[&str] = &[
    "CREATE TABLE rb_baskets (
        basket_name TEXT PRIMARY KEY,
        token TEXT NOT NULL,
        capacity INTEGER NOT NULL,
        forward_url TEXT NOT NULL,
        proxy_response INTEGER NOT NULL,
        insecure_tls INTEGER NOT NULL,
        expand_path INTEGER NOT NULL,
        requests_count INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE rb_responses (
        basket_name TEXT NOT NULL,
        http_method TEXT NOT NULL,
        response TEXT NOT NULL,
        PRIMARY KEY (basket_name, http_method),
        FOREIGN KEY (basket_name) REFERENCES rb_baskets (basket_name) ON DELETE CASCADE
    )",
    "CREATE TABLE rb_requests (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        basket_name TEXT NOT NULL,
        request TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        FOREIGN KEY (basket_name) REFERENCES rb_baskets (basket_name) ON DELETE CASCADE
    )",
    "CREATE INDEX rb_requests_name_time_index ON rb_requests (basket_name, created_at)",
    "CREATE TABLE rb_version (version INTEGER NOT NULL)",
    "INSERT INTO rb_version (version) VALUES (1)",
];

static PLACEHOLDER_REGEX: OnceLock<Regex> = OnceLock::new();

/// Rewrites `$n` placeholders into the SQLite `?n` form.
fn unify_sql(sql: &str) -> String {
    PLACEHOLDER_REGEX
        .get_or_init(|| Regex::new(r"\$(\d+)").expect("invalid placeholder pattern"))
        .replace_all(sql, "?$1")
        .into_owned()
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn get_int(conn: &Connection, sql: &str, name: &str, default: i64) -> i64 {
    match conn.query_row(&unify_sql(sql), params![name], |row| row.get(0)) {
        Ok(value) => value,
        Err(e) => {
            error!("failed to get counter info about basket: {name} - {e}");
            default
        }
    }
}

/// Removes the oldest requests of a basket until `capacity` holds.
fn apply_limit(conn: &Connection, name: &str, capacity: usize) -> rusqlite::Result<()> {
    let size: i64 = conn.query_row(
        &unify_sql("SELECT COUNT(*) FROM rb_requests WHERE basket_name = $1"),
        params![name],
        |row| row.get(0),
    )?;

    if size > capacity as i64 {
        conn.execute(
            &unify_sql(
                "DELETE FROM rb_requests WHERE id IN (
                    SELECT id FROM rb_requests WHERE basket_name = $1
                    ORDER BY created_at, id LIMIT $2)",
            ),
            params![name, size - capacity as i64],
        )?;
    }

    Ok(())
}

/// Basket handle; all state lives in the backend keyed by the basket name.
pub struct SqliteBasket {
    conn: Arc<Mutex<Connection>>,
    name: String,
}

impl Basket for SqliteBasket {
    fn config(&self) -> BasketConfig {
        let conn = self.conn.lock();
        let result = conn.query_row(
            &unify_sql(
                "SELECT capacity, forward_url, proxy_response, insecure_tls, expand_path
                 FROM rb_baskets WHERE basket_name = $1",
            ),
            params![self.name],
            |row| {
                Ok(BasketConfig {
                    capacity: row.get::<_, i64>(0)? as usize,
                    forward_url: row.get(1)?,
                    proxy_response: row.get(2)?,
                    insecure_tls: row.get(3)?,
                    expand_path: row.get(4)?,
                })
            },
        );

        match result {
            Ok(config) => config,
            Err(e) => {
                error!("failed to get basket config: {} - {e}", self.name);
                BasketConfig::with_capacity(0)
            }
        }
    }

    fn update(&self, config: BasketConfig) {
        let mut conn = self.conn.lock();
        let result: anyhow::Result<()> = (|| {
            let tx = conn.transaction()?;
            tx.execute(
                &unify_sql(
                    "UPDATE rb_baskets SET capacity = $1, forward_url = $2, proxy_response = $3,
                     insecure_tls = $4, expand_path = $5 WHERE basket_name = $6",
                ),
                params![
                    config.capacity as i64,
                    config.forward_url,
                    config.proxy_response,
                    config.insecure_tls,
                    config.expand_path,
                    self.name
                ],
            )?;
            apply_limit(&tx, &self.name, config.capacity)?;
            tx.commit()?;
            Ok(())
        })();

        if let Err(e) = result {
            error!("failed to update basket config: {} - {e}", self.name);
        }
    }

    fn authorize(&self, token: &str) -> bool {
        let conn = self.conn.lock();
        let stored: rusqlite::Result<String> = conn.query_row(
            &unify_sql("SELECT token FROM rb_baskets WHERE basket_name = $1"),
            params![self.name],
            |row| row.get(0),
        );

        match stored {
            Ok(stored) => secure_compare(token, &stored),
            Err(e) => {
                error!("failed to authorize access to basket: {} - {e}", self.name);
                false
            }
        }
    }

    fn get_response(&self, method: &str) -> Option<ResponseConfig> {
        let conn = self.conn.lock();
        let raw: rusqlite::Result<String> = conn.query_row(
            &unify_sql(
                "SELECT response FROM rb_responses WHERE basket_name = $1 AND http_method = $2",
            ),
            params![self.name, method],
            |row| row.get(0),
        );

        match raw {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(response) => Some(response),
                Err(e) => {
                    error!(
                        "failed to parse response for HTTP {method} of basket: {} - {e}",
                        self.name
                    );
                    None
                }
            },
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => {
                error!(
                    "failed to get response for HTTP {method} of basket: {} - {e}",
                    self.name
                );
                None
            }
        }
    }

    fn set_response(&self, method: &str, response: ResponseConfig) {
        let conn = self.conn.lock();
        let result: anyhow::Result<()> = (|| {
            let raw = serde_json::to_string(&response)?;
            conn.execute(
                &unify_sql(
                    "INSERT INTO rb_responses (basket_name, http_method, response)
                     VALUES ($1, $2, $3)
                     ON CONFLICT (basket_name, http_method) DO UPDATE SET response = $3",
                ),
                params![self.name, method, raw],
            )?;
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
        let mut conn = self.conn.lock();
        let result: anyhow::Result<()> = (|| {
            let raw = serde_json::to_string(&data)?;
            let tx = conn.transaction()?;
            tx.execute(
                &unify_sql(
                    "INSERT INTO rb_requests (basket_name, request, created_at) VALUES ($1, $2, $3)",
                ),
                params![self.name, raw, now_millis()],
            )?;
            tx.execute(
                &unify_sql(
                    "UPDATE rb_baskets SET requests_count = requests_count + 1 WHERE basket_name = $1",
                ),
                params![self.name],
            )?;
            let capacity = get_int(
                &tx,
                "SELECT capacity FROM rb_baskets WHERE basket_name = $1",
                &self.name,
                0,
            );
            apply_limit(&tx, &self.name, capacity as usize)?;
            tx.commit()?;
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
        let conn = self.conn.lock();
        // the total counter in rb_baskets is untouched
        if let Err(e) = conn.execute(
            &unify_sql("DELETE FROM rb_requests WHERE basket_name = $1"),
            params![self.name],
        ) {
            error!(
                "failed to delete collected requests in basket: {} - {e}",
                self.name
            );
        }
    }

    fn size(&self) -> usize {
        let conn = self.conn.lock();
        get_int(
            &conn,
            "SELECT COUNT(*) FROM rb_requests WHERE basket_name = $1",
            &self.name,
            0,
        ) as usize
    }

    fn get_requests(&self, max: usize, skip: usize) -> RequestsPage {
        let conn = self.conn.lock();
        let mut page = RequestsPage {
            count: get_int(
                &conn,
                "SELECT COUNT(*) FROM rb_requests WHERE basket_name = $1",
                &self.name,
                0,
            ) as usize,
            total_count: get_int(
                &conn,
                "SELECT requests_count FROM rb_baskets WHERE basket_name = $1",
                &self.name,
                0,
            ) as u64,
            ..Default::default()
        };

        if max == 0 {
            page.has_more = page.count > skip;
            return page;
        }

        let result: anyhow::Result<()> = (|| {
            let mut stmt = conn.prepare(&unify_sql(
                "SELECT request FROM rb_requests WHERE basket_name = $1
                 ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3",
            ))?;
            let mut rows = stmt.query(params![
                self.name,
                (max + 1) as i64,
                skip as i64
            ])?;

            while page.requests.len() < max {
                let Some(row) = rows.next()? else {
                    return Ok(());
                };
                let raw: String = row.get(0)?;
                match serde_json::from_str(&raw) {
                    Ok(request) => page.requests.push(request),
                    Err(e) => {
                        error!(
                            "failed to parse HTTP request data in basket: {} - {e}",
                            self.name
                        );
                    }
                }
            }
            page.has_more = rows.next()?.is_some();
            Ok(())
        })();

        if let Err(e) = result {
            error!("failed to get requests of basket: {} - {e}", self.name);
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
        let conn = self.conn.lock();
        let mut page = RequestsQueryPage::default();
        if max == 0 {
            page.has_more = true;
            return page;
        }

        let result: anyhow::Result<()> = (|| {
            let mut stmt = conn.prepare(&unify_sql(
                "SELECT request FROM rb_requests WHERE basket_name = $1
                 ORDER BY created_at DESC, id DESC",
            ))?;
            let mut rows = stmt.query(params![self.name])?;

            let mut skipped = 0;
            while page.requests.len() < max {
                let Some(row) = rows.next()? else {
                    return Ok(());
                };
                let raw: String = row.get(0)?;
                let request: RequestData = match serde_json::from_str(&raw) {
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
            }
            page.has_more = rows.next()?.is_some();
            Ok(())
        })();

        if let Err(e) = result {
            error!("failed to find requests of basket: {} - {e}", self.name);
        }

        page
    }
}

/// Baskets database backed by an embedded SQLite file.
pub struct SqliteDatabase {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDatabase {
    /// Opens (and bootstraps if needed) the database at `file`.
    pub fn open(file: &Path) -> anyhow::Result<Self> {
        info!("using SQL database to store baskets");
        info!("SQL database location: {}", file.display());

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(file, flags)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens a database from a `driver://location` connection string.
    pub fn open_connection(connection: &str) -> anyhow::Result<Self> {
        match connection.split_once("://") {
            Some(("sqlite", source)) | Some(("sqlite3", source)) => Self::open(Path::new(source)),
            Some((driver, _)) => anyhow::bail!("unsupported SQL driver: {driver}"),
            None => Self::open(Path::new(connection)),
        }
    }
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    match get_schema_version(conn) {
        0 => create_schema(conn),
        SCHEMA_VERSION => {
            info!("database schema already exists, version: {SCHEMA_VERSION}");
            Ok(())
        }
        version => anyhow::bail!("unknown database schema version: {version}"),
    }
}

fn get_schema_version(conn: &Connection) -> i64 {
    conn.query_row("SELECT version FROM rb_version", [], |row| row.get(0))
        .unwrap_or(0)
}

fn create_schema(conn: &Connection) -> anyhow::Result<()> {
    info!("creating database schema");
    for (idx, stmt) in SQL_SCHEMA.iter().enumerate() {
        conn.execute(stmt, [])
            .map_err(|e| anyhow::anyhow!("error in SQL statement #{idx} - {e}"))?;
    }
    info!("database is created, version: {}", get_schema_version(conn));
    Ok(())
}

impl BasketsDatabase for SqliteDatabase {
    fn create(&self, name: &str, config: BasketConfig) -> Result<BasketAuth, StoreError> {
        let token = generate_token().map_err(StoreError::Token)?;

        let conn = self.conn.lock();
        let result = conn.execute(
            &unify_sql(
                "INSERT INTO rb_baskets
                 (basket_name, token, capacity, forward_url, proxy_response, insecure_tls, expand_path, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            ),
            params![
                name,
                token,
                config.capacity as i64,
                config.forward_url,
                config.proxy_response,
                config.insecure_tls,
                config.expand_path,
                now_millis()
            ],
        );

        match result {
            Ok(_) => Ok(BasketAuth { token }),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                Err(StoreError::NameConflict(name.to_string()))
            }
            Err(e) => Err(StoreError::Backend(anyhow::anyhow!(
                "failed to create basket: {name} - {e}"
            ))),
        }
    }

    fn get(&self, name: &str) -> Option<Arc<dyn Basket>> {
        let conn = self.conn.lock();
        let found: rusqlite::Result<String> = conn.query_row(
            &unify_sql("SELECT basket_name FROM rb_baskets WHERE basket_name = $1"),
            params![name],
            |row| row.get(0),
        );
        drop(conn);

        match found {
            Ok(_) => Some(Arc::new(SqliteBasket {
                conn: Arc::clone(&self.conn),
                name: name.to_string(),
            })),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
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
        let conn = self.conn.lock();
        if let Err(e) = conn.execute(
            &unify_sql("DELETE FROM rb_baskets WHERE basket_name = $1"),
            params![name],
        ) {
            error!("failed to delete basket: {name} - {e}");
        }
    }

    fn size(&self) -> usize {
        let conn = self.conn.lock();
        match conn.query_row("SELECT COUNT(*) FROM rb_baskets", [], |row| {
            row.get::<_, i64>(0)
        }) {
            Ok(size) => size as usize,
            Err(e) => {
                error!("failed to get the total number of baskets: {e}");
                0
            }
        }
    }

    fn get_names(&self, max: usize, skip: usize) -> BasketNamesPage {
        let count = self.size();
        let conn = self.conn.lock();
        let mut page = BasketNamesPage {
            count,
            ..Default::default()
        };

        let result: anyhow::Result<()> = (|| {
            let mut stmt = conn.prepare(&unify_sql(
                "SELECT basket_name FROM rb_baskets ORDER BY basket_name LIMIT $1 OFFSET $2",
            ))?;
            let mut rows = stmt.query(params![(max + 1) as i64, skip as i64])?;

            while page.names.len() < max {
                let Some(row) = rows.next()? else {
                    return Ok(());
                };
                page.names.push(row.get(0)?);
            }
            page.has_more = rows.next()?.is_some();
            Ok(())
        })();

        if let Err(e) = result {
            error!("failed to get basket names: {e}");
        }

        page
    }

    fn find_names(&self, query: &str, max: usize, skip: usize) -> BasketNamesQueryPage {
        let conn = self.conn.lock();
        let mut page = BasketNamesQueryPage::default();

        let result: anyhow::Result<()> = (|| {
            let mut stmt = conn.prepare(&unify_sql(
                "SELECT basket_name FROM rb_baskets WHERE basket_name LIKE $1
                 ORDER BY basket_name LIMIT $2 OFFSET $3",
            ))?;
            let pattern = format!("%{query}%");
            let mut rows = stmt.query(params![pattern, (max + 1) as i64, skip as i64])?;

            while page.names.len() < max {
                let Some(row) = rows.next()? else {
                    return Ok(());
                };
                page.names.push(row.get(0)?);
            }
            page.has_more = rows.next()?.is_some();
            Ok(())
        })();

        if let Err(e) = result {
            error!("failed to find basket names: {e}");
        }

        page
    }

    fn release(&self) {
        info!("closing SQL database, releasing any open resources");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testsuite;

    fn open_test_database(dir: &tempfile::TempDir) -> SqliteDatabase {
        SqliteDatabase::open(&dir.path().join("baskets.db")).unwrap()
    }

    #[test]
    fn test_sqlite_database_contract() {
        let dir = tempfile::tempdir().unwrap();
        testsuite::run_database_suite(&open_test_database(&dir));
    }

    #[test]
    fn test_sqlite_basket_contract() {
        let dir = tempfile::tempdir().unwrap();
        testsuite::run_basket_suite(&open_test_database(&dir));
    }

    #[test]
    fn test_sqlite_names_are_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_test_database(&dir);
        for name in ["zeta", "alpha", "mid"] {
            db.create(name, BasketConfig::with_capacity(5)).unwrap();
        }
        let page = db.get_names(10, 0);
        assert_eq!(page.names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_sqlite_delete_cascades() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_test_database(&dir);
        db.create("gone", BasketConfig::with_capacity(5)).unwrap();

        let basket = db.get("gone").unwrap();
        basket.add(testsuite::test_request("payload"));
        basket.set_response("GET", ResponseConfig::default());
        db.delete("gone");

        let conn = db.conn.lock();
        let requests: i64 = conn
            .query_row("SELECT COUNT(*) FROM rb_requests", [], |row| row.get(0))
            .unwrap();
        let responses: i64 = conn
            .query_row("SELECT COUNT(*) FROM rb_responses", [], |row| row.get(0))
            .unwrap();
        assert_eq!(requests, 0);
        assert_eq!(responses, 0);
    }

    #[test]
    fn test_unify_sql() {
        assert_eq!(
            unify_sql("SELECT x FROM t WHERE a = $1 AND b = $2"),
            "SELECT x FROM t WHERE a = ?1 AND b = ?2"
        );
        assert_eq!(unify_sql("no placeholders"), "no placeholders");
    }

    #[test]
    fn test_open_connection_strings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conn.db");
        let conn = format!("sqlite://{}", path.display());
        assert!(SqliteDatabase::open_connection(&conn).is_ok());
        assert!(SqliteDatabase::open_connection("postgres://localhost/rb").is_err());
    }
}
