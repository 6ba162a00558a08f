//! Service configuration and shared constants.

use regex::{Regex, RegexBuilder};
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::info;

use crate::token::generate_token;

/// Default HTTP listen port.
pub const DEFAULT_PORT: u16 = 55555;
/// Default HTTP listen address.
pub const DEFAULT_ADDR: &str = "127.0.0.1";
/// Default page size for listings.
pub const DEFAULT_PAGE_SIZE: usize = 20;
/// Capacity assigned to baskets created without an explicit one.
pub const INIT_BASKET_CAPACITY: usize = 200;
/// Upper bound for any basket capacity.
pub const MAX_BASKET_CAPACITY: usize = 2000;

/// Root path segment of the management API; reserved as a basket name.
pub const API_ROOT: &str = "api";
/// Root path segment of the web UI; reserved as a basket name.
pub const UI_ROOT: &str = "web";

const BASKET_NAME_PATTERN: &str = r"^[\w\d\-_\.]{1,250}$";

static BASKET_NAME_REGEX: OnceLock<Regex> = OnceLock::new();

/// Pattern a basket name must match.
pub fn basket_name_pattern() -> &'static str {
    BASKET_NAME_PATTERN
}

/// Checks whether `name` is a syntactically valid basket name.
///
/// Reserved names (`api`, `web`) satisfy the pattern; callers must check
/// [`is_reserved_name`] first.
pub fn is_valid_basket_name(name: &str) -> bool {
    BASKET_NAME_REGEX
        .get_or_init(|| {
            RegexBuilder::new(BASKET_NAME_PATTERN)
                .size_limit(50 * (1 << 20))
                .build()
                .expect("invalid basket name pattern")
        })
        .is_match(name)
}

/// Checks whether `name` clashes with one of the service path roots.
pub fn is_reserved_name(name: &str) -> bool {
    name == API_ROOT || name == UI_ROOT
}

/// Server configuration assembled from command line arguments.
///
/// Handlers receive this through an explicit context rather than globals, so
/// tests can inject a fresh configuration per case.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub listen_port: u16,
    pub init_capacity: usize,
    pub max_capacity: usize,
    pub page_size: usize,
    pub master_token: String,
    pub db_kind: String,
    pub db_file: PathBuf,
    pub db_connection: String,
    /// Baskets to auto-create during startup.
    pub baskets: Vec<String>,
}

impl ServerConfig {
    /// Fills in a generated master token when none was supplied.
    ///
    /// The generated token is logged exactly once; it is never recoverable
    /// afterwards.
    pub fn ensure_master_token(&mut self) -> anyhow::Result<()> {
        if self.master_token.is_empty() {
            self.master_token = generate_token()?;
            info!("generated master token: {}", self.master_token);
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_ADDR.to_string(),
            listen_port: DEFAULT_PORT,
            init_capacity: INIT_BASKET_CAPACITY,
            max_capacity: MAX_BASKET_CAPACITY,
            page_size: DEFAULT_PAGE_SIZE,
            master_token: String::new(),
            db_kind: "mem".to_string(),
            db_file: PathBuf::from("./baskets.db"),
            db_connection: String::new(),
            baskets: Vec::new(),
        }
    }
}
