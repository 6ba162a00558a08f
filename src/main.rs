use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use reqbin::config::{self, ServerConfig};
use reqbin::server::{self, AppContext};
use reqbin::storage;

#[derive(Parser, Debug)]
#[command(name = "reqbin", about = "HTTP request capture and inspection service")]
struct Args {
    /// HTTP service port
    #[arg(short, long, default_value_t = config::DEFAULT_PORT)]
    port: u16,
    /// HTTP listen address
    #[arg(short, long, default_value = config::DEFAULT_ADDR)]
    listen: String,
    /// Initial basket capacity
    #[arg(long, default_value_t = config::INIT_BASKET_CAPACITY)]
    size: usize,
    /// Maximum allowed basket capacity
    #[arg(long, default_value_t = config::MAX_BASKET_CAPACITY)]
    maxsize: usize,
    /// Default page size
    #[arg(long, default_value_t = config::DEFAULT_PAGE_SIZE)]
    page: usize,
    /// Master token; a random one is generated if not provided
    #[arg(long, default_value = "")]
    token: String,
    /// Baskets storage type: mem, kv or sql
    #[arg(long, default_value = "mem")]
    db: String,
    /// Database location, for the kv and sql backends
    #[arg(long, default_value = "./baskets.db")]
    file: PathBuf,
    /// Connection string for SQL databases; "file" is used when undefined
    #[arg(long, default_value = "")]
    conn: String,
    /// Name of a basket to auto-create during startup (repeatable)
    #[arg(long = "basket")]
    baskets: Vec<String>,
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let mut config = ServerConfig {
        listen_addr: args.listen,
        listen_port: args.port,
        init_capacity: args.size,
        max_capacity: args.maxsize,
        page_size: args.page,
        master_token: args.token,
        db_kind: args.db,
        db_file: args.file,
        db_connection: args.conn,
        baskets: args.baskets,
    };
    if let Err(e) = config.ensure_master_token() {
        error!("failed to generate master token: {e}");
        return;
    }

    let Some(db) = storage::create_baskets_database(
        &config.db_kind,
        &config.db_file,
        &config.db_connection,
    ) else {
        error!("failed to create basket database");
        return;
    };

    let ctx = Arc::new(AppContext::new(config, Arc::clone(&db)));
    let handle = match server::start(Arc::clone(&ctx)).await {
        Ok(handle) => handle,
        Err(e) => {
            error!("failed to start server: {e}");
            db.release();
            return;
        }
    };

    tokio::signal::ctrl_c().await.ok();
    info!("received shutdown signal, shutting down database");
    handle.shutdown();
    db.release();
}
