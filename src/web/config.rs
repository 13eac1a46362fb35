//! Configuration types and constants for the devconnect-web server.

use std::path::PathBuf;

use clap::Parser;

pub(crate) const MAX_WS_CONNECTIONS: usize = 64;
/// Default page size for `GET /api/notifications`.
pub(crate) const DEFAULT_NOTIFICATION_LIMIT: u32 = 50;
pub(crate) const MAX_NOTIFICATION_LIMIT: u32 = 200;
/// Header carrying the caller's user id.
pub(crate) const USER_ID_HEADER: &str = "x-user-id";

/// DevConnect backend: server functions, REST API and live change feed.
///
/// Configuration can be set via CLI arguments or environment variables.
/// CLI arguments take precedence over environment variables.
#[derive(Parser, Debug)]
#[command(name = "devconnect-web", version, about)]
pub struct Cli {
    /// HTTP server bind address [env: DEVCONNECT_BIND] [default: 127.0.0.1:3000]
    #[arg(long, short = 'b')]
    pub bind: Option<String>,

    /// Data directory for the database [env: DEVCONNECT_HOME] [default: ~/.devconnect]
    #[arg(long, short = 'd')]
    pub data_dir: Option<PathBuf>,

    /// Explicit database file, overrides the data directory [env: DEVCONNECT_DB]
    #[arg(long)]
    pub db: Option<PathBuf>,
}

pub struct Config {
    pub bind_addr: String,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
}

impl Config {
    pub fn from_cli_and_env(cli: Cli) -> Self {
        let data_dir = cli
            .data_dir
            .or_else(|| std::env::var("DEVCONNECT_HOME").ok().map(PathBuf::from))
            .unwrap_or_else(|| {
                std::env::var("HOME")
                    .map(|h| PathBuf::from(h).join(".devconnect"))
                    .unwrap_or_else(|_| PathBuf::from(".devconnect"))
            });

        let bind_addr = cli
            .bind
            .or_else(|| std::env::var("DEVCONNECT_BIND").ok())
            .unwrap_or_else(|| "127.0.0.1:3000".to_string());

        let db_path = cli
            .db
            .or_else(|| std::env::var("DEVCONNECT_DB").ok().map(PathBuf::from))
            .unwrap_or_else(|| crate::storage::db_path(&data_dir));

        Self {
            bind_addr,
            data_dir,
            db_path,
        }
    }
}
