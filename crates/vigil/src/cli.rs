use clap::Parser;

use vigil_core::types::Profile;

/// Shared validator for numeric flags that are meaningless at zero
/// (pool sizing, batch sizing, rate limits).
fn at_least_one<T>(s: &str) -> Result<T, String>
where
    T: std::str::FromStr + PartialOrd + From<u8>,
    T::Err: std::fmt::Display,
{
    match s.parse::<T>() {
        Ok(n) if n >= T::from(1) => Ok(n),
        Ok(_) => Err(format!("expected 1 or greater, got {s}")),
        Err(e) => Err(e.to_string()),
    }
}

/// Vigil — live Bitcoin mempool tracker with a WebSocket count feed.
#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    /// Bitcoin Core RPC endpoint (HTTP URL).
    #[arg(
        long,
        default_value = "http://127.0.0.1:8332",
        env = "VIGIL_CONNECTION",
        help_heading = "RPC"
    )]
    pub connection: String,

    /// RPC username (optional; pair with --rpc-pass).
    #[arg(long, env = "VIGIL_RPC_USER", help_heading = "RPC")]
    pub rpc_user: Option<String>,

    /// RPC password (optional; pair with --rpc-user).
    #[arg(long, env = "VIGIL_RPC_PASS", help_heading = "RPC")]
    pub rpc_pass: Option<String>,

    /// RPC cookie file with `username:password` for local node auth.
    #[arg(long, env = "VIGIL_RPC_COOKIE_FILE", help_heading = "RPC")]
    pub rpc_cookie_file: Option<std::path::PathBuf>,

    /// Optional RPC request rate limit in requests/second (must be >= 1).
    #[arg(
        long,
        env = "VIGIL_RPC_REQUESTS_PER_SECOND",
        value_parser = at_least_one::<u32>,
        help_heading = "RPC"
    )]
    pub rpc_requests_per_second: Option<u32>,

    /// Maximum number of RPC calls per JSON-RPC batch chunk (must be >= 1).
    #[arg(
        long,
        env = "VIGIL_RPC_BATCH_CHUNK_SIZE",
        default_value = "25",
        value_parser = at_least_one::<usize>,
        help_heading = "RPC"
    )]
    pub rpc_batch_chunk_size: usize,

    /// Number of HTTP clients to rotate RPC requests across (must be >= 1).
    #[arg(
        long,
        default_value = "1",
        value_parser = at_least_one::<usize>,
        help_heading = "RPC"
    )]
    pub rpc_pool_count: usize,

    /// Maximum idle connections kept per HTTP client (must be >= 1).
    #[arg(
        long,
        default_value = "16",
        value_parser = at_least_one::<usize>,
        help_heading = "RPC"
    )]
    pub rpc_pool_size: usize,

    /// ZMQ endpoint publishing `sequence` notifications.
    #[arg(
        long,
        default_value = "tcp://127.0.0.1:28332",
        env = "VIGIL_ZMQ_SEQUENCE",
        help_heading = "Streams"
    )]
    pub zmq_sequence: String,

    /// ZMQ endpoint publishing `rawtx` notifications.
    #[arg(
        long,
        default_value = "tcp://127.0.0.1:28333",
        env = "VIGIL_ZMQ_RAWTX",
        help_heading = "Streams"
    )]
    pub zmq_rawtx: String,

    /// ZMQ endpoint publishing `rawblock` notifications.
    #[arg(
        long,
        default_value = "tcp://127.0.0.1:28334",
        env = "VIGIL_ZMQ_RAWBLOCK",
        help_heading = "Streams"
    )]
    pub zmq_rawblock: String,

    /// Target profile. `public` additionally maintains the spend index.
    #[arg(long, value_enum, default_value = "personal", help_heading = "Tracker")]
    pub profile: ProfileArg,

    /// Seconds between periodic resyncs against the node's mempool
    /// (0 disables resyncs after the initial load).
    #[arg(long, default_value = "60", help_heading = "Tracker")]
    pub resync_interval_secs: u64,

    /// Default log filter when RUST_LOG is not set.
    #[arg(long, default_value = "info", env = "VIGIL_LOG_LEVEL", help_heading = "Logging")]
    pub log_level: String,

    /// Address to bind the query/WebSocket server to.
    #[arg(long, default_value = "127.0.0.1", help_heading = "Server")]
    pub bind: String,

    /// Port to listen on.
    #[arg(long, default_value = "3090", help_heading = "Server")]
    pub port: u16,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum ProfileArg {
    Personal,
    Public,
}

impl From<ProfileArg> for Profile {
    fn from(arg: ProfileArg) -> Self {
        match arg {
            ProfileArg::Personal => Profile::Personal,
            ProfileArg::Public => Profile::Public,
        }
    }
}
