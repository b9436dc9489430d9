use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::dispatch::DispatchConfig;

pub const SOCKET_NAME: &str = "editor-toolsd.sock";

/// Editor tooling backend: autocomplete, highlighting, editorconfig and
/// friends over a Content-Length framed JSON channel.
#[derive(Debug, Parser)]
#[command(name = "editor-toolsd", version)]
pub struct Args {
    /// Serve on a Unix socket instead of stdin/stdout. Without a value the
    /// socket is created in the user's runtime directory.
    #[arg(long, value_name = "PATH", num_args = 0..=1)]
    pub socket: Option<Option<PathBuf>>,

    /// Capacity of the inbound and outbound queues.
    #[arg(long, default_value_t = 256, value_parser = clap::value_parser!(u64).range(1..))]
    pub queue_capacity: u64,

    /// Deadline for a single feature call in milliseconds; 0 disables it.
    #[arg(long, default_value_t = 5000)]
    pub feature_timeout_ms: u64,

    /// Log filter directive, e.g. `debug` or `editor_toolsd=trace`.
    /// Falls back to `RUST_LOG`, then `info`.
    #[arg(long, value_name = "FILTER")]
    pub log_filter: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub queue_capacity: usize,
    pub dispatch: DispatchConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            dispatch: DispatchConfig::default(),
        }
    }
}

impl Args {
    pub fn server_config(&self) -> ServerConfig {
        let feature_timeout = match self.feature_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        ServerConfig {
            queue_capacity: usize::try_from(self.queue_capacity).unwrap_or(usize::MAX),
            dispatch: DispatchConfig { feature_timeout },
        }
    }

    /// `None` means stdio.
    pub fn socket_path(&self) -> Option<PathBuf> {
        match self.socket.as_ref()? {
            Some(path) => Some(path.clone()),
            None => {
                let dir = dirs::runtime_dir().unwrap_or_else(std::env::temp_dir);
                Some(dir.join(SOCKET_NAME))
            }
        }
    }
}
