//! Server configuration

pub mod cli;

use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {arg}: {value}")]
    InvalidValue { arg: String, value: String },

    #[error("Missing value for argument: {0}")]
    MissingValue(String),

    #[error("Unknown argument: {0}")]
    UnknownArgument(String),
}

/// Address of the master this server replicates from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterAddr {
    pub host: String,
    pub port: u16,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind to
    pub bind_addr: String,

    /// Port to listen on
    pub port: u16,

    /// Master to replicate from; None means this server is a master
    pub replicaof: Option<MasterAddr>,

    /// Directory holding the snapshot file
    pub dir: String,

    /// Snapshot file name
    pub dbfilename: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind_addr: "127.0.0.1".to_string(),
            port: 6379,
            replicaof: None,
            dir: ".".to_string(),
            dbfilename: "dump.rdb".to_string(),
        }
    }
}

impl Config {
    pub fn is_replica(&self) -> bool {
        self.replicaof.is_some()
    }

    /// Path of the snapshot file
    pub fn snapshot_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.dir).join(&self.dbfilename)
    }
}
