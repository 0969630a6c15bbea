use std::{fmt, path::PathBuf, str::FromStr, sync::Arc};

use async_trait::async_trait;
use snafu::{Backtrace, Snafu};

use crate::{
    io::{directory::DirectoryConnector, tcp::TcpConnector},
    models::block::Block,
};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SinkError {
    /// Could not establish the connection to the store.
    #[snafu(display("Failed to connect to {address}: {source}"))]
    Connect {
        address: String,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// Connection attempt did not finish in time.
    #[snafu(display("Timed out connecting to {address}"))]
    ConnectTimeout {
        address: String,
        backtrace: Backtrace,
    },

    /// An error occurred while trying to write the block.
    #[snafu(display("Failed to write block: {source}"))]
    Write {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// The sink address could not be parsed.
    #[snafu(display("Invalid sink address {address:?}: {message}"))]
    InvalidAddress {
        address: String,
        message: String,
        backtrace: Backtrace,
    },
}

/// An open connection to one downstream time-series store.
#[async_trait]
pub trait DataSink: Send {
    /// Deliver one block.
    async fn write(&mut self, block: &Block) -> Result<(), SinkError>;

    /// Flush and release the connection.
    async fn close(&mut self) -> Result<(), SinkError>;
}

/// Opens fresh [`DataSink`] connections on demand.
#[async_trait]
pub trait SinkConnector: Send + Sync {
    /// Open a new connection.
    async fn open(&self) -> Result<Box<dyn DataSink>, SinkError>;

    /// Human-readable target, for logs.
    fn describe(&self) -> String;
}

/// Where a sink lives: `tcp://host:port` or `file:///some/dir` (a bare path
/// is treated as a directory).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkAddress {
    /// Framed TCP ingest port.
    Tcp(String),
    /// Local directory, one file per block.
    Directory(PathBuf),
}

impl SinkAddress {
    /// Build the connector for this address.
    pub fn connector(&self) -> Arc<dyn SinkConnector> {
        match self {
            SinkAddress::Tcp(addr) => Arc::new(TcpConnector::new(addr.clone())),
            SinkAddress::Directory(dir) => Arc::new(DirectoryConnector::new(dir.clone())),
        }
    }
}

impl FromStr for SinkAddress {
    type Err = SinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(rest) = s.strip_prefix("tcp://") {
            let valid = rest
                .rsplit_once(':')
                .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok());
            if !valid {
                return InvalidAddressSnafu {
                    address: s,
                    message: "expected tcp://host:port",
                }
                .fail();
            }
            return Ok(SinkAddress::Tcp(rest.to_string()));
        }
        let path = s.strip_prefix("file://").unwrap_or(s);
        if path.is_empty() {
            return InvalidAddressSnafu {
                address: s,
                message: "empty path",
            }
            .fail();
        }
        Ok(SinkAddress::Directory(PathBuf::from(path)))
    }
}

impl fmt::Display for SinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkAddress::Tcp(addr) => write!(f, "tcp://{addr}"),
            SinkAddress::Directory(dir) => write!(f, "file://{}", dir.display()),
        }
    }
}
