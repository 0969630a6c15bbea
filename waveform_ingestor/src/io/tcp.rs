//! Framed TCP sink.
//!
//! Each block is sent as one ASCII header line followed by the raw payload:
//!
//! ```text
//! <fixed-width channel> <start RFC3339 ms> <duration ms> <payload length>\n<payload>
//! ```

use std::time::Duration;

use async_trait::async_trait;
use snafu::ResultExt;
use tokio::{
    io::{AsyncWriteExt, BufWriter},
    net::TcpStream,
};

use crate::{
    io::sink::{ConnectSnafu, ConnectTimeoutSnafu, DataSink, SinkConnector, SinkError, WriteSnafu},
    models::block::Block,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens [`TcpSink`] connections to `host:port`.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
}

impl TcpConnector {
    pub fn new(address: String) -> Self {
        Self { address }
    }
}

#[async_trait]
impl SinkConnector for TcpConnector {
    async fn open(&self) -> Result<Box<dyn DataSink>, SinkError> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.address))
            .await
            .map_err(|_| {
                ConnectTimeoutSnafu {
                    address: self.address.clone(),
                }
                .build()
            })?
            .context(ConnectSnafu {
                address: self.address.clone(),
            })?;
        stream.set_nodelay(true).context(ConnectSnafu {
            address: self.address.clone(),
        })?;
        Ok(Box::new(TcpSink {
            stream: BufWriter::new(stream),
        }))
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.address)
    }
}

/// One open ingest connection.
#[derive(Debug)]
pub struct TcpSink {
    stream: BufWriter<TcpStream>,
}

/// Header line preceding a block's payload.
pub fn frame_header(block: &Block) -> String {
    format!(
        "{} {} {} {}\n",
        block.channel.as_fixed(),
        block
            .start
            .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        block.duration.num_milliseconds(),
        block.payload.len()
    )
}

#[async_trait]
impl DataSink for TcpSink {
    async fn write(&mut self, block: &Block) -> Result<(), SinkError> {
        self.stream
            .write_all(frame_header(block).as_bytes())
            .await
            .context(WriteSnafu)?;
        self.stream
            .write_all(&block.payload)
            .await
            .context(WriteSnafu)?;
        self.stream.flush().await.context(WriteSnafu)?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        self.stream.shutdown().await.context(WriteSnafu)
    }
}
