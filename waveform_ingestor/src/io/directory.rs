//! Directory sink: one file per delivered block, grouped by network/station.
//!
//! Files are written under a temporary name and renamed into place so a
//! reader never sees a half-written block.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use snafu::ResultExt;
use tokio::{fs, io::AsyncWriteExt};

use crate::{
    io::sink::{ConnectSnafu, DataSink, SinkConnector, SinkError, WriteSnafu},
    models::block::Block,
};

/// Opens [`DirectorySink`]s rooted at a fixed directory.
#[derive(Debug, Clone)]
pub struct DirectoryConnector {
    root: PathBuf,
}

impl DirectoryConnector {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl SinkConnector for DirectoryConnector {
    async fn open(&self) -> Result<Box<dyn DataSink>, SinkError> {
        fs::create_dir_all(&self.root).await.context(ConnectSnafu {
            address: self.root.display().to_string(),
        })?;
        Ok(Box::new(DirectorySink {
            root: self.root.clone(),
        }))
    }

    fn describe(&self) -> String {
        format!("file://{}", self.root.display())
    }
}

/// Writes each block to `<root>/<NET>/<STA>/<NETSTA__CHALOC>_<start>_<ms>.ms`.
#[derive(Debug)]
pub struct DirectorySink {
    root: PathBuf,
}

/// Relative path of the file a block is stored in.
pub fn block_path(root: &Path, block: &Block) -> PathBuf {
    let ch = &block.channel;
    let stem = ch.as_fixed().replace(' ', "_");
    let name = format!(
        "{stem}_{}_{}.ms",
        block.start.format("%Y%m%dT%H%M%S%3f"),
        block.duration.num_milliseconds()
    );
    root.join(ch.network()).join(ch.station()).join(name)
}

#[async_trait]
impl DataSink for DirectorySink {
    async fn write(&mut self, block: &Block) -> Result<(), SinkError> {
        let path = block_path(&self.root, block);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.context(WriteSnafu)?;
        }
        let tmp = path.with_extension("part");
        let mut file = fs::File::create(&tmp).await.context(WriteSnafu)?;
        file.write_all(&block.payload).await.context(WriteSnafu)?;
        file.sync_all().await.context(WriteSnafu)?;
        drop(file);
        fs::rename(&tmp, &path).await.context(WriteSnafu)?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}
