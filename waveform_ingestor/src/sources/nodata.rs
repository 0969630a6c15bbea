//! A source that declares every interval permanently empty.
//!
//! Configured for gap types whose upstream has been decommissioned, so the
//! backlog drains to NODATA instead of being retried forever.

use async_trait::async_trait;

use crate::{
    models::request::FetchRequest,
    sources::{DataSource, FetchOutcome, LinkControl, SourceError},
};

/// Always answers [`FetchOutcome::NoData`].
#[derive(Debug, Default)]
pub struct RetiredSource;

#[async_trait]
impl DataSource for RetiredSource {
    fn name(&self) -> &str {
        "nodata"
    }

    async fn fetch(
        &self,
        _request: &FetchRequest,
        _link: &mut dyn LinkControl,
    ) -> Result<FetchOutcome, SourceError> {
        Ok(FetchOutcome::NoData)
    }
}
