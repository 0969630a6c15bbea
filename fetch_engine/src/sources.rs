//! Registry that maps configured gap types to concrete data sources.
//!
//! `[sources.<gap_type>]` names a *kind*; the registry holds one factory per
//! kind. Everything is resolved once per configuration load, so a typo in a
//! kind fails at startup instead of on the first request.

use std::{collections::HashMap, sync::Arc, time::Duration};

use indexmap::IndexMap;
use waveform_ingestor::sources::{
    DataSource, InvalidConfigSnafu, SourceInitError,
    fdsn::{FdsnConfig, FdsnSource},
    nodata::RetiredSource,
};

use crate::{
    config::{EngineConfig, SourceCfg},
    error::EngineError,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Builds a source from its configuration.
pub type SourceFactory = fn(&SourceCfg) -> Result<Arc<dyn DataSource>, SourceInitError>;

fn build_fdsn(cfg: &SourceCfg) -> Result<Arc<dyn DataSource>, SourceInitError> {
    let Some(base_url) = cfg.base_url.clone() else {
        return InvalidConfigSnafu {
            message: "fdsn source requires base_url",
        }
        .fail();
    };
    let source = FdsnSource::new(&FdsnConfig {
        base_url,
        timeout: cfg.timeout_secs.map(Duration::from_secs).unwrap_or(DEFAULT_TIMEOUT),
        latency_aware: cfg.latency_aware,
        token_env: cfg.token_env.clone(),
    })?;
    Ok(Arc::new(source))
}

fn build_retired(_cfg: &SourceCfg) -> Result<Arc<dyn DataSource>, SourceInitError> {
    Ok(Arc::new(RetiredSource))
}

/// Kind -> factory.
#[derive(Clone)]
pub struct SourceRegistry {
    factories: IndexMap<String, SourceFactory>,
}

impl Default for SourceRegistry {
    fn default() -> Self {
        let mut r = Self::empty();
        r.register("fdsn", build_fdsn);
        r.register("nodata", build_retired);
        r
    }
}

impl SourceRegistry {
    pub fn empty() -> Self {
        Self {
            factories: IndexMap::new(),
        }
    }

    /// Add or replace the factory for `kind`.
    pub fn register(&mut self, kind: &str, factory: SourceFactory) {
        self.factories.insert(kind.trim().to_lowercase(), factory);
    }

    /// Build every configured source.
    pub fn resolve(&self, cfg: &EngineConfig) -> Result<ResolvedSources, EngineError> {
        let mut out = ResolvedSources::default();
        for (gap_type, src) in &cfg.sources {
            let factory = self
                .factories
                .get(&src.kind)
                .ok_or_else(|| EngineError::UnknownSourceKind {
                    gap_type: gap_type.clone(),
                    kind: src.kind.clone(),
                })?;
            let source = factory(src).map_err(|source| EngineError::SourceInit {
                gap_type: gap_type.clone(),
                source,
            })?;
            tracing::debug!(gap_type = %gap_type, kind = %src.kind, "source resolved");
            out.insert(gap_type, source, src.immediate);
        }
        Ok(out)
    }
}

/// A source plus the per-gap-type delivery flags that travel with it.
#[derive(Clone)]
pub struct Route {
    pub source: Arc<dyn DataSource>,
    /// Skip the redundant-block check for this gap type.
    pub immediate: bool,
}

/// Gap type -> resolved source.
#[derive(Clone, Default)]
pub struct ResolvedSources {
    routes: HashMap<String, Route>,
}

impl ResolvedSources {
    pub fn insert(&mut self, gap_type: &str, source: Arc<dyn DataSource>, immediate: bool) {
        self.routes
            .insert(gap_type.to_uppercase(), Route { source, immediate });
    }

    pub fn get(&self, gap_type: &str) -> Option<&Route> {
        self.routes.get(gap_type)
    }
}
