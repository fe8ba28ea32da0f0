use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::context::PipelineContext;
use super::host::HostExtractor;
use super::profiles::builtin_profiles;
use super::stream_extractor::StreamExtractor;
use crate::challenge::{ChallengeRecovery, ChallengeSolver, FlareSolverr};
use crate::config::ResolverConfig;
use crate::error::ResolveError;
use crate::fetcher::{EmbedRequest, Fetcher};
use crate::js_engine::{ScriptEvaluator, default_evaluator};
use crate::keys::KeyStore;
use crate::media::StreamDescriptor;

/// Routes embed URLs to host extractors and aggregates their results.
///
/// Configured profiles are tried first, then the built-ins in order; the
/// built-in list ends with a catch-all generic profile.
pub struct Resolver {
    extractors: Vec<HostExtractor>,
    context: Arc<PipelineContext>,
}

impl Resolver {
    pub fn builder(config: ResolverConfig) -> ResolverBuilder {
        ResolverBuilder::new(config)
    }

    pub fn from_config(config: &ResolverConfig) -> Result<Self, ResolveError> {
        ResolverBuilder::new(config.clone()).build()
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    pub fn extractors(&self) -> impl Iterator<Item = &HostExtractor> {
        self.extractors.iter()
    }

    /// The first extractor whose pattern matches `url`.
    pub fn extractor_for(&self, url: &str) -> Result<&HostExtractor, ResolveError> {
        let parsed = Url::parse(url)?;
        self.extractors
            .iter()
            .find(|extractor| extractor.matches(&parsed))
            .ok_or_else(|| ResolveError::UnsupportedHost(url.to_string()))
    }

    /// Resolve one embed page. An empty list means the host yielded nothing.
    pub async fn resolve(&self, request: &EmbedRequest) -> Result<Vec<StreamDescriptor>, ResolveError> {
        let extractor = self.extractor_for(&request.url)?;
        debug!(host = extractor.name(), url = %request.url, "resolving embed");
        extractor.resolve(request).await
    }

    /// Resolve several embed pages concurrently and flatten the results in
    /// request order. Failures and requests still running at `deadline`
    /// contribute nothing.
    pub async fn resolve_all(
        &self,
        requests: &[EmbedRequest],
        deadline: Option<Duration>,
    ) -> Vec<StreamDescriptor> {
        let started = Instant::now();
        let tasks = requests.iter().map(|request| async move {
            let start = Instant::now();
            let resolution = self.resolve(request);
            let result = match deadline {
                Some(limit) => match tokio::time::timeout_at((started + limit).into(), resolution).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(url = %request.url, "resolution cut off by deadline");
                        return Vec::new();
                    }
                },
                None => resolution.await,
            };
            let duration = start.elapsed();
            match result {
                Ok(descriptors) => {
                    info!(url = %request.url, streams = descriptors.len(), "finished in {duration:?}");
                    descriptors
                }
                Err(e) => {
                    warn!(url = %request.url, error = %e, "failed in {duration:?}");
                    Vec::new()
                }
            }
        });

        let results = join_all(tasks).await;
        info!(
            requests = requests.len(),
            "all resolutions finished in {:?}",
            started.elapsed()
        );
        results.into_iter().flatten().collect()
    }
}

/// Assembles a [`Resolver`], with optional injected collaborators.
pub struct ResolverBuilder {
    config: ResolverConfig,
    fetcher: Option<Fetcher>,
    solver: Option<Arc<dyn ChallengeSolver>>,
    evaluator: Option<Option<Arc<dyn ScriptEvaluator>>>,
    key_store: Option<Arc<KeyStore>>,
    cancel: Option<CancellationToken>,
}

impl ResolverBuilder {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            config,
            fetcher: None,
            solver: None,
            evaluator: None,
            key_store: None,
            cancel: None,
        }
    }

    pub fn fetcher(mut self, fetcher: Fetcher) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn solver(mut self, solver: Arc<dyn ChallengeSolver>) -> Self {
        self.solver = Some(solver);
        self
    }

    /// Replace the default script engine. `None` disables script evaluation.
    pub fn evaluator(mut self, evaluator: Option<Arc<dyn ScriptEvaluator>>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn key_store(mut self, key_store: Arc<KeyStore>) -> Self {
        self.key_store = Some(key_store);
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn build(self) -> Result<Resolver, ResolveError> {
        let config = self.config;
        let mut fetcher = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Fetcher::new(config.request_timeout(), &config.user_agent)?,
        };
        if let Some(token) = self.cancel {
            fetcher = fetcher.with_cancellation(token);
        }

        let evaluator = self.evaluator.unwrap_or_else(default_evaluator);
        let solver = self.solver.or_else(|| {
            config.flaresolverr_url.as_ref().map(|endpoint| {
                Arc::new(FlareSolverr::new(endpoint.clone(), fetcher.clone())) as Arc<dyn ChallengeSolver>
            })
        });

        let mut http = ChallengeRecovery::new(fetcher.clone())
            .with_evaluator(evaluator.clone())
            .with_timeout(config.challenge_timeout());
        if let Some(solver) = solver {
            http = http.with_solver(solver);
        }

        let keys = self.key_store.unwrap_or_else(|| {
            Arc::new(KeyStore::new(fetcher.clone()).with_sources(config.key_sources.clone()))
        });

        let mut profiles = config.hosts.clone();
        if !config.disable_builtin_hosts {
            profiles.extend(builtin_profiles());
        }
        for profile in &profiles {
            if let Some(site_type) = profile.pipeline.key_site_type()
                && !keys.knows(site_type)
            {
                warn!(host = %profile.name, site_type, "host references a key with no configured source");
            }
        }

        let context = Arc::new(PipelineContext::new(http, keys, evaluator));
        let extractors = profiles
            .into_iter()
            .map(|profile| HostExtractor::new(profile, context.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(hosts = extractors.len(), "resolver ready");

        Ok(Resolver {
            extractors,
            context,
        })
    }
}
