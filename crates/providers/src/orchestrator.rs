//! Provider fallback orchestration.
//!
//! Resolution builds an explicit ordered plan first, then walks it. The plan
//! is inspectable on its own, which keeps the fallback rules out of the
//! request code paths.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::extractor::error::ExtractorError;
use crate::extractor::extractor::ProviderExtractor;
use crate::extractor::factory::{ProviderFactory, ProviderKind};
use crate::media::{MediaKind, MediaRef, StreamDescriptor};

/// Provider the 404/403 hop lands on.
const SECONDARY_PROVIDER: ProviderKind = ProviderKind::Embedo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeasonPolicy {
    AsRequested,
    /// Some serials are indexed by the secondary provider under a single
    /// season; retrying with season 01 recovers them.
    ForceSeasonOne,
}

impl SeasonPolicy {
    fn apply(self, requested: u32) -> u32 {
        match self {
            SeasonPolicy::AsRequested => requested,
            SeasonPolicy::ForceSeasonOne => 1,
        }
    }
}

/// One attempt in the resolution plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionStep {
    pub provider: ProviderKind,
    pub season: SeasonPolicy,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Provider to try first, and to reconcile towards when it loses.
    pub preferred: Option<ProviderKind>,
    /// Append the season-01 retry step for episode requests.
    pub season_fallback: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            preferred: None,
            season_fallback: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("all providers failed after {} attempts", attempts.len())]
    AllProvidersFailed {
        attempts: Vec<(ProviderKind, ExtractorError)>,
    },
}

pub struct Orchestrator {
    providers: FxHashMap<ProviderKind, Arc<dyn ProviderExtractor>>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        factory: &ProviderFactory,
        config: OrchestratorConfig,
    ) -> Result<Self, ExtractorError> {
        let mut providers = FxHashMap::default();
        for kind in ProviderKind::ALL {
            providers.insert(kind, Arc::from(factory.create(kind)?));
        }
        Ok(Self { providers, config })
    }

    /// Construct from explicit provider instances. Tests inject scripted
    /// providers here; embedders can substitute their own.
    pub fn with_providers(
        providers: FxHashMap<ProviderKind, Arc<dyn ProviderExtractor>>,
        config: OrchestratorConfig,
    ) -> Self {
        Self { providers, config }
    }

    /// Build the ordered resolution plan for a media reference.
    ///
    /// Default order is [`ProviderKind::ALL`]; a preferred provider moves to
    /// the front. For episode requests outside season 1 the secondary
    /// provider gets a second step with the season forced to 01, directly
    /// after its regular step.
    pub fn plan(&self, media: &MediaRef) -> Vec<ResolutionStep> {
        let mut order: Vec<ProviderKind> = ProviderKind::ALL.to_vec();
        if let Some(preferred) = self.config.preferred {
            if let Some(position) = order.iter().position(|&kind| kind == preferred) {
                order.remove(position);
            }
            order.insert(0, preferred);
        }

        let mut steps: Vec<ResolutionStep> = order
            .into_iter()
            .map(|provider| ResolutionStep {
                provider,
                season: SeasonPolicy::AsRequested,
            })
            .collect();

        if self.config.season_fallback
            && let MediaKind::Episode { season, .. } = media.kind
            && season != 1
            && let Some(position) = steps
                .iter()
                .position(|step| step.provider == SECONDARY_PROVIDER)
        {
            steps.insert(
                position + 1,
                ResolutionStep {
                    provider: SECONDARY_PROVIDER,
                    season: SeasonPolicy::ForceSeasonOne,
                },
            );
        }

        steps
    }

    /// Walk the plan until a provider yields a descriptor.
    ///
    /// A `Protocol {404|403}` failure hops forward to the secondary
    /// provider's next step; every other failure advances one step. When a
    /// preferred provider is configured but a different one produced the
    /// success, one reconciliation attempt runs against the preferred
    /// provider and its result wins if it succeeds.
    pub async fn resolve(&self, media: &MediaRef) -> Result<StreamDescriptor, ResolveError> {
        let plan = self.plan(media);
        let mut attempts: Vec<(ProviderKind, ExtractorError)> = Vec::new();

        let mut index = 0;
        while index < plan.len() {
            let step = plan[index];
            debug!(provider = %step.provider, step = index, "attempting provider");

            match self.run_step(step, media).await {
                Ok(mut descriptor) => {
                    if descriptor.selected_server.is_none() {
                        descriptor.selected_server = Some(step.provider.to_string());
                    }
                    info!(media = %media, provider = %step.provider, "resolution succeeded");
                    return Ok(self.reconcile(media, descriptor).await);
                }
                Err(err) => {
                    let hop = err.is_fallback_trigger();
                    warn!(provider = %step.provider, error = %err, "provider attempt failed");
                    attempts.push((step.provider, err));

                    if hop
                        && let Some(offset) = plan[index + 1..]
                            .iter()
                            .position(|s| s.provider == SECONDARY_PROVIDER)
                    {
                        debug!(provider = %SECONDARY_PROVIDER, "hopping to secondary provider");
                        index += 1 + offset;
                        continue;
                    }
                    index += 1;
                }
            }
        }

        Err(ResolveError::AllProvidersFailed { attempts })
    }

    async fn reconcile(
        &self,
        media: &MediaRef,
        fallback: StreamDescriptor,
    ) -> StreamDescriptor {
        let Some(preferred) = self.config.preferred else {
            return fallback;
        };
        if fallback.provider == preferred {
            return fallback;
        }

        debug!(provider = %preferred, "reconciliation attempt against the preferred provider");
        let step = ResolutionStep {
            provider: preferred,
            season: SeasonPolicy::AsRequested,
        };
        match self.run_step(step, media).await {
            Ok(mut descriptor) => {
                if descriptor.selected_server.is_none() {
                    descriptor.selected_server = Some(preferred.to_string());
                }
                info!(provider = %preferred, "preferred provider recovered");
                descriptor
            }
            Err(err) => {
                debug!(provider = %preferred, error = %err, "preferred provider still failing");
                fallback
            }
        }
    }

    async fn run_step(
        &self,
        step: ResolutionStep,
        media: &MediaRef,
    ) -> Result<StreamDescriptor, ExtractorError> {
        let provider = self.providers.get(&step.provider).ok_or_else(|| {
            ExtractorError::Other(format!("provider {} is not registered", step.provider))
        })?;

        match media.kind {
            MediaKind::Movie => provider.resolve_movie(media).await,
            MediaKind::Episode { season, episode } => {
                let season = step.season.apply(season);
                provider.resolve_episode(media, season, episode).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reqwest::{Client, StatusCode};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::extractor::extractor::Extractor;

    #[derive(Clone)]
    enum Outcome {
        Stream(&'static str),
        Status(StatusCode),
        Broken,
    }

    struct ScriptedProvider {
        extractor: Extractor,
        kind: ProviderKind,
        outcomes: Mutex<Vec<Outcome>>,
        calls: AtomicU32,
        seasons: Mutex<Vec<u32>>,
    }

    impl ScriptedProvider {
        fn new(kind: ProviderKind, outcomes: Vec<Outcome>) -> Arc<Self> {
            // A bare `Client::new()` under reqwest's no-provider TLS feature
            // needs a process-global crypto provider.
            let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
            Arc::new(Self {
                extractor: Extractor::new(kind.to_string(), Client::new()),
                kind,
                outcomes: Mutex::new(outcomes),
                calls: AtomicU32::new(0),
                seasons: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn respond(&self) -> Result<StreamDescriptor, ExtractorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock().unwrap();
            let outcome = if outcomes.len() > 1 {
                outcomes.remove(0)
            } else {
                outcomes[0].clone()
            };
            match outcome {
                Outcome::Stream(url) => Ok(StreamDescriptor::new(self.kind, url)),
                Outcome::Status(status) => Err(ExtractorError::protocol(status)),
                Outcome::Broken => Err(ExtractorError::decode("scripted failure")),
            }
        }
    }

    #[async_trait]
    impl ProviderExtractor for ScriptedProvider {
        fn extractor(&self) -> &Extractor {
            &self.extractor
        }

        async fn resolve_movie(
            &self,
            _media: &MediaRef,
        ) -> Result<StreamDescriptor, ExtractorError> {
            self.respond()
        }

        async fn resolve_episode(
            &self,
            _media: &MediaRef,
            season: u32,
            _episode: u32,
        ) -> Result<StreamDescriptor, ExtractorError> {
            self.seasons.lock().unwrap().push(season);
            self.respond()
        }
    }

    struct Fixture {
        vidora: Arc<ScriptedProvider>,
        embedo: Arc<ScriptedProvider>,
        nimbus: Arc<ScriptedProvider>,
        moonbox: Arc<ScriptedProvider>,
    }

    impl Fixture {
        fn orchestrator(&self, config: OrchestratorConfig) -> Orchestrator {
            let mut providers: FxHashMap<ProviderKind, Arc<dyn ProviderExtractor>> =
                FxHashMap::default();
            providers.insert(ProviderKind::Vidora, self.vidora.clone());
            providers.insert(ProviderKind::Embedo, self.embedo.clone());
            providers.insert(ProviderKind::Nimbus, self.nimbus.clone());
            providers.insert(ProviderKind::Moonbox, self.moonbox.clone());
            Orchestrator::with_providers(providers, config)
        }
    }

    fn fixture(
        vidora: Vec<Outcome>,
        embedo: Vec<Outcome>,
        nimbus: Vec<Outcome>,
        moonbox: Vec<Outcome>,
    ) -> Fixture {
        Fixture {
            vidora: ScriptedProvider::new(ProviderKind::Vidora, vidora),
            embedo: ScriptedProvider::new(ProviderKind::Embedo, embedo),
            nimbus: ScriptedProvider::new(ProviderKind::Nimbus, nimbus),
            moonbox: ScriptedProvider::new(ProviderKind::Moonbox, moonbox),
        }
    }

    fn ok() -> Vec<Outcome> {
        vec![Outcome::Stream("https://cdn.example/v.m3u8")]
    }

    fn not_found() -> Vec<Outcome> {
        vec![Outcome::Status(StatusCode::NOT_FOUND)]
    }

    fn broken() -> Vec<Outcome> {
        vec![Outcome::Broken]
    }

    #[test]
    fn plan_uses_default_order_for_movies() {
        let fx = fixture(ok(), ok(), ok(), ok());
        let orchestrator = fx.orchestrator(OrchestratorConfig::default());
        let plan = orchestrator.plan(&MediaRef::movie("603"));
        let kinds: Vec<ProviderKind> = plan.iter().map(|s| s.provider).collect();
        assert_eq!(kinds, ProviderKind::ALL.to_vec());
        assert!(plan.iter().all(|s| s.season == SeasonPolicy::AsRequested));
    }

    #[test]
    fn plan_appends_season_fallback_after_the_secondary_step() {
        let fx = fixture(ok(), ok(), ok(), ok());
        let orchestrator = fx.orchestrator(OrchestratorConfig::default());

        let plan = orchestrator.plan(&MediaRef::episode("1396", 3, 7));
        assert_eq!(plan.len(), 5);
        assert_eq!(
            plan[2],
            ResolutionStep {
                provider: ProviderKind::Embedo,
                season: SeasonPolicy::ForceSeasonOne,
            }
        );

        // Requests already in season 1 gain nothing from the retry.
        let plan = orchestrator.plan(&MediaRef::episode("1396", 1, 7));
        assert_eq!(plan.len(), 4);

        let orchestrator = fx.orchestrator(OrchestratorConfig {
            season_fallback: false,
            ..Default::default()
        });
        assert_eq!(orchestrator.plan(&MediaRef::episode("1396", 3, 7)).len(), 4);
    }

    #[test]
    fn plan_moves_the_preferred_provider_to_the_front() {
        let fx = fixture(ok(), ok(), ok(), ok());
        let orchestrator = fx.orchestrator(OrchestratorConfig {
            preferred: Some(ProviderKind::Nimbus),
            ..Default::default()
        });
        let plan = orchestrator.plan(&MediaRef::movie("603"));
        let kinds: Vec<ProviderKind> = plan.iter().map(|s| s.provider).collect();
        assert_eq!(
            kinds,
            vec![
                ProviderKind::Nimbus,
                ProviderKind::Vidora,
                ProviderKind::Embedo,
                ProviderKind::Moonbox,
            ]
        );
    }

    #[tokio::test]
    async fn protocol_404_hops_to_the_secondary_provider() {
        // Preferred moonbox 404s; the hop must skip vidora entirely.
        let fx = fixture(ok(), ok(), ok(), not_found());
        let orchestrator = fx.orchestrator(OrchestratorConfig {
            preferred: Some(ProviderKind::Moonbox),
            ..Default::default()
        });

        let descriptor = orchestrator.resolve(&MediaRef::movie("603")).await.unwrap();
        assert_eq!(descriptor.provider, ProviderKind::Embedo);
        assert_eq!(fx.vidora.calls(), 0);
        assert_eq!(fx.embedo.calls(), 1);
    }

    #[tokio::test]
    async fn other_errors_advance_one_step() {
        let fx = fixture(ok(), ok(), ok(), broken());
        let orchestrator = fx.orchestrator(OrchestratorConfig {
            preferred: Some(ProviderKind::Moonbox),
            ..Default::default()
        });

        let descriptor = orchestrator.resolve(&MediaRef::movie("603")).await.unwrap();
        assert_eq!(descriptor.provider, ProviderKind::Vidora);
        assert_eq!(fx.vidora.calls(), 1);
    }

    #[tokio::test]
    async fn winner_gets_selected_server_when_the_provider_left_it_empty() {
        let fx = fixture(not_found(), ok(), ok(), ok());
        let orchestrator = fx.orchestrator(OrchestratorConfig::default());

        let descriptor = orchestrator.resolve(&MediaRef::movie("603")).await.unwrap();
        assert_eq!(descriptor.provider, ProviderKind::Embedo);
        assert_eq!(descriptor.selected_server.as_deref(), Some("embedo"));
    }

    #[tokio::test]
    async fn season_fallback_step_actually_forces_season_one() {
        let fx = fixture(
            broken(),
            vec![Outcome::Broken, Outcome::Stream("https://cdn.example/v")],
            ok(),
            ok(),
        );
        let orchestrator = fx.orchestrator(OrchestratorConfig::default());

        let media = MediaRef::episode("1396", 3, 7);
        let descriptor = orchestrator.resolve(&media).await.unwrap();
        assert_eq!(descriptor.provider, ProviderKind::Embedo);
        assert_eq!(*fx.embedo.seasons.lock().unwrap(), vec![3, 1]);
    }

    #[tokio::test]
    async fn reconciliation_prefers_a_recovered_preferred_provider() {
        let fx = fixture(
            vec![Outcome::Broken, Outcome::Stream("https://cdn.example/p")],
            ok(),
            ok(),
            ok(),
        );
        let orchestrator = fx.orchestrator(OrchestratorConfig {
            preferred: Some(ProviderKind::Vidora),
            ..Default::default()
        });

        let descriptor = orchestrator.resolve(&MediaRef::movie("603")).await.unwrap();
        assert_eq!(descriptor.provider, ProviderKind::Vidora);
        assert_eq!(fx.vidora.calls(), 2);
        assert_eq!(fx.embedo.calls(), 1);
    }

    #[tokio::test]
    async fn reconciliation_failure_keeps_the_fallback_result() {
        let fx = fixture(broken(), ok(), ok(), ok());
        let orchestrator = fx.orchestrator(OrchestratorConfig {
            preferred: Some(ProviderKind::Vidora),
            ..Default::default()
        });

        let descriptor = orchestrator.resolve(&MediaRef::movie("603")).await.unwrap();
        assert_eq!(descriptor.provider, ProviderKind::Embedo);
        assert_eq!(fx.vidora.calls(), 2);
    }

    #[tokio::test]
    async fn exhaustion_reports_every_attempt() {
        let fx = fixture(not_found(), broken(), broken(), broken());
        let orchestrator = fx.orchestrator(OrchestratorConfig::default());

        let err = orchestrator
            .resolve(&MediaRef::episode("1396", 3, 7))
            .await
            .unwrap_err();
        let ResolveError::AllProvidersFailed { attempts } = err;
        // vidora, embedo, embedo(s01), nimbus, moonbox
        assert_eq!(attempts.len(), 5);
        assert_eq!(attempts[0].0, ProviderKind::Vidora);
        assert!(matches!(
            attempts[0].1,
            ExtractorError::Protocol { status } if status == StatusCode::NOT_FOUND
        ));
    }
}
