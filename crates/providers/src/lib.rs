pub mod extractor;
pub mod media;
pub mod metadata;
pub mod orchestrator;

pub use extractor::error::ExtractorError;
pub use extractor::factory::{ProviderEndpoints, ProviderFactory, ProviderKind};
pub use extractor::{Extractor, ProviderExtractor, default_client};
pub use media::{MediaKind, MediaRef, MediaType, StreamDescriptor, SubtitleTrack};
pub use metadata::{EpisodeInfo, MetadataError, MetadataProvider, StaticMetadata, TitleDetails};
pub use orchestrator::{
    Orchestrator, OrchestratorConfig, ResolutionStep, ResolveError, SeasonPolicy,
};
