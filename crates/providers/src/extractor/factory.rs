use std::sync::Arc;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::error::ExtractorError;
use super::extractor::ProviderExtractor;
use super::providers::{embedo::Embedo, moonbox::Moonbox, nimbus::Nimbus, vidora::Vidora};
use crate::metadata::MetadataProvider;

/// The four upstream providers, in their default fallback order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Vidora,
    Embedo,
    Nimbus,
    Moonbox,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Vidora,
        ProviderKind::Embedo,
        ProviderKind::Nimbus,
        ProviderKind::Moonbox,
    ];
}

/// Base URLs for every upstream endpoint the extractors talk to.
///
/// Tests point these at a loopback fixture server; production uses the
/// defaults.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub vidora_base: String,
    pub embedo_base: String,
    pub streamnest_base: String,
    pub nimbus_base: String,
    /// Static JSON document published out-of-band with the nimbus cipher
    /// material. Fetched once per extractor and cached.
    pub nimbus_config_url: String,
    pub moonbox_index_base: String,
    pub moonbox_decrypt_url: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            vidora_base: "https://vidora.su".to_string(),
            embedo_base: "https://embedo.cc".to_string(),
            streamnest_base: "https://api.streamnest.tv".to_string(),
            nimbus_base: "https://nimbus.cx".to_string(),
            nimbus_config_url:
                "https://raw.githubusercontent.com/nimbus-keys/config/main/config.json".to_string(),
            moonbox_index_base: "https://idx.moonbox.yt".to_string(),
            moonbox_decrypt_url: "https://dec.moonbox.workers.dev/decrypt".to_string(),
        }
    }
}

// A type alias for a thread-safe constructor function.
type ExtractorConstructor =
    fn(Client, Arc<dyn MetadataProvider>, &ProviderEndpoints) -> Box<dyn ProviderExtractor>;

struct ProviderEntry {
    kind: ProviderKind,
    constructor: ExtractorConstructor,
}

macro_rules! provider_registry {
    ( $( $kind:path => $builder:path ),+ $(,)? ) => {
        &[
            $(
                ProviderEntry {
                    kind: $kind,
                    constructor: |client, metadata, endpoints| {
                        Box::new($builder(client, metadata, endpoints))
                            as Box<dyn ProviderExtractor>
                    },
                },
            )+
        ]
    };
}

// Static provider registry.
static PROVIDERS: &[ProviderEntry] = provider_registry![
    ProviderKind::Vidora => Vidora::new,
    ProviderKind::Embedo => Embedo::new,
    ProviderKind::Nimbus => Nimbus::new,
    ProviderKind::Moonbox => Moonbox::new,
];

/// A factory for creating provider-specific extractors.
pub struct ProviderFactory {
    client: Client,
    metadata: Arc<dyn MetadataProvider>,
    endpoints: ProviderEndpoints,
}

impl ProviderFactory {
    pub fn new(client: Client, metadata: Arc<dyn MetadataProvider>) -> Self {
        Self::with_endpoints(client, metadata, ProviderEndpoints::default())
    }

    pub fn with_endpoints(
        client: Client,
        metadata: Arc<dyn MetadataProvider>,
        endpoints: ProviderEndpoints,
    ) -> Self {
        Self {
            client,
            metadata,
            endpoints,
        }
    }

    pub fn create(&self, kind: ProviderKind) -> Result<Box<dyn ProviderExtractor>, ExtractorError> {
        for provider in PROVIDERS {
            if provider.kind == kind {
                return Ok((provider.constructor)(
                    self.client.clone(),
                    self.metadata.clone(),
                    &self.endpoints,
                ));
            }
        }

        Err(ExtractorError::Other(format!(
            "no extractor registered for provider {kind}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::StaticMetadata;
    use std::str::FromStr;

    #[test]
    fn kind_round_trips_through_strings() {
        for kind in ProviderKind::ALL {
            let parsed = ProviderKind::from_str(&kind.to_string()).unwrap();
            assert_eq!(parsed, kind);
        }
        assert_eq!(
            ProviderKind::from_str("Moonbox").unwrap(),
            ProviderKind::Moonbox
        );
        assert!(ProviderKind::from_str("unknown").is_err());
    }

    #[test]
    fn registry_covers_every_kind() {
        // A bare `Client::new()` under reqwest's no-provider TLS feature
        // needs a process-global crypto provider.
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
        let factory = ProviderFactory::new(Client::new(), Arc::new(StaticMetadata::new()));
        for kind in ProviderKind::ALL {
            let extractor = factory.create(kind).unwrap();
            assert_eq!(extractor.provider_name(), kind.to_string());
        }
    }
}
