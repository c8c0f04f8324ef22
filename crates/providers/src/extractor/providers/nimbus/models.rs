use serde::Deserialize;

/// Cipher material published out-of-band as a static JSON document. The
/// upstream rotates it by publishing a new document, not by changing the URL.
#[derive(Debug, Clone, Deserialize)]
pub(super) struct CipherConfig {
    /// AES key, hex, 16 bytes.
    pub key: String,
    /// AES IV, hex, 16 bytes.
    pub iv: String,
    pub xor_key: String,
    pub substitution: SubstitutionTable,
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct SubstitutionTable {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct DeliveryServer {
    pub name: String,
    pub hash: String,
}

#[derive(Debug, Deserialize)]
pub(super) struct SourcePayload {
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
    #[serde(default)]
    pub tracks: Vec<TrackEntry>,
}

#[derive(Debug, Deserialize)]
pub(super) struct SourceEntry {
    pub file: String,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct TrackEntry {
    pub file: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
}
