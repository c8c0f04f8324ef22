use aes::Aes128;
use base64::{
    Engine,
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
};
use cipher::{BlockModeEncrypt, KeyIvInit, block_padding::Pkcs7};
use rustc_hash::FxHashMap;

use super::models::CipherConfig;
use crate::extractor::error::ExtractorError;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;

/// The nimbus request-token pipeline. The upstream hands out a ciphertext
/// fragment in the page and expects it back re-encrypted: AES-128-CBC, then
/// base64, then a cycled XOR, then a character substitution, then URL-safe
/// base64.
pub(super) struct TokenCipher {
    key: [u8; 16],
    iv: [u8; 16],
    xor_key: Vec<u8>,
    substitution: FxHashMap<u8, u8>,
}

impl TokenCipher {
    pub(super) fn from_config(config: &CipherConfig) -> Result<Self, ExtractorError> {
        let key = decode_hex_16(&config.key, "key")?;
        let iv = decode_hex_16(&config.iv, "iv")?;

        if config.xor_key.is_empty() {
            return Err(ExtractorError::decode("cipher config has an empty xor key"));
        }

        let from = config.substitution.from.as_bytes();
        let to = config.substitution.to.as_bytes();
        if from.len() != to.len() {
            return Err(ExtractorError::decode(
                "substitution alphabets differ in length",
            ));
        }

        Ok(Self {
            key,
            iv,
            xor_key: config.xor_key.as_bytes().to_vec(),
            substitution: from.iter().copied().zip(to.iter().copied()).collect(),
        })
    }

    /// Derive the request token for a ciphertext fragment lifted off a page.
    pub(super) fn derive_token(&self, fragment: &str) -> Result<String, ExtractorError> {
        let encrypted = self.encrypt(fragment.as_bytes())?;

        let mut bytes = STANDARD.encode(&encrypted).into_bytes();
        for (index, byte) in bytes.iter_mut().enumerate() {
            *byte ^= self.xor_key[index % self.xor_key.len()];
        }
        for byte in bytes.iter_mut() {
            if let Some(&mapped) = self.substitution.get(byte) {
                *byte = mapped;
            }
        }

        Ok(URL_SAFE_NO_PAD.encode(&bytes))
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, ExtractorError> {
        let cipher = Aes128CbcEnc::new_from_slices(&self.key, &self.iv)
            .map_err(|err| ExtractorError::decode(format!("cipher init failed: {err}")))?;

        // Round up to the next 16-byte boundary for Pkcs7.
        let padded_len = ((plaintext.len() / 16) + 1) * 16;
        let mut buffer = vec![0u8; padded_len];
        buffer[..plaintext.len()].copy_from_slice(plaintext);

        let encrypted = cipher
            .encrypt_padded::<Pkcs7>(&mut buffer, plaintext.len())
            .map_err(|err| ExtractorError::decode(format!("pkcs7 padding failed: {err}")))?;
        Ok(encrypted.to_vec())
    }
}

fn decode_hex_16(value: &str, field: &str) -> Result<[u8; 16], ExtractorError> {
    let bytes = hex::decode(value).map_err(|err| {
        ExtractorError::decode(format!("cipher config {field} is not hex: {err}"))
    })?;
    <[u8; 16]>::try_from(bytes)
        .map_err(|_| ExtractorError::decode(format!("cipher config {field} must be 16 bytes")))
}

#[cfg(test)]
mod tests {
    use super::super::models::SubstitutionTable;
    use super::*;
    use cipher::BlockModeDecrypt;

    type Aes128CbcDec = cbc::Decryptor<Aes128>;

    fn test_config() -> CipherConfig {
        CipherConfig {
            key: "000102030405060708090a0b0c0d0e0f".to_string(),
            iv: "101112131415161718191a1b1c1d1e1f".to_string(),
            xor_key: "k9".to_string(),
            substitution: SubstitutionTable {
                from: "AEIOU".to_string(),
                to: "40123".to_string(),
            },
        }
    }

    #[test]
    fn token_derivation_is_deterministic_and_url_safe() {
        let cipher = TokenCipher::from_config(&test_config()).unwrap();
        let first = cipher.derive_token("ctx-93a1").unwrap();
        let second = cipher.derive_token("ctx-93a1").unwrap();
        assert_eq!(first, second);
        assert!(!first.is_empty());
        assert!(
            first
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        );
    }

    #[test]
    fn aes_stage_round_trips_through_a_decryptor() {
        let cipher = TokenCipher::from_config(&test_config()).unwrap();
        let encrypted = cipher.encrypt(b"fragment-under-test").unwrap();

        let key = decode_hex_16(&test_config().key, "key").unwrap();
        let iv = decode_hex_16(&test_config().iv, "iv").unwrap();
        let mut buffer = encrypted.clone();
        let decrypted = Aes128CbcDec::new_from_slices(&key, &iv)
            .unwrap()
            .decrypt_padded::<Pkcs7>(&mut buffer)
            .unwrap();
        assert_eq!(decrypted, b"fragment-under-test");
    }

    #[test]
    fn different_fragments_produce_different_tokens() {
        let cipher = TokenCipher::from_config(&test_config()).unwrap();
        let a = cipher.derive_token("ctx-1").unwrap();
        let b = cipher.derive_token("ctx-2").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_config_is_rejected() {
        let mut bad_hex = test_config();
        bad_hex.key = "not-hex".to_string();
        assert!(matches!(
            TokenCipher::from_config(&bad_hex),
            Err(ExtractorError::Decode(_))
        ));

        let mut short_iv = test_config();
        short_iv.iv = "0011".to_string();
        assert!(TokenCipher::from_config(&short_iv).is_err());

        let mut lopsided = test_config();
        lopsided.substitution.to = "4".to_string();
        assert!(TokenCipher::from_config(&lopsided).is_err());

        let mut empty_xor = test_config();
        empty_xor.xor_key = String::new();
        assert!(TokenCipher::from_config(&empty_xor).is_err());
    }
}
