//! Ambient Location Signal construction. Identical inputs always produce the
//! identical block: variant selection is a keyed hash, the rendered clock is a
//! fixed reference instant, and the text is NFC-normalized before hashing.

use sha2::{Digest, Sha256};
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

use crate::digest::sha256_hex;

mod templates;

use templates::template_for;

/// Hard cap on the NFC character count of an inserted block. Oversized blocks
/// fail construction; truncating would silently change the digest.
pub const ALS_MAX_CHARS: usize = 350;

/// Rendered into every block instead of the wall clock so the inserted text
/// never leaks real-world recency.
pub const ALS_REFERENCE_DATE: &str = "2025-06-16";
const ALS_REFERENCE_CLOCK: &str = "14:05";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlsProvenance {
    pub country: String,
    pub variant_id: u32,
    pub seed_key_id: String,
    /// Hex SHA-256 of the NFC-normalized block text.
    pub sha256: String,
    pub char_count: usize,
}

/// The block text plus its provenance. The text is handed to the orchestrator
/// for message insertion; only the provenance reaches telemetry.
#[derive(Debug, Clone)]
pub struct AlsBlock {
    pub text: String,
    pub provenance: AlsProvenance,
}

#[derive(Debug, Error)]
pub enum AlsError {
    #[error("no ALS template for country {country}")]
    UnsupportedCountry { country: String },

    #[error("rendered ALS block is {chars} characters, limit is {ALS_MAX_CHARS}")]
    BlockTooLong { chars: usize },
}

pub fn build_als_block(country: &str, seed_key_id: &str) -> Result<AlsBlock, AlsError> {
    let template = template_for(country).ok_or_else(|| AlsError::UnsupportedCountry {
        country: country.to_string(),
    })?;

    let variant_index = select_variant(seed_key_id, template.id, country, template.variants.len());
    let variant = &template.variants[variant_index];

    let rendered = format!(
        "Ambient context (localization only; do not cite):\n\
         - {ALS_REFERENCE_DATE} {ALS_REFERENCE_CLOCK}, {offset}\n\
         - {portal} — \"{query}\"\n\
         - {postal} {city} • {phone} • {price}",
        offset = template.utc_offset,
        portal = variant.civic_portal,
        query = variant.civic_query,
        postal = variant.postal,
        city = variant.city,
        phone = variant.phone,
        price = variant.price_sample,
    );

    let text: String = rendered.nfc().collect();
    let char_count = text.chars().count();
    if char_count > ALS_MAX_CHARS {
        return Err(AlsError::BlockTooLong { chars: char_count });
    }

    let sha256 = sha256_hex(text.as_bytes());
    Ok(AlsBlock {
        text,
        provenance: AlsProvenance {
            country: country.to_string(),
            variant_id: variant.id,
            seed_key_id: seed_key_id.to_string(),
            sha256,
            char_count,
        },
    })
}

/// Keyed reduction over (seed key, template, country). No wall clock, no RNG.
fn select_variant(seed_key_id: &str, template_id: &str, country: &str, variants: usize) -> usize {
    let keyed = format!("{seed_key_id}\u{1f}{template_id}\u{1f}{country}");
    let digest = Sha256::digest(keyed.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(prefix) % variants.max(1) as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_selection_is_stable() {
        let first = select_variant("seed-a", "als_de_v1", "DE", 3);
        let second = select_variant("seed-a", "als_de_v1", "DE", 3);
        assert_eq!(first, second);
    }

    #[test]
    fn different_seed_keys_can_select_different_variants() {
        let selections: Vec<usize> = (0..16)
            .map(|index| select_variant(&format!("seed-{index}"), "als_us_v1", "US", 3))
            .collect();
        assert!(selections.iter().any(|&choice| choice != selections[0]));
    }

    #[test]
    fn rendered_block_never_contains_current_date() {
        let block = build_als_block("DE", "seed-key-1").expect("DE template exists");
        assert!(block.text.contains(ALS_REFERENCE_DATE));
    }
}
