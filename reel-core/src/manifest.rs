//! Master playlist synthesis.
//!
//! The master manifest is the only artifact this module produces; the
//! per-tier variant playlists are written by the encoder itself. Output
//! bytes must be deterministic for a given variant set, so callers pass
//! variants in catalog order rather than completion order.

use crate::catalog::QualityTier;

/// One entry in the master playlist: a tier plus the URI of its variant
/// playlist, relative to the master's own location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterVariant {
    pub tier: QualityTier,
    pub uri: String,
}

impl MasterVariant {
    pub fn for_tier(tier: QualityTier) -> Self {
        Self {
            uri: format!("{}/index.m3u8", tier.name),
            tier,
        }
    }
}

/// Renders the master playlist text. A manifest with zero variants is
/// the valid degenerate form for sources below every catalog tier.
pub fn render_master(variants: &[MasterVariant]) -> String {
    let mut out = String::from("#EXTM3U\n");
    for variant in variants {
        let (width, height) = variant.tier.resolution();
        out.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}x{}\n",
            variant.tier.bitrate, width, height
        ));
        out.push_str(&variant.uri);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DEFAULT_CATALOG;

    #[test]
    fn renders_stream_inf_pairs_in_order() {
        let variants: Vec<MasterVariant> = DEFAULT_CATALOG
            .iter()
            .copied()
            .map(MasterVariant::for_tier)
            .collect();
        let manifest = render_master(&variants);
        assert_eq!(
            manifest,
            "#EXTM3U\n\
             #EXT-X-STREAM-INF:BANDWIDTH=400000,RESOLUTION=426x240\n\
             240p/index.m3u8\n\
             #EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=854x480\n\
             480p/index.m3u8\n\
             #EXT-X-STREAM-INF:BANDWIDTH=2000000,RESOLUTION=1280x720\n\
             720p/index.m3u8\n\
             #EXT-X-STREAM-INF:BANDWIDTH=4000000,RESOLUTION=1920x1080\n\
             1080p/index.m3u8\n"
        );
    }

    #[test]
    fn output_is_deterministic_for_the_same_variant_set() {
        let variants: Vec<MasterVariant> = DEFAULT_CATALOG
            .iter()
            .copied()
            .map(MasterVariant::for_tier)
            .collect();
        assert_eq!(render_master(&variants), render_master(&variants));
    }

    #[test]
    fn empty_variant_set_renders_header_only() {
        assert_eq!(render_master(&[]), "#EXTM3U\n");
    }
}
