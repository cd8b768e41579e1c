//! Static quality catalog and the rendition planner.

use serde::Serialize;

/// One output quality tier: a target height plus the video bitrate the
/// encoder aims for. The catalog is fixed at compile time; per-asset
/// narrowing happens in [`plan_renditions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct QualityTier {
    pub name: &'static str,
    pub height: u32,
    /// Target video bitrate in bits per second.
    pub bitrate: u32,
}

impl QualityTier {
    /// Resolution advertised in the master playlist, assuming 16:9
    /// source material. Width is rounded to the nearest even pixel to
    /// match the encoder's `scale=-2:h` output.
    pub fn resolution(&self) -> (u32, u32) {
        let width = ((self.height as f64 * 16.0 / 9.0 / 2.0).round() as u32) * 2;
        (width, self.height)
    }
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

pub const DEFAULT_CATALOG: [QualityTier; 4] = [
    QualityTier {
        name: "240p",
        height: 240,
        bitrate: 400_000,
    },
    QualityTier {
        name: "480p",
        height: 480,
        bitrate: 800_000,
    },
    QualityTier {
        name: "720p",
        height: 720,
        bitrate: 2_000_000,
    },
    QualityTier {
        name: "1080p",
        height: 1080,
        bitrate: 4_000_000,
    },
];

/// Returns the tiers worth producing for a source of the given height,
/// preserving catalog order. Tiers taller than the source are dropped
/// so the pipeline never upscales. An empty result is valid: the job
/// then publishes a manifest with no variants.
pub fn plan_renditions(source_height: u32, catalog: &[QualityTier]) -> Vec<QualityTier> {
    catalog
        .iter()
        .copied()
        .filter(|tier| tier.height <= source_height)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planner_never_upscales() {
        for height in [0, 120, 239, 240, 480, 719, 1080, 2160] {
            let planned = plan_renditions(height, &DEFAULT_CATALOG);
            assert!(planned.iter().all(|tier| tier.height <= height));
        }
    }

    #[test]
    fn planner_preserves_catalog_order() {
        let planned = plan_renditions(1080, &DEFAULT_CATALOG);
        let names: Vec<&str> = planned.iter().map(|tier| tier.name).collect();
        assert_eq!(names, vec!["240p", "480p", "720p", "1080p"]);
    }

    #[test]
    fn planner_drops_tiers_above_source() {
        let planned = plan_renditions(360, &DEFAULT_CATALOG);
        let names: Vec<&str> = planned.iter().map(|tier| tier.name).collect();
        assert_eq!(names, vec!["240p"]);
    }

    #[test]
    fn planner_yields_empty_for_tiny_sources() {
        assert!(plan_renditions(144, &DEFAULT_CATALOG).is_empty());
    }

    #[test]
    fn resolution_rounds_width_to_even() {
        assert_eq!(DEFAULT_CATALOG[0].resolution(), (426, 240));
        assert_eq!(DEFAULT_CATALOG[1].resolution(), (854, 480));
        assert_eq!(DEFAULT_CATALOG[2].resolution(), (1280, 720));
        assert_eq!(DEFAULT_CATALOG[3].resolution(), (1920, 1080));
    }
}
