//! Object key conventions for durable storage.
//!
//! Playback clients and the serving layer resolve these paths directly,
//! so the layout is part of the external contract and must not change.

pub const VIDEOS_BUCKET: &str = "videos";

pub const MASTER_PLAYLIST_NAME: &str = "master.m3u8";
pub const VARIANT_PLAYLIST_NAME: &str = "index.m3u8";
pub const SEGMENT_PATTERN: &str = "segment_%03d.ts";

pub fn video_base(owner_id: &str, asset_id: &str) -> String {
    format!("{owner_id}/{asset_id}")
}

pub fn original_object(owner_id: &str, asset_id: &str, extension: &str) -> String {
    format!("{}/original.{extension}", video_base(owner_id, asset_id))
}

pub fn variant_dir(owner_id: &str, asset_id: &str, tier_name: &str) -> String {
    format!("{}/{tier_name}", video_base(owner_id, asset_id))
}

pub fn variant_index(owner_id: &str, asset_id: &str, tier_name: &str) -> String {
    format!(
        "{}/{VARIANT_PLAYLIST_NAME}",
        variant_dir(owner_id, asset_id, tier_name)
    )
}

pub fn master_index(owner_id: &str, asset_id: &str) -> String {
    format!("{}/{MASTER_PLAYLIST_NAME}", video_base(owner_id, asset_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_layout_is_stable() {
        assert_eq!(original_object("u1", "a1", "mp4"), "u1/a1/original.mp4");
        assert_eq!(variant_index("u1", "a1", "720p"), "u1/a1/720p/index.m3u8");
        assert_eq!(master_index("u1", "a1"), "u1/a1/master.m3u8");
    }
}
