//! Profile image extraction from a rendered page.

use crate::renderer::PageSnapshot;

/// Size marker in the thumbnail URLs the target site serves.
pub const THUMBNAIL_MARKER: &str = "200x200";

/// Marker substituted in to address the larger variant.
pub const FULL_SIZE_MARKER: &str = "400x400";

/// Pick the profile image from `snapshot`.
///
/// The first image, in document order, whose source contains
/// [`THUMBNAIL_MARKER`] wins; every occurrence of the marker in that source is
/// replaced with [`FULL_SIZE_MARKER`]. Later images are never considered.
pub fn extract_profile_image(snapshot: &PageSnapshot) -> Option<String> {
    snapshot
        .images
        .iter()
        .find(|image| image.source_url.contains(THUMBNAIL_MARKER))
        .map(|image| image.source_url.replace(THUMBNAIL_MARKER, FULL_SIZE_MARKER))
}
