pub mod descriptor;
pub mod media_ref;

pub use descriptor::{StreamDescriptor, SubtitleTrack};
pub use media_ref::{MediaKind, MediaRef, MediaType};
