pub mod build_job;
pub mod build_status;
pub mod image;

pub use build_job::{
    BuildJobDescriptor, BuildPayload, NewBuildRecord, Owner, SnapshotSource, normalize_archs,
};
pub use build_status::{BuildStatus, ParseStatusError};
pub use image::{
    BuildSource, DEFAULT_PLATFORM, GranteeKind, ImageReference, ImageTaskType, ImageVisibility,
    ReferenceError, short_image_name,
};
