pub mod build_record;
pub mod image_artifact;
pub mod image_grant;
