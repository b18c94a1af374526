#[cfg(feature = "sea-orm")]
use sea_orm::prelude::StringLen;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Platform every build targets when the request names none.
pub const DEFAULT_PLATFORM: &str = "linux/amd64";

/// Where the content of a build comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "PascalCase")]
pub enum BuildSource {
    /// Dockerfile generated from pip/apt package lists.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "PipApt"))]
    PipApt,
    /// Dockerfile supplied by the user.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Dockerfile"))]
    Dockerfile,
    /// envd build spec supplied by the user.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Envd"))]
    Envd,
    /// Commit of a live container.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Snapshot"))]
    Snapshot,
}

impl BuildSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PipApt => "PipApt",
            Self::Dockerfile => "Dockerfile",
            Self::Envd => "Envd",
            Self::Snapshot => "Snapshot",
        }
    }
}

impl fmt::Display for BuildSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "PascalCase")]
pub enum ImageVisibility {
    #[default]
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Private"))]
    Private,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Public"))]
    Public,
}

/// Workload class an image is meant for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "PascalCase")]
pub enum ImageTaskType {
    #[default]
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Custom"))]
    Custom,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Jupyter"))]
    Jupyter,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "PyTorch"))]
    PyTorch,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Tensorflow"))]
    Tensorflow,
}

/// Who an image share grant points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "PascalCase")]
pub enum GranteeKind {
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "User"))]
    User,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Account"))]
    Account,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid image reference '{0}': expected <registry>/<project>/<repository>:<tag>")]
pub struct ReferenceError(pub String);

/// A fully qualified reference of the form `registry/project/repository:tag`.
///
/// The repository part may itself contain slashes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageReference {
    pub registry: String,
    pub project: String,
    pub repository: String,
    pub tag: String,
}

impl ImageReference {
    pub fn new(
        registry: impl Into<String>,
        project: impl Into<String>,
        repository: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            registry: registry.into(),
            project: project.into(),
            repository: repository.into(),
            tag: tag.into(),
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}:{}",
            self.registry, self.project, self.repository, self.tag
        )
    }
}

impl FromStr for ImageReference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ReferenceError(s.to_string());

        let (registry, rest) = s.split_once('/').ok_or_else(invalid)?;
        let (project, rest) = rest.split_once('/').ok_or_else(invalid)?;
        // The tag separator is the last ':' after the last '/'.
        let (repository, tag) = rest.rsplit_once(':').ok_or_else(invalid)?;

        if [registry, project, repository, tag]
            .iter()
            .any(|part| part.is_empty())
            || tag.contains('/')
        {
            return Err(invalid());
        }

        Ok(Self::new(registry, project, repository, tag))
    }
}

/// Last path segment of an image name without tag or digest, e.g.
/// `docker.io/library/ubuntu:22.04` -> `ubuntu`.
pub fn short_image_name(image: &str) -> &str {
    let without_digest = image.split('@').next().unwrap_or(image);
    let name = without_digest
        .rsplit('/')
        .next()
        .unwrap_or(without_digest);
    name.split(':').next().unwrap_or(name)
}
