#[cfg(feature = "sea-orm")]
use sea_orm::prelude::StringLen;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of one build attempt.
///
/// When the `sea-orm` feature is enabled, this enum can be used directly in SeaORM entities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "PascalCase")]
pub enum BuildStatus {
    /// Accepted, job not yet confirmed by the cluster.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Pending"))]
    Pending,
    /// Job submitted and running (or waiting for a node).
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Building"))]
    Building,
    /// Image pushed to the registry.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Finished"))]
    Finished,
    /// Job failed.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Failed"))]
    Failed,
    /// Job removed before it completed.
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "Canceled"))]
    Canceled,
}

impl BuildStatus {
    /// Returns true if no further automatic transition can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::Canceled)
    }

    /// All possible status values.
    pub const ALL: &'static [BuildStatus] = &[
        Self::Pending,
        Self::Building,
        Self::Finished,
        Self::Failed,
        Self::Canceled,
    ];

    /// Statuses a build attempt can still leave.
    pub const ACTIVE: &'static [BuildStatus] = &[Self::Pending, Self::Building];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Building => "Building",
            Self::Finished => "Finished",
            Self::Failed => "Failed",
            Self::Canceled => "Canceled",
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for BuildStatus {
    fn default() -> Self {
        Self::Pending
    }
}

/// Error when parsing an invalid status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStatusError {
    invalid: String,
}

impl fmt::Display for ParseStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid build status '{}'. Valid values: {}",
            self.invalid,
            BuildStatus::ALL
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

impl std::error::Error for ParseStatusError {}

impl FromStr for BuildStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BuildStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError {
                invalid: s.to_string(),
            })
    }
}
