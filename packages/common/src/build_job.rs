use serde::{Deserialize, Serialize};

use crate::build_status::BuildStatus;
use crate::image::{BuildSource, DEFAULT_PLATFORM, ImageReference};

/// The user a build runs on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    pub user_id: i32,
    pub username: String,
}

/// Location of the live container a snapshot build commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSource {
    pub pod_namespace: String,
    pub pod_name: String,
    pub container_name: String,
    /// Node the pod is scheduled on; the snapshot job is pinned to it.
    pub node_name: String,
}

/// Backend-specific build input. Exactly one variant per build source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "PascalCase")]
pub enum BuildPayload {
    /// Generated Dockerfile, optionally with a `requirements.txt` to copy in.
    PipApt {
        dockerfile: String,
        requirements: Option<String>,
    },
    Dockerfile {
        dockerfile: String,
    },
    Envd {
        spec: String,
    },
    Snapshot(SnapshotSource),
}

impl BuildPayload {
    pub fn kind(&self) -> BuildSource {
        match self {
            Self::PipApt { .. } => BuildSource::PipApt,
            Self::Dockerfile { .. } => BuildSource::Dockerfile,
            Self::Envd { .. } => BuildSource::Envd,
            Self::Snapshot(_) => BuildSource::Snapshot,
        }
    }

    /// Dockerfile text for sources that build from one.
    pub fn dockerfile(&self) -> Option<&str> {
        match self {
            Self::PipApt { dockerfile, .. } | Self::Dockerfile { dockerfile } => Some(dockerfile),
            Self::Envd { .. } | Self::Snapshot(_) => None,
        }
    }
}

/// Normalized description of one build attempt, shared by every backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildJobDescriptor {
    pub job_name: String,
    pub namespace: String,
    pub owner: Owner,
    pub image: ImageReference,
    pub payload: BuildPayload,
    pub base_image: Option<String>,
    pub tags: Vec<String>,
    pub template: Option<String>,
    pub archs: Vec<String>,
    pub description: String,
}

impl BuildJobDescriptor {
    pub fn source(&self) -> BuildSource {
        self.payload.kind()
    }

    /// Comma-joined platform list as accepted by `--platform`.
    pub fn platforms(&self) -> String {
        self.archs.join(",")
    }
}

/// Replace an empty architecture list with the default platform.
pub fn normalize_archs(archs: Vec<String>) -> Vec<String> {
    let archs: Vec<String> = archs
        .into_iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect();
    if archs.is_empty() {
        vec![DEFAULT_PLATFORM.to_string()]
    } else {
        archs
    }
}

/// Values for a build record about to be persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewBuildRecord {
    pub user_id: i32,
    pub job_name: String,
    pub image_ref: String,
    pub status: BuildStatus,
    pub source: BuildSource,
    pub description: String,
    pub dockerfile: Option<String>,
    pub archs: Vec<String>,
    pub tags: Vec<String>,
    pub template: Option<String>,
}

impl NewBuildRecord {
    pub fn from_descriptor(descriptor: &BuildJobDescriptor) -> Self {
        Self {
            user_id: descriptor.owner.user_id,
            job_name: descriptor.job_name.clone(),
            image_ref: descriptor.image.to_string(),
            status: BuildStatus::Pending,
            source: descriptor.source(),
            description: descriptor.description.clone(),
            dockerfile: descriptor.payload.dockerfile().map(str::to_string),
            archs: descriptor.archs.clone(),
            tags: descriptor.tags.clone(),
            template: descriptor.template.clone(),
        }
    }
}
