//! Cluster job generation, one generator per build backend.

mod dockerfile;
mod envd;
mod snapshot;

use std::collections::BTreeMap;

use common::{BuildJobDescriptor, BuildPayload};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, EnvVar, KeyToPath, PodSpec, PodTemplateSpec, SecretVolumeSource, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

use crate::config::BuildConfig;

pub const ANNOTATION_USER_ID: &str = "build-data/UserID";
pub const ANNOTATION_IMAGE_LINK: &str = "build-data/ImageLink";
pub const ANNOTATION_SCRIPT: &str = "build-data/Script";
pub const ANNOTATION_DESCRIPTION: &str = "build-data/Description";
pub const ANNOTATION_TAGS: &str = "build-data/Tags";
pub const ANNOTATION_SOURCE: &str = "build-data/Source";
pub const ANNOTATION_TEMPLATE: &str = "build-data/Template";
pub const ANNOTATION_ARCHS: &str = "build-data/Archs";

pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "imagepack";

const CREDENTIALS_VOLUME: &str = "registry-credentials";
const DOCKER_CONFIG_DIR: &str = "/.docker";

/// Non-root identity shared by the build containers.
const BUILD_UID: i64 = 1000;

/// Everything the job runner has to create for one build.
#[derive(Debug, Clone)]
pub struct BuildJobSpec {
    pub job: Job,
    /// Created after the job and owned by it.
    pub config_map: Option<ConfigMap>,
}

impl BuildJobSpec {
    pub fn name(&self) -> &str {
        self.job.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.job.metadata.namespace.as_deref().unwrap_or_default()
    }
}

/// Build the cluster objects for a descriptor.
pub fn generate(descriptor: &BuildJobDescriptor, config: &BuildConfig) -> BuildJobSpec {
    match &descriptor.payload {
        BuildPayload::PipApt {
            dockerfile,
            requirements,
        } => dockerfile::generate(descriptor, config, dockerfile, requirements.as_deref()),
        BuildPayload::Dockerfile { dockerfile } => {
            dockerfile::generate(descriptor, config, dockerfile, None)
        }
        BuildPayload::Envd { spec } => envd::generate(descriptor, config, spec),
        BuildPayload::Snapshot(source) => snapshot::generate(descriptor, config, source),
    }
}

/// Owner reference that ties a dependent object's lifetime to the job.
///
/// Returns `None` until the job has been created and carries a UID.
pub fn job_owner_reference(job: &Job) -> Option<OwnerReference> {
    Some(OwnerReference {
        api_version: "batch/v1".to_string(),
        kind: "Job".to_string(),
        name: job.metadata.name.clone()?,
        uid: job.metadata.uid.clone()?,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

fn labels(descriptor: &BuildJobDescriptor) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string()),
        ("imagepack/user-id".to_string(), descriptor.owner.user_id.to_string()),
        ("imagepack/source".to_string(), descriptor.source().to_string()),
    ])
}

fn annotations(descriptor: &BuildJobDescriptor, script: &str) -> BTreeMap<String, String> {
    fn json_list(items: &[String]) -> String {
        serde_json::to_string(items).unwrap_or_default()
    }

    BTreeMap::from([
        (ANNOTATION_USER_ID.to_string(), descriptor.owner.user_id.to_string()),
        (ANNOTATION_IMAGE_LINK.to_string(), descriptor.image.to_string()),
        (ANNOTATION_SCRIPT.to_string(), script.to_string()),
        (ANNOTATION_DESCRIPTION.to_string(), descriptor.description.clone()),
        (ANNOTATION_TAGS.to_string(), json_list(&descriptor.tags)),
        (ANNOTATION_SOURCE.to_string(), descriptor.source().to_string()),
        (
            ANNOTATION_TEMPLATE.to_string(),
            descriptor.template.clone().unwrap_or_default(),
        ),
        (ANNOTATION_ARCHS.to_string(), json_list(&descriptor.archs)),
    ])
}

fn object_meta(descriptor: &BuildJobDescriptor) -> ObjectMeta {
    ObjectMeta {
        name: Some(descriptor.job_name.clone()),
        namespace: Some(descriptor.namespace.clone()),
        labels: Some(labels(descriptor)),
        ..Default::default()
    }
}

/// Wrap a pod spec in a single-run job with the configured lifetime limits.
fn build_job(
    descriptor: &BuildJobDescriptor,
    config: &BuildConfig,
    script: &str,
    pod_annotations: Option<BTreeMap<String, String>>,
    pod: PodSpec,
) -> Job {
    let mut meta = object_meta(descriptor);
    meta.annotations = Some(annotations(descriptor, script));

    Job {
        metadata: meta,
        spec: Some(JobSpec {
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(descriptor)),
                    annotations: pod_annotations,
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_string()),
                    ..pod
                }),
            },
            ttl_seconds_after_finished: Some(config.ttl_seconds_after_finished),
            backoff_limit: Some(config.backoff_limit),
            completions: Some(1),
            parallelism: Some(1),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// The dockerconfigjson secret, projected as `config.json`.
fn credentials_volume(config: &BuildConfig) -> Volume {
    Volume {
        name: CREDENTIALS_VOLUME.to_string(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(config.registry_secret.clone()),
            items: Some(vec![KeyToPath {
                key: ".dockerconfigjson".to_string(),
                path: "config.json".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Mounts only the file so the rest of `/.docker` stays writable.
fn credentials_mount() -> VolumeMount {
    VolumeMount {
        name: CREDENTIALS_VOLUME.to_string(),
        mount_path: format!("{DOCKER_CONFIG_DIR}/config.json"),
        sub_path: Some("config.json".to_string()),
        read_only: Some(true),
        ..Default::default()
    }
}

fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn docker_config_env() -> EnvVar {
    env("DOCKER_CONFIG", DOCKER_CONFIG_DIR)
}

fn image_output(descriptor: &BuildJobDescriptor) -> String {
    format!("type=image,name={},push=true", descriptor.image)
}
