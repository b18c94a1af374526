use std::collections::BTreeMap;

use common::BuildJobDescriptor;
use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, PodSecurityContext, PodSpec, SeccompProfile,
    SecretVolumeSource, Volume, VolumeMount,
};

use super::{
    BUILD_UID, BuildJobSpec, build_job, credentials_mount, credentials_volume, docker_config_env,
    env, image_output,
};
use crate::config::BuildConfig;

const BUILD_CONTAINER: &str = "buildkit";
const PREPARE_CONTAINER: &str = "prepare";
const WORKSPACE_VOLUME: &str = "workspace";
const CERTS_VOLUME: &str = "buildkit-certs";
const WORKSPACE: &str = "/workspace";
const CERTS_DIR: &str = "/certs";
const BUILDER_NAME: &str = "multi-platform-builder";

/// Two-stage job: an init container writes the Dockerfile into an emptyDir,
/// then buildx builds it on the remote buildkitd and pushes.
///
/// Buildx needs syscalls the default seccomp and AppArmor profiles block, so
/// this pod runs both unconfined, as uid/gid 1000. No other privilege is
/// granted.
pub(super) fn generate(
    descriptor: &BuildJobDescriptor,
    config: &BuildConfig,
    dockerfile: &str,
    requirements: Option<&str>,
) -> BuildJobSpec {
    let pod = PodSpec {
        init_containers: Some(vec![prepare_container(config, dockerfile, requirements)]),
        containers: vec![build_container(descriptor, config)],
        volumes: Some(volumes(config)),
        security_context: Some(PodSecurityContext {
            seccomp_profile: Some(SeccompProfile {
                type_: "Unconfined".to_string(),
                ..Default::default()
            }),
            run_as_user: Some(BUILD_UID),
            run_as_group: Some(BUILD_UID),
            fs_group: Some(BUILD_UID),
            ..Default::default()
        }),
        enable_service_links: Some(false),
        node_selector: Some(BTreeMap::from([(
            "kubernetes.io/arch".to_string(),
            "amd64".to_string(),
        )])),
        ..Default::default()
    };

    let pod_annotations = BTreeMap::from([(
        format!("container.apparmor.security.beta.kubernetes.io/{BUILD_CONTAINER}"),
        "unconfined".to_string(),
    )]);

    BuildJobSpec {
        job: build_job(descriptor, config, dockerfile, Some(pod_annotations), pod),
        config_map: None,
    }
}

fn prepare_container(config: &BuildConfig, dockerfile: &str, requirements: Option<&str>) -> Container {
    let script = format!(
        r#"printf '%s' "$DOCKERFILE" > {WORKSPACE}/Dockerfile && printf '%s' "$REQUIREMENTS" > {WORKSPACE}/requirements.txt"#
    );

    Container {
        name: PREPARE_CONTAINER.to_string(),
        image: Some(config.images.preparation.clone()),
        command: Some(vec!["/bin/sh".to_string(), "-c".to_string(), script]),
        env: Some(vec![
            env("DOCKERFILE", dockerfile),
            env("REQUIREMENTS", requirements.unwrap_or_default()),
        ]),
        volume_mounts: Some(vec![VolumeMount {
            name: WORKSPACE_VOLUME.to_string(),
            mount_path: WORKSPACE.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

fn build_container(descriptor: &BuildJobDescriptor, config: &BuildConfig) -> Container {
    Container {
        name: BUILD_CONTAINER.to_string(),
        image: Some(config.images.buildx.clone()),
        args: Some(vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            buildx_script(descriptor, config),
        ]),
        env: Some(vec![docker_config_env()]),
        volume_mounts: Some(vec![
            credentials_mount(),
            VolumeMount {
                name: WORKSPACE_VOLUME.to_string(),
                mount_path: WORKSPACE.to_string(),
                read_only: Some(true),
                ..Default::default()
            },
            VolumeMount {
                name: CERTS_VOLUME.to_string(),
                mount_path: CERTS_DIR.to_string(),
                read_only: Some(true),
                ..Default::default()
            },
        ]),
        ..Default::default()
    }
}

fn volumes(config: &BuildConfig) -> Vec<Volume> {
    vec![
        Volume {
            name: WORKSPACE_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
        credentials_volume(config),
        Volume {
            name: CERTS_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(config.daemon.tls_secret.clone()),
                ..Default::default()
            }),
            ..Default::default()
        },
    ]
}

fn driver_opts() -> String {
    format!("cacert={CERTS_DIR}/ca.pem,cert={CERTS_DIR}/cert.pem,key={CERTS_DIR}/key.pem")
}

/// Registers the amd64 daemon (and the arm64 one when an arm platform is
/// requested) as nodes of one remote builder, then builds and pushes.
fn buildx_script(descriptor: &BuildJobDescriptor, config: &BuildConfig) -> String {
    let opts = driver_opts();
    let mut steps = vec![format!(
        "docker buildx create --name {BUILDER_NAME} --node amd-node --driver remote --driver-opt {opts} {}",
        config.daemon.amd64_endpoint()
    )];

    let wants_arm = descriptor.archs.iter().any(|a| a.contains("arm"));
    if let (true, Some(arm)) = (wants_arm, config.daemon.arm64_endpoint()) {
        steps.push(format!(
            "docker buildx create --name {BUILDER_NAME} --append --node arm-node --driver remote --driver-opt {opts} {arm}"
        ));
    }

    steps.push(format!("docker buildx use {BUILDER_NAME}"));
    steps.push(format!(
        "docker buildx build --progress plain --platform {} --file {WORKSPACE}/Dockerfile --output {} {WORKSPACE}",
        descriptor.platforms(),
        image_output(descriptor)
    ));

    steps.join(" && ")
}
