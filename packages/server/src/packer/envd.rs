use std::collections::BTreeMap;

use common::{BuildJobDescriptor, DEFAULT_PLATFORM};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, EnvVar, PodSpec, Volume, VolumeMount,
};

use super::{
    BuildJobSpec, build_job, credentials_mount, credentials_volume, docker_config_env, env,
    image_output, object_meta,
};
use crate::config::{BuildConfig, ProxyConfig};

const BUILD_CONTAINER: &str = "envd";
const SPEC_VOLUME: &str = "envd-spec";
const SPEC_KEY: &str = "build.envd";
const WORKSPACE: &str = "/workspace";
const CONTEXT_NAME: &str = "remote-buildkitd";

/// The envd spec goes into a ConfigMap named after the job and is mounted
/// read-only. The job runner sets the job as the ConfigMap's owner once the
/// job exists.
///
/// envd only builds for [`DEFAULT_PLATFORM`]; other requested archs are ignored.
pub(super) fn generate(
    descriptor: &BuildJobDescriptor,
    config: &BuildConfig,
    spec: &str,
) -> BuildJobSpec {
    let config_map = ConfigMap {
        metadata: object_meta(descriptor),
        data: Some(BTreeMap::from([(SPEC_KEY.to_string(), spec.to_string())])),
        ..Default::default()
    };

    let pod = PodSpec {
        containers: vec![build_container(descriptor, config)],
        volumes: Some(vec![
            Volume {
                name: SPEC_VOLUME.to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: descriptor.job_name.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            },
            credentials_volume(config),
        ]),
        enable_service_links: Some(false),
        ..Default::default()
    };

    BuildJobSpec {
        job: build_job(descriptor, config, spec, None, pod),
        config_map: Some(config_map),
    }
}

fn build_container(descriptor: &BuildJobDescriptor, config: &BuildConfig) -> Container {
    let script = format!(
        "envd context create --name {CONTEXT_NAME} --builder tcp --builder-address {} --use && \
         envd build --path {WORKSPACE} --platform {DEFAULT_PLATFORM} --output {}",
        config.daemon.amd64_endpoint(),
        image_output(descriptor),
    );

    let mut envs = vec![docker_config_env()];
    envs.extend(proxy_env(&config.proxy));

    Container {
        name: BUILD_CONTAINER.to_string(),
        image: Some(config.images.envd.clone()),
        command: Some(vec!["/bin/sh".to_string(), "-c".to_string(), script]),
        working_dir: Some(WORKSPACE.to_string()),
        env: Some(envs),
        volume_mounts: Some(vec![
            credentials_mount(),
            VolumeMount {
                name: SPEC_VOLUME.to_string(),
                mount_path: WORKSPACE.to_string(),
                read_only: Some(true),
                ..Default::default()
            },
        ]),
        ..Default::default()
    }
}

/// Proxy variables in both spellings; empty when no proxy is configured.
fn proxy_env(proxy: &ProxyConfig) -> Vec<EnvVar> {
    let mut envs = Vec::new();
    for (names, value) in [
        (["HTTP_PROXY", "http_proxy"], &proxy.http_proxy),
        (["HTTPS_PROXY", "https_proxy"], &proxy.https_proxy),
        (["NO_PROXY", "no_proxy"], &proxy.no_proxy),
    ] {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            envs.extend(names.iter().map(|name| env(name, value)));
        }
    }
    envs
}
