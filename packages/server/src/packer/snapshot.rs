use std::collections::BTreeMap;

use common::{BuildJobDescriptor, SnapshotSource};
use k8s_openapi::api::core::v1::{
    Affinity, Container, HostPathVolumeSource, NodeAffinity, NodeSelector,
    NodeSelectorRequirement, NodeSelectorTerm, PodSpec, ResourceRequirements, SecurityContext,
    Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use super::{
    BuildJobSpec, build_job, credentials_mount, credentials_volume, docker_config_env,
};
use crate::config::BuildConfig;

const BUILD_CONTAINER: &str = "build-image";
const SOCKET_VOLUME: &str = "containerd-sock";
const CONTAINERD_SOCKET: &str = "/run/containerd/containerd.sock";

/// Commits a live container with nerdctl and pushes the result.
///
/// The container's filesystem only exists on its node, so the job is pinned
/// there and talks to that node's containerd through the host socket. This
/// is the only backend that runs privileged.
pub(super) fn generate(
    descriptor: &BuildJobDescriptor,
    config: &BuildConfig,
    source: &SnapshotSource,
) -> BuildJobSpec {
    let pod = PodSpec {
        containers: vec![snapshot_container(descriptor, config, source)],
        volumes: Some(vec![
            Volume {
                name: SOCKET_VOLUME.to_string(),
                host_path: Some(HostPathVolumeSource {
                    path: CONTAINERD_SOCKET.to_string(),
                    type_: Some("Socket".to_string()),
                }),
                ..Default::default()
            },
            credentials_volume(config),
        ]),
        affinity: Some(pin_to_node(&source.node_name)),
        ..Default::default()
    };

    BuildJobSpec {
        job: build_job(descriptor, config, "", None, pod),
        config_map: None,
    }
}

fn snapshot_container(
    descriptor: &BuildJobDescriptor,
    config: &BuildConfig,
    source: &SnapshotSource,
) -> Container {
    let command = vec![
        "/snapshot.sh".to_string(),
        "--namespace".to_string(),
        source.pod_namespace.clone(),
        "--pod-name".to_string(),
        source.pod_name.clone(),
        "--container-name".to_string(),
        source.container_name.clone(),
        "--image-url".to_string(),
        descriptor.image.to_string(),
        "--size-limit".to_string(),
        config.snapshot.size_limit_gb.to_string(),
    ];

    let resources = BTreeMap::from([
        ("cpu".to_string(), Quantity(config.snapshot.cpu.clone())),
        ("memory".to_string(), Quantity(config.snapshot.memory.clone())),
    ]);

    Container {
        name: BUILD_CONTAINER.to_string(),
        image: Some(config.images.nerdctl.clone()),
        command: Some(command),
        env: Some(vec![docker_config_env()]),
        volume_mounts: Some(vec![
            VolumeMount {
                name: SOCKET_VOLUME.to_string(),
                mount_path: CONTAINERD_SOCKET.to_string(),
                ..Default::default()
            },
            credentials_mount(),
        ]),
        security_context: Some(SecurityContext {
            privileged: Some(true),
            ..Default::default()
        }),
        resources: Some(ResourceRequirements {
            limits: Some(resources.clone()),
            requests: Some(resources),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn pin_to_node(node_name: &str) -> Affinity {
    Affinity {
        node_affinity: Some(NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                node_selector_terms: vec![NodeSelectorTerm {
                    match_expressions: Some(vec![NodeSelectorRequirement {
                        key: "kubernetes.io/hostname".to_string(),
                        operator: "In".to_string(),
                        values: Some(vec![node_name.to_string()]),
                    }]),
                    ..Default::default()
                }],
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
