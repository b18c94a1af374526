use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobStatus};
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, Client};
use tracing::{info, warn};

use super::{JobRunner, JobState, PodIdentity};
use crate::error::GatewayError;
use crate::packer::{BuildJobSpec, job_owner_reference};

/// [`JobRunner`] backed by the Kubernetes batch API.
#[derive(Clone)]
pub struct KubeJobRunner {
    client: Client,
}

impl KubeJobRunner {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Client from the in-cluster environment or the local kubeconfig.
    pub async fn try_default() -> Result<Self, GatewayError> {
        Ok(Self::new(Client::try_default().await?))
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

fn state_from_status(status: Option<&JobStatus>) -> JobState {
    let Some(status) = status else {
        return JobState::Active;
    };

    let condition = |kind: &str| {
        status
            .conditions
            .iter()
            .flatten()
            .any(|c| c.type_ == kind && c.status == "True")
    };

    if condition("Complete") || status.succeeded.unwrap_or(0) > 0 {
        JobState::Succeeded
    } else if condition("Failed") {
        JobState::Failed
    } else {
        JobState::Active
    }
}

#[async_trait]
impl JobRunner for KubeJobRunner {
    async fn submit(&self, spec: &BuildJobSpec) -> Result<(), GatewayError> {
        let namespace = spec.namespace();
        let jobs = self.jobs(namespace);
        let created = jobs.create(&PostParams::default(), &spec.job).await?;
        info!(job_name = spec.name(), namespace, "Created build job");

        let Some(config_map) = &spec.config_map else {
            return Ok(());
        };

        let mut config_map = config_map.clone();
        config_map.metadata.owner_references = job_owner_reference(&created).map(|r| vec![r]);

        let config_maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        if let Err(e) = config_maps.create(&PostParams::default(), &config_map).await {
            warn!(
                job_name = spec.name(),
                error = %e,
                "Failed to create build config map, removing job"
            );
            if let Err(cleanup) = self.delete(spec.name(), namespace).await {
                warn!(job_name = spec.name(), error = %cleanup, "Failed to remove job");
            }
            return Err(e.into());
        }

        Ok(())
    }

    async fn delete(&self, job_name: &str, namespace: &str) -> Result<(), GatewayError> {
        match self
            .jobs(namespace)
            .delete(job_name, &DeleteParams::foreground())
            .await
        {
            Ok(_) => {
                info!(job_name, namespace, "Deleted build job");
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_pod(
        &self,
        job_name: &str,
        namespace: &str,
    ) -> Result<Option<PodIdentity>, GatewayError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods
            .list(&ListParams::default().labels(&format!("job-name={job_name}")))
            .await?;

        Ok(list.items.into_iter().find_map(|pod| {
            Some(PodIdentity {
                name: pod.metadata.name?,
                namespace: pod
                    .metadata
                    .namespace
                    .unwrap_or_else(|| namespace.to_string()),
            })
        }))
    }

    async fn job_state(&self, job_name: &str, namespace: &str) -> Result<JobState, GatewayError> {
        let job = self.jobs(namespace).get_opt(job_name).await?;
        Ok(match job {
            None => JobState::Missing,
            Some(job) => state_from_status(job.status.as_ref()),
        })
    }
}
