use serde::Serialize;
use tracing::{error, info, instrument};

use super::BuildLifecycle;
use crate::error::{BuildError, BuildResult, GatewayError};
use crate::registry::ProjectDetail;
use crate::translator::user_project;

/// Login for the user's registry account. The password is only ever
/// returned here.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryCredential {
    pub username: String,
    pub password: String,
}

fn registry_error(action: &'static str, username: &str, err: GatewayError) -> BuildError {
    error!(username, error = %err, "Registry {action} failed");
    BuildError::Internal(format!("registry {action}: {err}"))
}

impl BuildLifecycle {
    pub async fn project_detail(&self, username: &str) -> BuildResult<ProjectDetail> {
        self.bounded(self.registry.project_detail(username))
            .await
            .map_err(|e| registry_error("project lookup", username, e))
    }

    #[instrument(skip(self))]
    pub async fn update_quota(&self, username: &str, bytes: i64) -> BuildResult<()> {
        if bytes <= 0 {
            return Err(BuildError::Validation("quota must be positive".into()));
        }
        let project = user_project(username);
        self.bounded(self.registry.update_quota(&project, bytes))
            .await
            .map_err(|e| registry_error("quota update", username, e))?;
        info!(project = %project, bytes, "Updated project quota");
        Ok(())
    }

    /// Reset the user's registry account and hand out a fresh password.
    #[instrument(skip(self))]
    pub async fn issue_registry_credential(&self, username: &str) -> BuildResult<RegistryCredential> {
        let registry = &self.registry;

        self.bounded(registry.ensure_user_project(username))
            .await
            .map_err(|e| registry_error("project setup", username, e))?;

        let exists = self
            .bounded(registry.user_exists(username))
            .await
            .map_err(|e| registry_error("user lookup", username, e))?;
        if exists {
            self.bounded(registry.delete_user(username))
                .await
                .map_err(|e| registry_error("user removal", username, e))?;
        }

        let password = self
            .bounded(registry.create_user(username))
            .await
            .map_err(|e| registry_error("user creation", username, e))?;

        self.bounded(registry.add_project_member(username))
            .await
            .map_err(|e| registry_error("membership", username, e))?;

        info!(username, recreated = exists, "Issued registry credential");
        Ok(RegistryCredential {
            username: username.to_string(),
            password,
        })
    }
}
