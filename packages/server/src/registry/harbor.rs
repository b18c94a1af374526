//! Harbor v2.0 REST client.

use async_trait::async_trait;
use common::ImageReference;
use rand::Rng;
use rand::distr::Alphanumeric;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use super::{ArtifactRegistry, ProjectDetail};
use crate::config::HarborConfig;
use crate::error::GatewayError;
use crate::translator::user_project;

const API_PREFIX: &str = "/api/v2.0";
const PASSWORD_LENGTH: usize = 20;
const TMP_EMAIL_DOMAIN: &str = "example.com";
/// Harbor's "Project Admin" role.
const PROJECT_ADMIN_ROLE: i32 = 1;

pub struct HarborRegistry {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    default_quota: i64,
    public_projects: bool,
}

#[derive(Debug, Deserialize)]
struct Project {
    project_id: i64,
}

#[derive(Debug, Deserialize)]
struct StorageUsage {
    #[serde(default)]
    storage: i64,
}

#[derive(Debug, Deserialize)]
struct Quota {
    id: i64,
    hard: StorageUsage,
    used: StorageUsage,
}

#[derive(Debug, Deserialize)]
struct Artifact {
    size: i64,
}

#[derive(Debug, Deserialize)]
struct UserSearchHit {
    user_id: i64,
    username: String,
}

impl HarborRegistry {
    pub fn new(config: &HarborConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            default_quota: config.default_quota_bytes,
            public_projects: config.public_projects,
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}{}", self.base_url, API_PREFIX, path))
            .basic_auth(&self.username, Some(&self.password))
    }

    /// Turn a non-success response into [`GatewayError::Api`].
    async fn check(response: Response) -> Result<Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(GatewayError::Api {
            status: status.as_u16(),
            body,
        })
    }

    async fn project_exists(&self, project: &str) -> Result<bool, GatewayError> {
        let response = self
            .request(Method::HEAD, "/projects")
            .query(&[("project_name", project)])
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            _ => Self::check(response).await.map(|_| true),
        }
    }

    async fn get_project(&self, project: &str) -> Result<Project, GatewayError> {
        let response = self
            .request(Method::GET, &format!("/projects/{}", encode(project)))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(format!("project {project}")));
        }
        Ok(Self::check(response).await?.json().await?)
    }

    async fn project_quota(&self, project_id: i64) -> Result<Quota, GatewayError> {
        let response = self
            .request(Method::GET, "/quotas")
            .query(&[
                ("reference", "project".to_string()),
                ("reference_id", project_id.to_string()),
            ])
            .send()
            .await?;
        let quotas: Vec<Quota> = Self::check(response).await?.json().await?;
        quotas
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::NotFound(format!("quota of project {project_id}")))
    }

    async fn find_user(&self, username: &str) -> Result<Option<UserSearchHit>, GatewayError> {
        let response = self
            .request(Method::GET, "/users/search")
            .query(&[("username", username)])
            .send()
            .await?;
        let hits: Vec<UserSearchHit> = Self::check(response).await?.json().await?;
        // search is a prefix match
        Ok(hits.into_iter().find(|hit| hit.username == username))
    }

    fn artifact_path(image: &ImageReference) -> String {
        // Harbor expects slashes in repository names double-encoded.
        format!(
            "/projects/{}/repositories/{}/artifacts/{}",
            encode(&image.project),
            encode(&encode(&image.repository)),
            encode(&image.tag)
        )
    }
}

fn encode(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}

/// Random password with at least one upper, lower and digit, as Harbor requires.
pub fn generate_password() -> String {
    let mut rng = rand::rng();
    loop {
        let candidate: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(PASSWORD_LENGTH)
            .map(char::from)
            .collect();
        if candidate.chars().any(|c| c.is_ascii_uppercase())
            && candidate.chars().any(|c| c.is_ascii_lowercase())
            && candidate.chars().any(|c| c.is_ascii_digit())
        {
            return candidate;
        }
    }
}

#[async_trait]
impl ArtifactRegistry for HarborRegistry {
    async fn ensure_user_project(&self, username: &str) -> Result<(), GatewayError> {
        let project = user_project(username);
        if self.project_exists(&project).await? {
            return Ok(());
        }

        let response = self
            .request(Method::POST, "/projects")
            .json(&json!({
                "project_name": project,
                "metadata": { "public": self.public_projects.to_string() },
                "storage_limit": self.default_quota,
            }))
            .send()
            .await?;
        if response.status() == StatusCode::CONFLICT {
            return Ok(());
        }
        Self::check(response).await?;

        info!(project = %project, quota = self.default_quota, "Created registry project");
        Ok(())
    }

    async fn user_exists(&self, username: &str) -> Result<bool, GatewayError> {
        Ok(self.find_user(username).await?.is_some())
    }

    async fn create_user(&self, username: &str) -> Result<String, GatewayError> {
        let password = generate_password();
        let response = self
            .request(Method::POST, "/users")
            .json(&json!({
                "username": username,
                "email": format!("{username}@{TMP_EMAIL_DOMAIN}"),
                "realname": username,
                "password": password,
                "comment": "",
            }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(password)
    }

    async fn delete_user(&self, username: &str) -> Result<(), GatewayError> {
        let user = self
            .find_user(username)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("registry user {username}")))?;
        let response = self
            .request(Method::DELETE, &format!("/users/{}", user.user_id))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn add_project_member(&self, username: &str) -> Result<(), GatewayError> {
        let project = user_project(username);
        let response = self
            .request(Method::POST, &format!("/projects/{}/members", encode(&project)))
            .json(&json!({
                "role_id": PROJECT_ADMIN_ROLE,
                "member_user": { "username": username },
            }))
            .send()
            .await?;
        if response.status() == StatusCode::CONFLICT {
            warn!(project = %project, username, "User is already a project member");
            return Ok(());
        }
        Self::check(response).await?;
        Ok(())
    }

    async fn project_detail(&self, username: &str) -> Result<ProjectDetail, GatewayError> {
        let project = user_project(username);
        if !self.project_exists(&project).await? {
            return Ok(ProjectDetail {
                project,
                used: 0,
                quota: self.default_quota,
            });
        }

        let id = self.get_project(&project).await?.project_id;
        let quota = self.project_quota(id).await?;
        Ok(ProjectDetail {
            project,
            used: quota.used.storage,
            quota: quota.hard.storage,
        })
    }

    async fn update_quota(&self, project: &str, bytes: i64) -> Result<(), GatewayError> {
        let id = self.get_project(project).await?.project_id;
        let quota = self.project_quota(id).await?;
        let response = self
            .request(Method::PUT, &format!("/quotas/{}", quota.id))
            .json(&json!({ "hard": { "storage": bytes } }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete_artifact(&self, image: &ImageReference) -> Result<(), GatewayError> {
        let response = self
            .request(Method::DELETE, &Self::artifact_path(image))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(image.to_string()));
        }
        Self::check(response).await?;
        Ok(())
    }

    async fn artifact_size(&self, image: &ImageReference) -> Result<i64, GatewayError> {
        let response = self
            .request(Method::GET, &Self::artifact_path(image))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(image.to_string()));
        }
        let artifact: Artifact = Self::check(response).await?.json().await?;
        Ok(artifact.size)
    }

    async fn artifact_reachable(&self, image: &ImageReference) -> bool {
        match self
            .request(Method::GET, &Self::artifact_path(image))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!(image = %image, error = %e, "Registry lookup failed");
                false
            }
        }
    }
}
