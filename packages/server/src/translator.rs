//! Turns typed build requests into a [`BuildJobDescriptor`] and the record
//! that tracks it.

use common::{
    BuildJobDescriptor, BuildPayload, ImageReference, NewBuildRecord, Owner, SnapshotSource,
    normalize_archs, short_image_name,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::BuildConfig;
use crate::error::{BuildError, BuildResult};

const DEFAULT_TAG: &str = "latest";
const SNAPSHOT_TAG: &str = "snapshot";
const ENVD_IMAGE_NAME: &str = "envd";
const JOB_SUFFIX_LEN: usize = 5;
// Job names double as `job-name` label values, capped at 63 chars.
const JOB_PREFIX_MAX_LEN: usize = 40;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DockerfileError {
    #[error("malformed Dockerfile: no FROM instruction found")]
    NoFromInstruction,
    #[error("malformed Dockerfile: line continuation after the last line")]
    UnterminatedContinuation,
    #[error("malformed Dockerfile: invalid FROM instruction '{0}'")]
    InvalidFrom(String),
}

/// Build from a base image plus apt packages and pip requirements.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipAptRequest {
    pub source_image: String,
    /// Entries may themselves hold several space-separated package names.
    #[serde(default)]
    pub apt_packages: Vec<String>,
    /// Contents of a `requirements.txt`.
    #[serde(default)]
    pub python_requirements: String,
    pub name: Option<String>,
    pub tag: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub template: Option<String>,
    #[serde(default)]
    pub archs: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DockerfileRequest {
    pub dockerfile: String,
    pub name: Option<String>,
    pub tag: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub template: Option<String>,
    #[serde(default)]
    pub archs: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvdRequest {
    pub envd: String,
    /// Python version, used to derive the default tag.
    pub python: Option<String>,
    /// Base image the envd spec builds on, used to derive the default tag.
    pub base: Option<String>,
    pub name: Option<String>,
    pub tag: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub template: Option<String>,
    #[serde(default)]
    pub archs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRequest {
    pub source: SnapshotSource,
    /// Image the source container runs; names the snapshot by default.
    pub source_image: String,
    pub name: Option<String>,
    pub tag: Option<String>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "PascalCase")]
pub enum BuildRequest {
    PipApt(PipAptRequest),
    Dockerfile(DockerfileRequest),
    Envd(EnvdRequest),
    Snapshot(SnapshotRequest),
}

/// Output of [`translate`]: what to run and what to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Translation {
    pub descriptor: BuildJobDescriptor,
    pub record: NewBuildRecord,
}

/// `{username}-{5 random hex chars}`, as a valid RFC 1123 label.
///
/// The username is lowercased and anything outside `[a-z0-9-]` becomes `-`.
pub fn generate_job_name(username: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", job_name_prefix(username), &id[..JOB_SUFFIX_LEN])
}

fn job_name_prefix(username: &str) -> String {
    let mapped: String = username
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                c
            } else {
                '-'
            }
        })
        .collect();

    let mut prefix = mapped.trim_matches('-').to_string();
    prefix.truncate(JOB_PREFIX_MAX_LEN);
    let prefix = prefix.trim_end_matches('-');
    if prefix.is_empty() {
        "build".to_string()
    } else {
        prefix.to_string()
    }
}

pub fn translate(
    request: BuildRequest,
    owner: &Owner,
    config: &BuildConfig,
) -> BuildResult<Translation> {
    translate_named(request, owner, config, generate_job_name(&owner.username))
}

/// Same as [`translate`] with a caller-chosen job name.
pub fn translate_named(
    request: BuildRequest,
    owner: &Owner,
    config: &BuildConfig,
    job_name: String,
) -> BuildResult<Translation> {
    if owner.username.trim().is_empty() {
        return Err(BuildError::Validation("username is required".into()));
    }

    let parts = match request {
        BuildRequest::PipApt(req) => pip_apt_parts(req, config)?,
        BuildRequest::Dockerfile(req) => dockerfile_parts(req)?,
        BuildRequest::Envd(req) => envd_parts(req)?,
        BuildRequest::Snapshot(req) => snapshot_parts(req)?,
    };

    let image = resolve_image_reference(
        &config.registry_server,
        &owner.username,
        &parts.image_name,
        &parts.image_tag,
    )?;

    let descriptor = BuildJobDescriptor {
        job_name,
        namespace: config.namespace.clone(),
        owner: owner.clone(),
        image,
        payload: parts.payload,
        base_image: parts.base_image,
        tags: parts.tags,
        template: parts.template.filter(|t| !t.is_empty()),
        archs: normalize_archs(parts.archs),
        description: parts.description,
    };
    let record = NewBuildRecord::from_descriptor(&descriptor);

    Ok(Translation { descriptor, record })
}

struct Parts {
    payload: BuildPayload,
    base_image: Option<String>,
    image_name: String,
    image_tag: String,
    tags: Vec<String>,
    template: Option<String>,
    archs: Vec<String>,
    description: String,
}

fn pip_apt_parts(req: PipAptRequest, config: &BuildConfig) -> BuildResult<Parts> {
    let source_image = req.source_image.trim();
    if source_image.is_empty() {
        return Err(BuildError::Validation("source image is required".into()));
    }

    let packages: Vec<&str> = req
        .apt_packages
        .iter()
        .flat_map(|p| p.split_whitespace())
        .collect();
    let dockerfile = generate_dockerfile(
        source_image,
        &packages,
        &req.python_requirements,
        &config.pip_index_url,
    );
    let requirements = Some(req.python_requirements).filter(|r| !r.trim().is_empty());

    Ok(Parts {
        payload: BuildPayload::PipApt {
            dockerfile,
            requirements,
        },
        image_name: pick(req.name, || short_image_name(source_image).to_string()),
        image_tag: pick(req.tag, || DEFAULT_TAG.to_string()),
        base_image: Some(source_image.to_string()),
        tags: req.tags,
        template: req.template,
        archs: req.archs,
        description: req.description,
    })
}

fn dockerfile_parts(req: DockerfileRequest) -> BuildResult<Parts> {
    let base_image = extract_base_image(&req.dockerfile)?;

    Ok(Parts {
        image_name: pick(req.name, || short_image_name(&base_image).to_string()),
        image_tag: pick(req.tag, || DEFAULT_TAG.to_string()),
        payload: BuildPayload::Dockerfile {
            dockerfile: req.dockerfile,
        },
        base_image: Some(base_image),
        tags: req.tags,
        template: req.template,
        archs: req.archs,
        description: req.description,
    })
}

fn envd_parts(req: EnvdRequest) -> BuildResult<Parts> {
    if req.envd.trim().is_empty() {
        return Err(BuildError::Validation("envd spec is required".into()));
    }

    let derived_tag = envd_default_tag(req.python.as_deref(), req.base.as_deref());
    Ok(Parts {
        payload: BuildPayload::Envd { spec: req.envd },
        image_name: pick(req.name, || ENVD_IMAGE_NAME.to_string()),
        image_tag: pick(req.tag, || derived_tag),
        base_image: req.base.filter(|b| !b.trim().is_empty()),
        tags: req.tags,
        template: req.template,
        archs: req.archs,
        description: req.description,
    })
}

fn snapshot_parts(req: SnapshotRequest) -> BuildResult<Parts> {
    let source = &req.source;
    for (field, value) in [
        ("pod namespace", &source.pod_namespace),
        ("pod name", &source.pod_name),
        ("container name", &source.container_name),
        ("node name", &source.node_name),
    ] {
        if value.trim().is_empty() {
            return Err(BuildError::Validation(format!("{field} is required")));
        }
    }

    Ok(Parts {
        image_name: pick(req.name, || short_image_name(&req.source_image).to_string()),
        image_tag: pick(req.tag, || SNAPSHOT_TAG.to_string()),
        base_image: Some(req.source_image).filter(|s| !s.trim().is_empty()),
        payload: BuildPayload::Snapshot(req.source),
        tags: Vec::new(),
        template: None,
        archs: Vec::new(),
        description: req.description,
    })
}

/// Use the requested value if it has content, the fallback otherwise.
fn pick(requested: Option<String>, fallback: impl FnOnce() -> String) -> String {
    requested
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(fallback)
}

fn envd_default_tag(python: Option<&str>, base: Option<&str>) -> String {
    let mut parts = Vec::new();
    if let Some(py) = python.map(str::trim).filter(|p| !p.is_empty()) {
        parts.push(format!("py{py}"));
    }
    if let Some(base) = base.map(str::trim).filter(|b| !b.is_empty()) {
        let tag = base
            .rsplit_once(':')
            .map(|(_, t)| t)
            .filter(|t| !t.contains('/'))
            .unwrap_or(DEFAULT_TAG);
        parts.push(format!("{}-{}", short_image_name(base), tag));
    }
    if parts.is_empty() {
        DEFAULT_TAG.to_string()
    } else {
        sanitize_tag(&parts.join("-"))
    }
}

fn sanitize_tag(tag: &str) -> String {
    tag.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '-'
            }
        })
        .take(128)
        .collect()
}

/// `{registry}/user-{username}/{name}:{tag}`.
///
/// Resubmitting the same name and tag yields the same reference and
/// overwrites the previous image.
pub fn resolve_image_reference(
    registry: &str,
    username: &str,
    name: &str,
    tag: &str,
) -> BuildResult<ImageReference> {
    let name = name.to_ascii_lowercase();
    let name_ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/'))
        && !name.starts_with(['.', '_', '-', '/'])
        && !name.ends_with('/');
    if !name_ok {
        return Err(BuildError::Validation(format!("invalid image name '{name}'")));
    }

    let tag_ok = !tag.is_empty()
        && tag.len() <= 128
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        && !tag.starts_with(['.', '-']);
    if !tag_ok {
        return Err(BuildError::Validation(format!("invalid image tag '{tag}'")));
    }

    Ok(ImageReference::new(
        registry,
        user_project(username),
        name,
        tag,
    ))
}

/// Registry project that holds a user's images.
pub fn user_project(username: &str) -> String {
    format!("user-{username}")
}

/// Render the Dockerfile for a pip/apt build.
pub fn generate_dockerfile(
    source_image: &str,
    apt_packages: &[&str],
    python_requirements: &str,
    pip_index_url: &str,
) -> String {
    let apt_section = if apt_packages.is_empty() {
        "\n# No APT packages specified".to_string()
    } else {
        format!(
            "\n# Install APT packages\n\
             RUN apt-get update && apt-get install -y {} && \\\n    \
             rm -rf /var/lib/apt/lists/*",
            apt_packages.join(" ")
        )
    };

    let requirements_section = if python_requirements.trim().is_empty() {
        "\n# No Python dependencies specified".to_string()
    } else {
        format!(
            "\n# Install Python dependencies\n\
             COPY requirements.txt /requirements.txt\n\
             RUN pip install --extra-index-url {pip_index_url} --no-cache-dir -r /requirements.txt\n"
        )
    };

    format!("FROM {source_image}\nUSER root\n{apt_section}\n{requirements_section}\n")
}

/// Find the image named by the first `FROM` instruction.
///
/// Blank lines and comments are skipped, continuation lines are joined,
/// `--flag` options and a trailing `AS <stage>` are ignored. The image is the
/// last remaining operand.
pub fn extract_base_image(dockerfile: &str) -> Result<String, DockerfileError> {
    let lines: Vec<&str> = dockerfile.lines().collect();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i].trim();
        if line.is_empty() || line.starts_with('#') || !is_from(line) {
            i += 1;
            continue;
        }

        let mut joined = line.to_string();
        while let Some(head) = joined.strip_suffix('\\') {
            let head = head.trim_end().to_string();
            i += 1;
            let next = lines
                .get(i)
                .ok_or(DockerfileError::UnterminatedContinuation)?;
            joined = format!("{} {}", head, next.trim());
        }

        let mut operands: Vec<&str> = joined
            .split_whitespace()
            .skip(1)
            .filter(|t| !t.starts_with("--"))
            .collect();
        if operands.len() >= 2 && operands[operands.len() - 2].eq_ignore_ascii_case("as") {
            operands.truncate(operands.len() - 2);
        }

        return operands
            .last()
            .map(|image| image.to_string())
            .ok_or(DockerfileError::InvalidFrom(joined));
    }

    Err(DockerfileError::NoFromInstruction)
}

fn is_from(line: &str) -> bool {
    let mut tokens = line.split_whitespace();
    tokens
        .next()
        .is_some_and(|first| first == "FROM" || first.strip_suffix('\\') == Some("FROM"))
}
