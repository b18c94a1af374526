use std::sync::atomic::Ordering;

use ::common::{BuildSource, BuildStatus};
use imagepack::error::BuildError;
use imagepack::translator::{BuildRequest, DockerfileRequest, EnvdRequest, PipAptRequest};

use crate::common::{TestHarness, admin, alice, bob, dockerfile_request};

mod submit_build {
    use super::*;

    #[tokio::test]
    async fn dockerfile_build_starts_building() {
        let h = TestHarness::new();

        let build = h
            .lifecycle
            .submit_build(&alice(), dockerfile_request("torch", "v1"))
            .await
            .unwrap();

        assert_eq!(build.status, BuildStatus::Building);
        assert_eq!(build.source, BuildSource::Dockerfile);
        assert_eq!(build.user_id, 1);
        assert_eq!(build.image_ref, "harbor.local/user-alice/torch:v1");
        assert!(build.job_name.starts_with("alice-"));
        assert_eq!(
            build.dockerfile.as_deref(),
            Some("FROM python:3.12-slim\nRUN pip install numpy\n")
        );
        assert_eq!(h.runner.submitted(), vec![build.job_name.clone()]);
        assert!(h.registry.has_project("alice"));
    }

    #[tokio::test]
    async fn empty_archs_default_to_amd64() {
        let h = TestHarness::new();

        let build = h
            .lifecycle
            .submit_build(&alice(), dockerfile_request("torch", "v1"))
            .await
            .unwrap();

        assert_eq!(build.archs, serde_json::json!(["linux/amd64"]));
    }

    #[tokio::test]
    async fn requested_archs_are_kept() {
        let h = TestHarness::new();
        let request = BuildRequest::Dockerfile(DockerfileRequest {
            dockerfile: "FROM ubuntu:22.04\n".into(),
            archs: vec!["linux/amd64".into(), "linux/arm64".into()],
            ..Default::default()
        });

        let build = h.lifecycle.submit_build(&alice(), request).await.unwrap();

        assert_eq!(build.archs, serde_json::json!(["linux/amd64", "linux/arm64"]));
        assert_eq!(build.image_ref, "harbor.local/user-alice/ubuntu:latest");
    }

    #[tokio::test]
    async fn pip_apt_build_records_generated_dockerfile() {
        let h = TestHarness::new();
        let request = BuildRequest::PipApt(PipAptRequest {
            source_image: "nvcr.io/nvidia/pytorch:24.01-py3".into(),
            apt_packages: vec!["git vim".into()],
            python_requirements: "transformers\n".into(),
            ..Default::default()
        });

        let build = h.lifecycle.submit_build(&alice(), request).await.unwrap();

        assert_eq!(build.source, BuildSource::PipApt);
        let dockerfile = build.dockerfile.unwrap();
        assert!(dockerfile.starts_with("FROM nvcr.io/nvidia/pytorch:24.01-py3\n"));
        assert!(dockerfile.contains("apt-get install -y git vim"));
        assert!(dockerfile.contains("pip install"));
    }

    #[tokio::test]
    async fn envd_build_has_no_dockerfile() {
        let h = TestHarness::new();
        let request = BuildRequest::Envd(EnvdRequest {
            envd: "def build():\n    base(dev=True)\n".into(),
            ..Default::default()
        });

        let build = h.lifecycle.submit_build(&alice(), request).await.unwrap();

        assert_eq!(build.source, BuildSource::Envd);
        assert_eq!(build.dockerfile, None);
        assert_eq!(h.runner.submitted().len(), 1);
    }

    #[tokio::test]
    async fn malformed_dockerfile_is_rejected_before_submission() {
        let h = TestHarness::new();
        let request = BuildRequest::Dockerfile(DockerfileRequest {
            dockerfile: "RUN echo hi\n".into(),
            ..Default::default()
        });

        let err = h.lifecycle.submit_build(&alice(), request).await.unwrap_err();

        assert!(matches!(err, BuildError::Validation(_)));
        assert!(h.runner.submitted().is_empty());
        assert!(h.store.builds().is_empty());
    }

    #[tokio::test]
    async fn registry_failure_creates_nothing() {
        let h = TestHarness::new();
        h.registry.fail_ensure_project.store(true, Ordering::SeqCst);

        let err = h
            .lifecycle
            .submit_build(&alice(), dockerfile_request("torch", "v1"))
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::Submission(_)));
        assert!(h.runner.submitted().is_empty());
        assert!(h.store.builds().is_empty());
    }

    #[tokio::test]
    async fn job_submission_failure_creates_no_record() {
        let h = TestHarness::new();
        h.runner.fail_submit.store(true, Ordering::SeqCst);

        let err = h
            .lifecycle
            .submit_build(&alice(), dockerfile_request("torch", "v1"))
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::Submission(_)));
        assert!(h.store.builds().is_empty());
    }

    #[tokio::test]
    async fn record_failure_removes_the_submitted_job() {
        let h = TestHarness::new();
        h.store.fail_build_create.store(true, Ordering::SeqCst);

        let err = h
            .lifecycle
            .submit_build(&alice(), dockerfile_request("torch", "v1"))
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::Internal(_)));
        let submitted = h.runner.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(h.runner.deleted(), submitted);
        assert!(!h.runner.has_job(&submitted[0]));
    }
}

mod queries {
    use super::*;

    #[tokio::test]
    async fn owner_and_admin_can_read_a_build() {
        let h = TestHarness::new();
        let build = h.running_build(&alice(), "torch").await;

        let own = h.lifecycle.get_build_for(build.id, &alice()).await.unwrap();
        let as_admin = h.lifecycle.get_build_for(build.id, &admin()).await.unwrap();

        assert_eq!(own, build);
        assert_eq!(as_admin, build);
    }

    #[tokio::test]
    async fn other_users_are_denied() {
        let h = TestHarness::new();
        let build = h.running_build(&alice(), "torch").await;

        let err = h.lifecycle.get_build_for(build.id, &bob()).await.unwrap_err();

        assert!(matches!(err, BuildError::PermissionDenied));
    }

    #[tokio::test]
    async fn unknown_build_is_not_found() {
        let h = TestHarness::new();

        let err = h.lifecycle.get_build(404).await.unwrap_err();

        assert!(matches!(err, BuildError::NotFound(_)));
    }

    #[tokio::test]
    async fn list_is_scoped_to_the_caller_and_newest_first() {
        let h = TestHarness::new();
        let first = h.running_build(&alice(), "one").await;
        let theirs = h.running_build(&bob(), "two").await;
        let second = h.running_build(&alice(), "three").await;

        let mine: Vec<i32> = h
            .lifecycle
            .list_builds(&alice())
            .await
            .unwrap()
            .iter()
            .map(|b| b.id)
            .collect();
        let all = h.lifecycle.list_builds(&admin()).await.unwrap();

        assert_eq!(mine, vec![second.id, first.id]);
        assert_eq!(all.len(), 3);
        assert!(all.iter().any(|b| b.id == theirs.id));
    }

    #[tokio::test]
    async fn build_pod_is_reported_until_the_job_is_gone() {
        let h = TestHarness::new();
        let build = h.running_build(&alice(), "torch").await;

        let pod = h.lifecycle.get_build_pod(build.id, &alice()).await.unwrap();
        assert_eq!(pod.name, format!("{}-x7k2p", build.job_name));
        assert_eq!(pod.namespace, "images");

        h.runner.remove_job(&build.job_name);
        let pod = h.lifecycle.get_build_pod(build.id, &alice()).await.unwrap();
        assert_eq!(pod.name, "");
        assert_eq!(pod.namespace, "images");
    }
}
