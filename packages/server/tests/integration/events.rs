use std::sync::atomic::Ordering;

use ::common::{BuildStatus, ImageTaskType, ImageVisibility};
use imagepack::error::BuildError;
use imagepack::lifecycle::{ExternalImageRequest, JobEvent};
use imagepack::poller::poll_once;
use imagepack::runner::JobState;
use imagepack::store::BuildRecordStore;

use crate::common::{IMAGE_SIZE, TestHarness, alice, bob};

mod apply_job_event {
    use super::*;

    #[tokio::test]
    async fn success_finishes_the_build_and_creates_the_image() {
        let h = TestHarness::new();
        let build = h.running_build(&alice(), "torch").await;

        let updated = h
            .lifecycle
            .apply_job_event(&build.job_name, JobEvent::Succeeded)
            .await
            .unwrap()
            .expect("status changed");

        assert_eq!(updated.status, BuildStatus::Finished);
        assert_eq!(updated.size, IMAGE_SIZE);
        assert_eq!(h.store.build(build.id).unwrap().size, IMAGE_SIZE);

        let images = h.store.images();
        assert_eq!(images.len(), 1);
        let image = &images[0];
        assert_eq!(image.image_ref, build.image_ref);
        assert_eq!(image.job_name.as_deref(), Some(build.job_name.as_str()));
        assert_eq!(image.user_id, build.user_id);
        assert_eq!(image.visibility, ImageVisibility::Private);
        assert_eq!(image.task_type, ImageTaskType::Custom);
        assert_eq!(image.tags, serde_json::json!(["ml"]));
        assert_eq!(image.archs, serde_json::json!(["linux/amd64"]));
    }

    #[tokio::test]
    async fn failure_marks_the_build_failed() {
        let h = TestHarness::new();
        let build = h.running_build(&alice(), "torch").await;

        let updated = h
            .lifecycle
            .apply_job_event(&build.job_name, JobEvent::Failed)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.status, BuildStatus::Failed);
        assert!(h.store.images().is_empty());
    }

    #[tokio::test]
    async fn vanished_job_marks_the_build_canceled() {
        let h = TestHarness::new();
        let build = h.running_build(&alice(), "torch").await;

        let updated = h
            .lifecycle
            .apply_job_event(&build.job_name, JobEvent::Vanished)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.status, BuildStatus::Canceled);
    }

    #[tokio::test]
    async fn terminal_builds_are_left_alone() {
        let h = TestHarness::new();
        let build = h.finished_build(&alice(), "torch").await;

        let result = h
            .lifecycle
            .apply_job_event(&build.job_name, JobEvent::Failed)
            .await
            .unwrap();

        assert!(result.is_none());
        assert_eq!(
            h.store.build(build.id).unwrap().status,
            BuildStatus::Finished
        );
    }

    #[tokio::test]
    async fn unknown_job_is_ignored() {
        let h = TestHarness::new();

        let result = h
            .lifecycle
            .apply_job_event("nobody-00000", JobEvent::Succeeded)
            .await
            .unwrap();

        assert!(result.is_none());
    }

    #[tokio::test]
    async fn size_lookup_failure_leaves_the_build_running() {
        let h = TestHarness::new();
        let build = h.running_build(&alice(), "torch").await;
        h.registry.fail_artifact_size.store(true, Ordering::SeqCst);

        let err = h
            .lifecycle
            .apply_job_event(&build.job_name, JobEvent::Succeeded)
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::Internal(_)));
        assert_eq!(
            h.store.build(build.id).unwrap().status,
            BuildStatus::Building
        );
        assert!(h.store.images().is_empty());
    }

    #[tokio::test]
    async fn rebuilding_a_reference_updates_the_existing_image() {
        let h = TestHarness::new();
        let first = h.finished_build(&alice(), "torch").await;
        let image_id = h.store.images()[0].id;

        let second = h.finished_build(&alice(), "torch").await;

        let images = h.store.images();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].id, image_id);
        assert_eq!(images[0].job_name.as_deref(), Some(second.job_name.as_str()));
        assert_ne!(first.job_name, second.job_name);
    }

    #[tokio::test]
    async fn foreign_registration_of_the_reference_is_not_taken_over() {
        let h = TestHarness::new();
        let foreign = h
            .lifecycle
            .register_external_image(
                &alice(),
                ExternalImageRequest {
                    image_ref: "harbor.local/user-bob/torch:v1".into(),
                    task_type: ImageTaskType::Custom,
                    description: "copy".into(),
                    tags: vec![],
                    archs: vec![],
                },
            )
            .await
            .unwrap();

        let build = h.finished_build(&bob(), "torch").await;
        assert_eq!(build.image_ref, foreign.image_ref);

        let images = h.store.images();
        assert_eq!(images.len(), 2);
        let theirs = images.iter().find(|i| i.id == foreign.id).unwrap();
        assert_eq!(theirs.user_id, 1);
        assert_eq!(theirs.job_name, None);
        assert_eq!(theirs.description, "copy");
        let mine = images.iter().find(|i| i.user_id == 2).unwrap();
        assert_eq!(mine.job_name.as_deref(), Some(build.job_name.as_str()));
        assert_eq!(mine.size, IMAGE_SIZE);
    }

    #[tokio::test]
    async fn terminal_status_is_never_overwritten_by_the_store() {
        let h = TestHarness::new();
        let build = h.finished_build(&alice(), "torch").await;

        let updated = h
            .store
            .update_status(build.id, BuildStatus::Canceled, None)
            .await
            .unwrap();

        assert!(!updated);
        assert_eq!(
            h.store.build(build.id).unwrap().status,
            BuildStatus::Finished
        );
    }
}

mod poller {
    use super::*;

    #[tokio::test]
    async fn sweep_applies_job_states() {
        let h = TestHarness::new();
        let succeeded = h.running_build(&alice(), "one").await;
        let failed = h.running_build(&alice(), "two").await;
        let running = h.running_build(&alice(), "three").await;
        let canceled = h.running_build(&alice(), "four").await;
        h.runner.set_state(&succeeded.job_name, JobState::Succeeded);
        h.runner.set_state(&failed.job_name, JobState::Failed);
        h.runner.remove_job(&canceled.job_name);

        let changed = poll_once(&h.lifecycle).await.unwrap();

        assert_eq!(changed, 3);
        let status = |id| h.store.build(id).unwrap().status;
        assert_eq!(status(succeeded.id), BuildStatus::Finished);
        assert_eq!(status(failed.id), BuildStatus::Failed);
        assert_eq!(status(running.id), BuildStatus::Building);
        assert_eq!(status(canceled.id), BuildStatus::Canceled);
    }

    #[tokio::test]
    async fn cancelled_build_reaches_canceled_on_the_next_sweep() {
        let h = TestHarness::new();
        let build = h.running_build(&alice(), "torch").await;
        h.lifecycle.remove_build(build.id, &alice()).await.unwrap();
        assert_eq!(
            h.store.build(build.id).unwrap().status,
            BuildStatus::Building
        );

        poll_once(&h.lifecycle).await.unwrap();

        assert_eq!(
            h.store.build(build.id).unwrap().status,
            BuildStatus::Canceled
        );
    }

    #[tokio::test]
    async fn one_failing_record_does_not_stop_the_sweep() {
        let h = TestHarness::new();
        let stuck = h.running_build(&alice(), "one").await;
        let failed = h.running_build(&alice(), "two").await;
        h.runner.set_state(&stuck.job_name, JobState::Succeeded);
        h.runner.set_state(&failed.job_name, JobState::Failed);
        h.registry.fail_artifact_size.store(true, Ordering::SeqCst);

        let changed = poll_once(&h.lifecycle).await.unwrap();

        assert_eq!(changed, 1);
        assert_eq!(h.store.build(stuck.id).unwrap().status, BuildStatus::Building);
        assert_eq!(h.store.build(failed.id).unwrap().status, BuildStatus::Failed);
    }

    #[tokio::test]
    async fn terminal_builds_are_not_polled() {
        let h = TestHarness::new();
        let build = h.finished_build(&alice(), "torch").await;
        h.runner.remove_job(&build.job_name);

        let changed = poll_once(&h.lifecycle).await.unwrap();

        assert_eq!(changed, 0);
        assert_eq!(
            h.store.build(build.id).unwrap().status,
            BuildStatus::Finished
        );
    }
}
