use ::common::{GranteeKind, ImageTaskType, ImageVisibility};
use imagepack::error::BuildError;
use imagepack::lifecycle::{BatchStatus, Caller, ExternalImageRequest, ImageUpdate};

use crate::common::{TestHarness, admin, alice, bob, user};

fn external(image_ref: &str) -> ExternalImageRequest {
    ExternalImageRequest {
        image_ref: image_ref.into(),
        task_type: ImageTaskType::Jupyter,
        description: "notebook".into(),
        tags: vec!["jupyter".into()],
        archs: vec![],
    }
}

fn ids(images: &[imagepack::entity::image_artifact::Model]) -> Vec<i32> {
    images.iter().map(|i| i.id).collect()
}

mod registration {
    use super::*;

    #[tokio::test]
    async fn external_image_is_private_and_unlinked() {
        let h = TestHarness::new();

        let image = h
            .lifecycle
            .register_external_image(&alice(), external(" quay.io/jupyter/base-notebook:2024 "))
            .await
            .unwrap();

        assert_eq!(image.image_ref, "quay.io/jupyter/base-notebook:2024");
        assert_eq!(image.user_id, 1);
        assert_eq!(image.job_name, None);
        assert_eq!(image.visibility, ImageVisibility::Private);
        assert_eq!(image.task_type, ImageTaskType::Jupyter);
        assert_eq!(image.archs, serde_json::json!(["linux/amd64"]));
    }

    #[tokio::test]
    async fn blank_reference_is_rejected() {
        let h = TestHarness::new();

        let err = h
            .lifecycle
            .register_external_image(&alice(), external("   "))
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::Validation(_)));
        assert!(h.store.images().is_empty());
    }
}

mod visibility {
    use super::*;

    #[tokio::test]
    async fn list_includes_own_public_and_shared_images() {
        let h = TestHarness::new();
        let carol = Caller {
            account_id: Some(7),
            ..user(3, "carol")
        };
        let mine = h
            .lifecycle
            .register_external_image(&carol, external("docker.io/carol/own:1"))
            .await
            .unwrap();
        let public = h
            .lifecycle
            .register_external_image(&alice(), external("docker.io/alice/public:1"))
            .await
            .unwrap();
        let to_user = h
            .lifecycle
            .register_external_image(&alice(), external("docker.io/alice/shared:1"))
            .await
            .unwrap();
        let to_account = h
            .lifecycle
            .register_external_image(&bob(), external("docker.io/bob/team:1"))
            .await
            .unwrap();
        let hidden = h
            .lifecycle
            .register_external_image(&bob(), external("docker.io/bob/private:1"))
            .await
            .unwrap();

        h.lifecycle
            .set_visibility(public.id, &admin(), ImageVisibility::Public)
            .await
            .unwrap();
        h.lifecycle
            .grant_image(to_user.id, &alice(), GranteeKind::User, carol.user_id)
            .await
            .unwrap();
        h.lifecycle
            .grant_image(to_account.id, &bob(), GranteeKind::Account, 7)
            .await
            .unwrap();

        let visible = ids(&h.lifecycle.list_images(&carol).await.unwrap());

        assert_eq!(visible, vec![to_account.id, to_user.id, public.id, mine.id]);
        assert!(!visible.contains(&hidden.id));
    }

    #[tokio::test]
    async fn only_admins_change_visibility() {
        let h = TestHarness::new();
        let image = h
            .lifecycle
            .register_external_image(&alice(), external("docker.io/alice/app:1"))
            .await
            .unwrap();

        let err = h
            .lifecycle
            .set_visibility(image.id, &alice(), ImageVisibility::Public)
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::PermissionDenied));

        let updated = h
            .lifecycle
            .set_visibility(image.id, &admin(), ImageVisibility::Public)
            .await
            .unwrap();
        assert_eq!(updated.visibility, ImageVisibility::Public);
    }

    #[tokio::test]
    async fn revoking_a_grant_hides_the_image_again() {
        let h = TestHarness::new();
        let image = h
            .lifecycle
            .register_external_image(&alice(), external("docker.io/alice/app:1"))
            .await
            .unwrap();
        h.lifecycle
            .grant_image(image.id, &alice(), GranteeKind::User, 2)
            .await
            .unwrap();
        h.lifecycle
            .grant_image(image.id, &alice(), GranteeKind::User, 2)
            .await
            .unwrap();
        assert_eq!(
            h.lifecycle.list_grants(image.id, &alice()).await.unwrap().len(),
            1
        );

        let revoked = h
            .lifecycle
            .revoke_image(image.id, &alice(), GranteeKind::User, 2)
            .await
            .unwrap();

        assert!(revoked);
        assert!(h.lifecycle.list_images(&bob()).await.unwrap().is_empty());
        assert!(
            !h.lifecycle
                .revoke_image(image.id, &alice(), GranteeKind::User, 2)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn only_the_owner_can_share() {
        let h = TestHarness::new();
        let image = h
            .lifecycle
            .register_external_image(&alice(), external("docker.io/alice/app:1"))
            .await
            .unwrap();

        let err = h
            .lifecycle
            .grant_image(image.id, &bob(), GranteeKind::User, 2)
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::PermissionDenied));
    }
}

mod editing {
    use super::*;

    #[tokio::test]
    async fn owner_updates_metadata() {
        let h = TestHarness::new();
        let image = h
            .lifecycle
            .register_external_image(&alice(), external("docker.io/alice/app:1"))
            .await
            .unwrap();

        let updated = h
            .lifecycle
            .update_image(
                image.id,
                &alice(),
                ImageUpdate {
                    description: Some("training image".into()),
                    task_type: Some(ImageTaskType::PyTorch),
                    tags: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.description, "training image");
        assert_eq!(updated.task_type, ImageTaskType::PyTorch);
        assert_eq!(updated.tags, serde_json::json!(["jupyter"]));
    }

    #[tokio::test]
    async fn other_users_cannot_update() {
        let h = TestHarness::new();
        let image = h
            .lifecycle
            .register_external_image(&alice(), external("docker.io/alice/app:1"))
            .await
            .unwrap();

        let err = h
            .lifecycle
            .update_image(image.id, &bob(), ImageUpdate::default())
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::PermissionDenied));
    }
}

mod deletion {
    use super::*;

    #[tokio::test]
    async fn batch_delete_reports_failures_per_id() {
        let h = TestHarness::new();
        let mine = h
            .lifecycle
            .register_external_image(&alice(), external("docker.io/alice/app:1"))
            .await
            .unwrap();
        let theirs = h
            .lifecycle
            .register_external_image(&bob(), external("docker.io/bob/app:1"))
            .await
            .unwrap();

        let outcome = h
            .lifecycle
            .delete_images(&[mine.id, theirs.id, 404], &alice())
            .await;

        assert_eq!(outcome.status(), BatchStatus::CompletedWithErrors);
        assert_eq!(outcome.failed_ids(), vec![theirs.id, 404]);
        assert_eq!(ids(&h.store.images()), vec![theirs.id]);
    }

    #[tokio::test]
    async fn deleting_an_image_leaves_the_registry_alone() {
        let h = TestHarness::new();
        h.finished_build(&alice(), "torch").await;
        let image_id = h.store.images()[0].id;

        let outcome = h.lifecycle.delete_images(&[image_id], &alice()).await;

        assert_eq!(outcome.status(), BatchStatus::Completed);
        assert!(h.store.images().is_empty());
        assert!(h.registry.deleted_artifacts().is_empty());
    }
}

mod references {
    use super::*;

    #[tokio::test]
    async fn unreachable_references_are_returned_in_order() {
        let h = TestHarness::new();
        h.registry.mark_reachable("harbor.local/user-alice/torch:v1");

        let missing = h
            .lifecycle
            .check_references(&[
                "harbor.local/user-alice/gone:v1".to_string(),
                "harbor.local/user-alice/torch:v1".to_string(),
                "not a reference".to_string(),
            ])
            .await;

        assert_eq!(
            missing,
            vec![
                "harbor.local/user-alice/gone:v1".to_string(),
                "not a reference".to_string(),
            ]
        );
    }
}
