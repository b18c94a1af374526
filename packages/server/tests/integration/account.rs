use imagepack::error::BuildError;

use crate::common::{IMAGE_SIZE, TestHarness};

#[tokio::test]
async fn issuing_a_credential_creates_user_and_membership() {
    let h = TestHarness::new();

    let credential = h.lifecycle.issue_registry_credential("alice").await.unwrap();

    assert_eq!(credential.username, "alice");
    assert!(!credential.password.is_empty());
    assert!(h.registry.has_project("alice"));
    assert_eq!(h.registry.members(), vec!["alice".to_string()]);
}

#[tokio::test]
async fn issuing_again_recreates_the_user() {
    let h = TestHarness::new();
    h.registry.add_user("alice");

    let credential = h.lifecycle.issue_registry_credential("alice").await;

    assert!(credential.is_ok());
    assert_eq!(h.registry.members(), vec!["alice".to_string()]);
}

#[tokio::test]
async fn quota_updates_target_the_user_project() {
    let h = TestHarness::new();

    h.lifecycle
        .update_quota("alice", 80 << 30)
        .await
        .unwrap();

    assert_eq!(h.registry.quota("user-alice"), Some(80 << 30));
    let detail = h.lifecycle.project_detail("alice").await.unwrap();
    assert_eq!(detail.project, "user-alice");
    assert_eq!(detail.quota, 80 << 30);
    assert_eq!(detail.used, IMAGE_SIZE);
}

#[tokio::test]
async fn non_positive_quota_is_rejected() {
    let h = TestHarness::new();

    let err = h.lifecycle.update_quota("alice", 0).await.unwrap_err();

    assert!(matches!(err, BuildError::Validation(_)));
    assert_eq!(h.registry.quota("user-alice"), None);
}
