//! Audit events emitted by administrative mutations

mod common;

use std::sync::{Arc, Mutex};

use anyhow::Result;
use common::{TestEnv, ADMIN};
use gatehouse_config::RbacConfig;
use gatehouse_rbac::{AuditEvent, AuditSink, CapabilityUpdate, MenuPermissionUpdate, RbacServices};
use mockall::mock;

mock! {
    pub Sink {}

    impl AuditSink for Sink {
        fn record(&self, event: AuditEvent);
    }
}

/// Services over the fixture's store that report to `sink` only
fn audited(env: &TestEnv, sink: MockSink) -> RbacServices {
    RbacServices::new(env.db.store(), Arc::new(sink), &RbacConfig::default())
}

#[tokio::test]
async fn test_role_delete_emits_single_event() -> Result<()> {
    let env = TestEnv::new().await?;
    let role = env.role("temporary", &[]).await?;

    let mut sink = MockSink::new();
    sink.expect_record()
        .withf(move |event| {
            event.action == "role.delete"
                && event.actor_id == ADMIN
                && event.resource_id.as_deref() == Some(role.to_string().as_str())
        })
        .times(1)
        .return_const(());

    audited(&env, sink).roles.delete_role(ADMIN, role).await?;
    Ok(())
}

#[tokio::test]
async fn test_rejected_mutation_emits_nothing() -> Result<()> {
    let env = TestEnv::new().await?;
    env.rbac.seed(&RbacConfig::default()).await?;
    let admin_role = env
        .rbac
        .roles
        .find_role_by_name("administrator")
        .await?
        .expect("seeded role");

    let mut sink = MockSink::new();
    sink.expect_record().times(0);

    let services = audited(&env, sink);
    assert!(services.roles.delete_role(ADMIN, admin_role.id).await.is_err());
    assert!(services.menus.delete_menu(ADMIN, 404).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_batch_update_reports_outcome() -> Result<()> {
    let env = TestEnv::new().await?;
    let parent = env.menu("Inventory", None).await?;
    let child = env.menu("Stock", Some(parent)).await?;
    let role = env.role("warehouse", &[]).await?;

    let mut sink = MockSink::new();
    sink.expect_record()
        .withf(move |event| {
            event.action == "menu_permission.batch_update"
                && event.resource_type == "role"
                && event.details["apply_to_children"] == true
                && event.details["success"] == serde_json::json!([parent, child])
                && event.details["failed"] == serde_json::json!([9_000])
        })
        .times(1)
        .return_const(());

    let updates = [
        MenuPermissionUpdate {
            menu_id: parent,
            flags: CapabilityUpdate {
                can_view: Some(true),
                ..Default::default()
            },
        },
        MenuPermissionUpdate {
            menu_id: 9_000,
            flags: CapabilityUpdate::default(),
        },
    ];
    let result = audited(&env, sink)
        .menu_access
        .update_role_menu_permissions(ADMIN, role, &updates, true)
        .await?;
    assert!(result.is_partial());
    Ok(())
}

#[tokio::test]
async fn test_event_sequence_for_role_lifecycle() -> Result<()> {
    let actions = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&actions);

    let mut sink = MockSink::new();
    sink.expect_record().returning(move |event| {
        captured
            .lock()
            .expect("audit capture lock")
            .push(event.action);
    });

    let env = TestEnv::with_audit(Arc::new(sink)).await?;
    let role = env.role("lifecycle", &["ticket:read"]).await?;
    let user = env.user("kim", &[]).await?;
    env.rbac.roles.assign_users(ADMIN, role, &[user]).await?;
    env.rbac.roles.remove_users(ADMIN, role, &[user]).await?;
    env.rbac.roles.delete_role(ADMIN, role).await?;

    let recorded = actions.lock().expect("audit capture lock").clone();
    assert_eq!(
        recorded,
        vec![
            "permission.create",
            "role.create",
            "user.create",
            "role.assign_users",
            "role.remove_users",
            "role.delete",
        ]
    );
    Ok(())
}
