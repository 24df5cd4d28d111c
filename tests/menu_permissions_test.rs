//! Menu capability aggregation, batch updates and access checks

mod common;

use anyhow::Result;
use common::{TestEnv, ADMIN};
use gatehouse_rbac::{Capability, CapabilityFlags, CapabilityUpdate, MenuPermissionUpdate};

fn view_update(menu_id: i32, can_view: bool) -> MenuPermissionUpdate {
    MenuPermissionUpdate {
        menu_id,
        flags: CapabilityUpdate {
            can_view: Some(can_view),
            ..Default::default()
        },
    }
}

#[tokio::test]
async fn test_menu_aggregation_scenario() -> Result<()> {
    let env = TestEnv::new().await?;
    let m1 = env.menu("M1", None).await?;
    let a = env.role("role-a", &[]).await?;
    let b = env.role("role-b", &[]).await?;
    let user = env.user("fay", &[a, b]).await?;

    env.grant(a, m1, CapabilityFlags::view_only()).await?;
    env.grant(
        b,
        m1,
        CapabilityFlags {
            can_view: true,
            can_edit: true,
            ..Default::default()
        },
    )
    .await?;

    let tree = env.rbac.menu_access.build_user_menu_tree(user).await?;
    let flags = tree[0].permissions.expect("user tree carries flags");
    assert!(flags.can_view);
    assert!(flags.can_edit);
    assert!(!flags.can_delete);
    Ok(())
}

#[tokio::test]
async fn test_cascade_scenario() -> Result<()> {
    let env = TestEnv::new().await?;
    let m1 = env.menu("M1", None).await?;
    let m2 = env.menu("M2", Some(m1)).await?;
    let m3 = env.menu("M3", Some(m2)).await?;
    let role = env.role("cascade", &[]).await?;

    let result = env
        .rbac
        .menu_access
        .update_role_menu_permissions(ADMIN, role, &[view_update(m1, true)], true)
        .await?;
    assert_eq!(result.success, vec![m1, m2, m3]);

    let grants = env.rbac.menu_access.role_menu_permissions(role).await?;
    assert_eq!(grants.len(), 3);
    assert!(grants.iter().all(|g| g.can_view));

    let tree = env.rbac.menu_access.build_role_menu_tree(role).await?;
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].size(), 3);
    Ok(())
}

#[tokio::test]
async fn test_all_false_indistinguishable_from_never_granted() -> Result<()> {
    let env = TestEnv::new().await?;
    let menu = env.menu("Billing", None).await?;
    let untouched = env.menu("Payroll", None).await?;
    let role = env.role("finance", &[]).await?;
    let user = env.user("gus", &[role]).await?;

    env.grant(role, menu, CapabilityFlags::all()).await?;
    env.grant(role, menu, CapabilityFlags::default()).await?;

    assert!(env.rbac.menu_access.role_menu_permissions(role).await?.is_empty());

    let matrix = env.rbac.menu_access.permission_matrix().await?;
    assert_eq!(matrix.cell(menu, role), matrix.cell(untouched, role));
    assert_eq!(matrix.cell(menu, role), None);

    let on_cleared = env
        .rbac
        .menu_access
        .check_menu_access(user, menu, Capability::View)
        .await?;
    let on_untouched = env
        .rbac
        .menu_access
        .check_menu_access(user, untouched, Capability::View)
        .await?;
    assert!(!on_cleared.allowed);
    assert!(!on_untouched.allowed);
    Ok(())
}

#[tokio::test]
async fn test_partial_update_keeps_unset_flags() -> Result<()> {
    let env = TestEnv::new().await?;
    let menu = env.menu("Exports", None).await?;
    let role = env.role("exporter", &[]).await?;
    env.grant(
        role,
        menu,
        CapabilityFlags {
            can_view: true,
            can_export: true,
            ..Default::default()
        },
    )
    .await?;

    env.rbac
        .menu_access
        .update_role_menu_permissions(
            ADMIN,
            role,
            &[MenuPermissionUpdate {
                menu_id: menu,
                flags: CapabilityUpdate {
                    can_edit: Some(true),
                    ..Default::default()
                },
            }],
            false,
        )
        .await?;

    let grant = &env.rbac.menu_access.role_menu_permissions(role).await?[0];
    assert!(grant.can_view && grant.can_edit && grant.can_export);
    assert!(!grant.can_delete);
    Ok(())
}

#[tokio::test]
async fn test_overlapping_cascades_processed_once() -> Result<()> {
    let env = TestEnv::new().await?;
    let top = env.menu("Top", None).await?;
    let mid = env.menu("Mid", Some(top)).await?;
    let low = env.menu("Low", Some(mid)).await?;
    let role = env.role("overlap", &[]).await?;

    let result = env
        .rbac
        .menu_access
        .update_role_menu_permissions(
            ADMIN,
            role,
            &[view_update(top, true), view_update(mid, false)],
            true,
        )
        .await?;

    // Mid's own request governs Mid and Low, leaving no grant there
    assert_eq!(result.success, vec![top, mid, low]);
    let granted: Vec<i32> = env
        .rbac
        .menu_access
        .role_menu_permissions(role)
        .await?
        .into_iter()
        .map(|g| g.menu_id)
        .collect();
    assert_eq!(granted, vec![top]);
    Ok(())
}

#[tokio::test]
async fn test_item_inside_earlier_cascade_keeps_its_flags() -> Result<()> {
    let env = TestEnv::new().await?;
    let top = env.menu("Top", None).await?;
    let mid = env.menu("Mid", Some(top)).await?;
    let low = env.menu("Low", Some(mid)).await?;
    let role = env.role("nested", &[]).await?;

    let edit_mid = MenuPermissionUpdate {
        menu_id: mid,
        flags: CapabilityUpdate {
            can_edit: Some(true),
            ..Default::default()
        },
    };
    let result = env
        .rbac
        .menu_access
        .update_role_menu_permissions(
            ADMIN,
            role,
            &[view_update(top, true), edit_mid.clone()],
            true,
        )
        .await?;
    assert_eq!(result.success, vec![top, mid, low]);
    assert!(result.failed.is_empty());

    let grants = env.rbac.menu_access.role_menu_permissions(role).await?;
    let flags: Vec<(i32, CapabilityFlags)> = grants
        .iter()
        .map(|g| (g.menu_id, CapabilityFlags::from(g)))
        .collect();
    let edit_only = CapabilityFlags {
        can_edit: true,
        ..Default::default()
    };
    assert_eq!(
        flags,
        vec![
            (top, CapabilityFlags::view_only()),
            (mid, edit_only),
            (low, edit_only)
        ]
    );

    // Listing the nested item first gives the same outcome
    let other = env.role("nested-reversed", &[]).await?;
    env.rbac
        .menu_access
        .update_role_menu_permissions(ADMIN, other, &[edit_mid, view_update(top, true)], true)
        .await?;
    let reversed: Vec<(i32, CapabilityFlags)> = env
        .rbac
        .menu_access
        .role_menu_permissions(other)
        .await?
        .iter()
        .map(|g| (g.menu_id, CapabilityFlags::from(g)))
        .collect();
    assert_eq!(reversed, flags);
    Ok(())
}

#[tokio::test]
async fn test_access_check_lists_every_granting_role() -> Result<()> {
    let env = TestEnv::new().await?;
    let menu = env.menu("Contracts", None).await?;
    let legal = env.role("legal", &[]).await?;
    let sales = env.role("sales", &[]).await?;
    let intern = env.role("intern", &[]).await?;
    let user = env.user("hal", &[legal, sales, intern]).await?;

    env.grant(legal, menu, CapabilityFlags::all()).await?;
    env.grant(sales, menu, CapabilityFlags::all()).await?;
    env.grant(intern, menu, CapabilityFlags::view_only()).await?;

    let delete = env
        .rbac
        .menu_access
        .check_menu_access(user, menu, Capability::Delete)
        .await?;
    assert!(delete.allowed);
    let ids: Vec<i32> = delete.granting_roles.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![legal, sales]);

    let view = env
        .rbac
        .menu_access
        .check_menu_access(user, menu, Capability::View)
        .await?;
    assert_eq!(view.granting_roles.len(), 3);
    Ok(())
}

#[tokio::test]
async fn test_inactive_menu_denied() -> Result<()> {
    let env = TestEnv::new().await?;
    let menu = env.menu("Legacy", None).await?;
    let role = env.role("legacy", &[]).await?;
    let user = env.user("ivy", &[role]).await?;
    env.grant(role, menu, CapabilityFlags::all()).await?;

    env.rbac
        .menus
        .update_menu(
            ADMIN,
            menu,
            gatehouse_rbac::MenuUpdate {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await?;

    let decision = env
        .rbac
        .menu_access
        .check_menu_access(user, menu, Capability::View)
        .await?;
    assert!(!decision.allowed);
    assert!(decision.reason.unwrap_or_default().contains("inactive"));
    assert!(env.rbac.menu_access.build_user_menu_tree(user).await?.is_empty());
    Ok(())
}
