use crate::models::{AdminAction, CallerIdentity};

/// 管理操作的权限回调
///
/// 调度核心不实现授权逻辑，只把调用方身份与动作交给外部裁决，
/// 结果当作不透明的布尔值使用。
pub trait PermissionChecker: Send + Sync {
    fn allows(&self, identity: &CallerIdentity, action: AdminAction) -> bool;
}

/// 放行一切的缺省实现，用于嵌入式部署与测试
pub struct AllowAll;

impl PermissionChecker for AllowAll {
    fn allows(&self, _identity: &CallerIdentity, _action: AdminAction) -> bool {
        true
    }
}

/// 依据身份中的权限快照判定
pub struct SnapshotPermissions;

impl PermissionChecker for SnapshotPermissions {
    fn allows(&self, identity: &CallerIdentity, action: AdminAction) -> bool {
        identity
            .permissions
            .iter()
            .any(|p| p == action.as_str() || p == "*")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_all() {
        let checker = AllowAll;
        let identity = CallerIdentity::new("anyone");
        assert!(checker.allows(&identity, AdminAction::Delete));
    }

    #[test]
    fn test_snapshot_permissions() {
        let checker = SnapshotPermissions;
        let mut identity = CallerIdentity::new("operator");
        identity.permissions = vec!["view".to_string(), "use".to_string()];

        assert!(checker.allows(&identity, AdminAction::View));
        assert!(checker.allows(&identity, AdminAction::Use));
        assert!(!checker.allows(&identity, AdminAction::Delete));

        identity.permissions = vec!["*".to_string()];
        assert!(checker.allows(&identity, AdminAction::Delete));
    }
}
