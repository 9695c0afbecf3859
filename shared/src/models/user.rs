//! Authenticated actor identity passed into every ledger operation

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role codes assigned by the identity provider
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    SuperAdmin,
    CentralManager,
    Supervisor,
    BranchManager,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "SUPER_ADMIN",
            Role::CentralManager => "CENTRAL_MANAGER",
            Role::Supervisor => "SUPERVISOR",
            Role::BranchManager => "BRANCH_MANAGER",
        }
    }
}

/// An already-authenticated caller.
///
/// Role-based access control happens before the core is reached; the core
/// only uses `branch_id` for branch-scope checks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
    /// Home branch for branch managers, `None` for central staff
    pub branch_id: Option<Uuid>,
}

impl Actor {
    pub fn new(user_id: Uuid, role: Role, branch_id: Option<Uuid>) -> Self {
        Self {
            user_id,
            role,
            branch_id,
        }
    }

    pub fn branch_manager(user_id: Uuid, branch_id: Uuid) -> Self {
        Self::new(user_id, Role::BranchManager, Some(branch_id))
    }

    pub fn central_manager(user_id: Uuid) -> Self {
        Self::new(user_id, Role::CentralManager, None)
    }

    pub fn supervisor(user_id: Uuid) -> Self {
        Self::new(user_id, Role::Supervisor, None)
    }

    /// Whether this actor may act on behalf of `branch_id`.
    ///
    /// Central staff carry no branch and pass; branch staff must match.
    pub fn can_act_for_branch(&self, branch_id: Uuid) -> bool {
        match self.branch_id {
            Some(own) => own == branch_id,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_scope() {
        let branch = Uuid::new_v4();
        let manager = Actor::branch_manager(Uuid::new_v4(), branch);
        assert!(manager.can_act_for_branch(branch));
        assert!(!manager.can_act_for_branch(Uuid::new_v4()));

        let central = Actor::central_manager(Uuid::new_v4());
        assert!(central.can_act_for_branch(branch));
    }
}
