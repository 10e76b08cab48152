//! Identity lookup: which approval roles an actor may act as
use super::chain::ChainRole;
use std::collections::{HashMap, HashSet};

pub trait RoleResolver: Send + Sync {
    fn roles_for(&self, actor_id: &str) -> Vec<ChainRole>;

    fn holds(&self, actor_id: &str, role: &ChainRole) -> bool {
        self.roles_for(actor_id).contains(role)
    }
}

/// Fixed actor -> roles table. An actor may hold several roles and then acts
/// on each of those stages separately.
#[derive(Debug, Default, Clone)]
pub struct StaticRoleResolver {
    grants: HashMap<String, HashSet<ChainRole>>,
}

impl StaticRoleResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, actor_id: &str, role: ChainRole) -> Self {
        self.grants
            .entry(actor_id.to_string())
            .or_default()
            .insert(role);
        self
    }

    pub fn revoke(&mut self, actor_id: &str, role: &ChainRole) {
        if let Some(roles) = self.grants.get_mut(actor_id) {
            roles.remove(role);
        }
    }
}

impl RoleResolver for StaticRoleResolver {
    fn roles_for(&self, actor_id: &str) -> Vec<ChainRole> {
        self.grants
            .get(actor_id)
            .map(|roles| roles.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn holds(&self, actor_id: &str, role: &ChainRole) -> bool {
        self.grants
            .get(actor_id)
            .is_some_and(|roles| roles.contains(role))
    }
}
