use crate::config::RolesConfig;
use review_core::UserId;
use review_engine::{Capabilities, ReviewerPool};
use std::collections::{BTreeMap, BTreeSet};

/// Capability checks answered from the `[roles]` table of the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticRoles {
    reviewers: BTreeSet<UserId>,
    reviewer_admins: BTreeSet<UserId>,
    staff: BTreeSet<UserId>,
    superusers: BTreeSet<UserId>,
    sections: BTreeMap<String, BTreeSet<UserId>>,
}

impl StaticRoles {
    pub fn from_config(roles: &RolesConfig) -> Self {
        Self {
            reviewers: roles.reviewers.iter().cloned().collect(),
            reviewer_admins: roles.reviewer_admins.iter().cloned().collect(),
            staff: roles.staff.iter().cloned().collect(),
            superusers: roles.superusers.iter().cloned().collect(),
            sections: roles
                .sections
                .iter()
                .map(|(section, users)| (section.clone(), users.iter().cloned().collect()))
                .collect(),
        }
    }
}

impl Capabilities for StaticRoles {
    fn is_reviewer(&self, user_id: &str) -> bool {
        self.reviewers.contains(user_id) || self.is_reviewer_admin(user_id)
    }

    fn is_reviewer_admin(&self, user_id: &str) -> bool {
        self.reviewer_admins.contains(user_id) || self.is_superuser(user_id)
    }

    fn can_review_section(&self, user_id: &str, section: &str) -> bool {
        self.is_superuser(user_id)
            || self
                .sections
                .get(section)
                .is_some_and(|users| users.contains(user_id))
    }

    fn is_staff(&self, user_id: &str) -> bool {
        self.staff.contains(user_id) || self.is_superuser(user_id)
    }

    fn is_superuser(&self, user_id: &str) -> bool {
        self.superusers.contains(user_id)
    }
}

/// Automatic assignment draws from the plain `reviewers` role only.
impl ReviewerPool for StaticRoles {
    fn reviewers(&self) -> Vec<UserId> {
        self.reviewers.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles() -> StaticRoles {
        StaticRoles::from_config(&RolesConfig {
            reviewers: vec!["ana".into(), "bo".into(), "ana".into()],
            reviewer_admins: vec!["lead".into()],
            staff: vec!["chair".into()],
            superusers: vec!["root".into()],
            sections: BTreeMap::from([("talks".to_string(), vec!["ana".to_string()])]),
        })
    }

    #[test]
    fn admins_and_superusers_inherit_reviewer_rights() {
        let roles = roles();
        assert!(roles.is_reviewer("ana"));
        assert!(roles.is_reviewer("lead"));
        assert!(roles.is_reviewer("root"));
        assert!(!roles.is_reviewer("chair"));

        assert!(roles.is_reviewer_admin("root"));
        assert!(!roles.is_reviewer_admin("ana"));
        assert!(roles.is_staff("chair"));
        assert!(!roles.is_staff("lead"));
    }

    #[test]
    fn section_rights_come_from_section_table() {
        let roles = roles();
        assert!(roles.can_review_section("ana", "talks"));
        assert!(!roles.can_review_section("bo", "talks"));
        assert!(!roles.can_review_section("ana", "posters"));
        assert!(roles.can_review_section("root", "posters"));
    }

    #[test]
    fn pool_is_deduplicated_reviewer_role() {
        assert_eq!(roles().reviewers(), vec!["ana".to_string(), "bo".to_string()]);
    }
}
