use crate::DomainError;

string_enum! {
    /// The role ladder. Variant order is the ladder order, so `Ord` compares
    /// seniority.
    #[derive(PartialOrd, Ord)]
    pub enum UserRole {
        FieldWorker => "field_worker",
        ProjectManager => "project_manager",
        HqManagement => "hq_management",
        Executive => "executive",
        Admin => "admin",
    }
}

pub const PROJECT_MANAGER_LIMIT: f64 = 5_000_000.0;
pub const HQ_MANAGEMENT_LIMIT: f64 = 30_000_000.0;
pub const EXECUTIVE_LIMIT: f64 = 100_000_000.0;

impl UserRole {
    pub fn level(&self) -> u8 {
        match self {
            UserRole::FieldWorker => 1,
            UserRole::ProjectManager => 2,
            UserRole::HqManagement => 3,
            UserRole::Executive => 4,
            UserRole::Admin => 5,
        }
    }

    /// Largest order amount this role may approve when no authority table
    /// overrides it.
    pub fn approval_limit(&self) -> f64 {
        match self {
            UserRole::FieldWorker => 0.0,
            UserRole::ProjectManager => PROJECT_MANAGER_LIMIT,
            UserRole::HqManagement => HQ_MANAGEMENT_LIMIT,
            UserRole::Executive => EXECUTIVE_LIMIT,
            UserRole::Admin => f64::INFINITY,
        }
    }

    pub fn can_approve(&self) -> bool {
        self.approval_limit() > 0.0
    }

    /// True when this role is at least as senior as `other`.
    pub fn covers(&self, other: UserRole) -> bool {
        *self == UserRole::Admin || self.level() >= other.level()
    }
}

/// The lowest role allowed to sign off on an order of `amount`.
pub fn required_role_for_amount(amount: f64) -> UserRole {
    if amount >= EXECUTIVE_LIMIT {
        UserRole::Admin
    } else if amount >= HQ_MANAGEMENT_LIMIT {
        UserRole::Executive
    } else if amount >= PROJECT_MANAGER_LIMIT {
        UserRole::HqManagement
    } else {
        UserRole::ProjectManager
    }
}

pub fn check_approval_permission(role: UserRole, amount: f64) -> Result<(), DomainError> {
    if role == UserRole::Admin {
        return Ok(());
    }
    if !role.can_approve() {
        return Err(DomainError::denied(format!("{} cannot approve orders", role)));
    }
    let limit = role.approval_limit();
    if amount > limit {
        return Err(DomainError::denied(format!(
            "amount {:.0} exceeds the {} limit of {:.0}",
            amount, role, limit
        )));
    }
    let required = required_role_for_amount(amount);
    if !role.covers(required) {
        return Err(DomainError::denied(format!("{} or above is required", required)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_ordering_matches_levels() {
        let mut sorted = UserRole::ALL.to_vec();
        sorted.sort();
        assert_eq!(sorted, UserRole::ALL);
        assert!(UserRole::Executive > UserRole::HqManagement);
        assert_eq!(UserRole::Admin.level(), 5);
    }

    #[test]
    fn required_role_thresholds() {
        assert_eq!(required_role_for_amount(4_999_999.0), UserRole::ProjectManager);
        assert_eq!(required_role_for_amount(5_000_000.0), UserRole::HqManagement);
        assert_eq!(required_role_for_amount(30_000_000.0), UserRole::Executive);
        assert_eq!(required_role_for_amount(100_000_000.0), UserRole::Admin);
    }

    #[test]
    fn permission_checks_limit_and_ladder() {
        assert!(check_approval_permission(UserRole::ProjectManager, 1_000_000.0).is_ok());
        assert!(check_approval_permission(UserRole::ProjectManager, 6_000_000.0).is_err());
        assert!(check_approval_permission(UserRole::FieldWorker, 10.0).is_err());
        assert!(check_approval_permission(UserRole::Admin, 1e12).is_ok());
        assert!(check_approval_permission(UserRole::Executive, 50_000_000.0).is_ok());
    }

    #[test]
    fn parses_database_strings() {
        assert_eq!("hq_management".parse::<UserRole>().unwrap(), UserRole::HqManagement);
        let err = "ceo".parse::<UserRole>().unwrap_err();
        assert!(matches!(err, DomainError::UnknownValue { kind: "UserRole", .. }));
    }
}
