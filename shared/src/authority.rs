use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::roles::{check_approval_permission, UserRole};
use crate::DomainError;

/// Orders below this amount skip approval entirely.
pub const SMALL_AMOUNT_THRESHOLD: f64 = 100_000.0;
pub const REPEAT_ORDER_WINDOW_DAYS: i64 = 30;

const EMERGENCY_MARKERS: [&str; 2] = ["긴급", "emergency"];

string_enum! {
    pub enum ApprovalBypassReason {
        DirectApproval => "direct_approval",
        AmountThreshold => "amount_threshold",
        Emergency => "emergency",
        ExcelAutomation => "excel_automation",
        RepeatOrder => "repeat_order",
        AllStepsSkipped => "all_steps_skipped",
    }
}

/// Per-role amount limits configured by an administrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalAuthority {
    pub role: UserRole,
    pub max_amount: f64,
    pub can_direct_approve: bool,
    pub direct_approve_limit: Option<f64>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthorityCheck {
    pub can_direct_approve: bool,
    pub requires_approval: bool,
    pub direct_approve_limit: Option<f64>,
    pub next_approver_role: Option<UserRole>,
}

pub fn check_authority(
    authorities: &[ApprovalAuthority],
    role: UserRole,
    amount: f64,
) -> AuthorityCheck {
    let escalate = || AuthorityCheck {
        can_direct_approve: false,
        requires_approval: true,
        direct_approve_limit: None,
        next_approver_role: lowest_sufficient_role(authorities, amount),
    };

    let Some(auth) = authorities.iter().find(|a| a.is_active && a.role == role) else {
        return escalate();
    };

    if auth.can_direct_approve {
        if let Some(limit) = auth.direct_approve_limit {
            if amount <= limit {
                return AuthorityCheck {
                    can_direct_approve: true,
                    requires_approval: false,
                    direct_approve_limit: Some(limit),
                    next_approver_role: None,
                };
            }
        }
    }

    if amount <= auth.max_amount {
        return AuthorityCheck {
            can_direct_approve: false,
            requires_approval: true,
            direct_approve_limit: auth.direct_approve_limit,
            next_approver_role: Some(role),
        };
    }

    escalate()
}

/// Whether `role` may settle an order of `amount` that has no approval
/// steps. A role with an active authority row is held to its `max_amount`,
/// any other role to the default ladder.
pub fn check_amount_authority(
    authorities: &[ApprovalAuthority],
    role: UserRole,
    amount: f64,
) -> Result<(), DomainError> {
    if role == UserRole::Admin {
        return Ok(());
    }
    match authorities.iter().find(|a| a.is_active && a.role == role) {
        Some(auth) if amount <= auth.max_amount => Ok(()),
        Some(auth) => Err(DomainError::denied(format!(
            "amount {:.0} exceeds the configured {} limit of {:.0}",
            amount, role, auth.max_amount
        ))),
        None => check_approval_permission(role, amount),
    }
}

/// The active role with the smallest limit that still covers `amount`.
pub fn lowest_sufficient_role(authorities: &[ApprovalAuthority], amount: f64) -> Option<UserRole> {
    authorities
        .iter()
        .filter(|a| a.is_active && a.max_amount >= amount)
        .min_by(|a, b| a.max_amount.total_cmp(&b.max_amount))
        .map(|a| a.role)
}

/// Roles that sign an order of `amount`, lowest limit first. The chain stops
/// at the first role that may approve the amount directly.
pub fn required_approver_chain(authorities: &[ApprovalAuthority], amount: f64) -> Vec<UserRole> {
    let mut sufficient: Vec<&ApprovalAuthority> = authorities
        .iter()
        .filter(|a| a.is_active && a.max_amount >= amount)
        .collect();
    sufficient.sort_by(|a, b| a.max_amount.total_cmp(&b.max_amount));

    let mut chain = Vec::new();
    for auth in sufficient {
        chain.push(auth.role);
        if auth.can_direct_approve && auth.direct_approve_limit.is_some_and(|l| amount <= l) {
            break;
        }
    }
    chain
}

/// Facts about an order used to decide whether approval can be bypassed.
#[derive(Debug, Clone)]
pub struct AutoApprovalFacts<'a> {
    pub amount: f64,
    pub notes: Option<&'a str>,
    pub bypass_reason: Option<ApprovalBypassReason>,
    /// Most recent delivery from the same vendor.
    pub last_vendor_delivery: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
}

pub fn check_auto_approval(facts: &AutoApprovalFacts<'_>) -> Option<ApprovalBypassReason> {
    if facts.amount > 0.0 && facts.amount < SMALL_AMOUNT_THRESHOLD {
        return Some(ApprovalBypassReason::AmountThreshold);
    }

    if let Some(notes) = facts.notes {
        let lowered = notes.to_lowercase();
        if EMERGENCY_MARKERS.iter().any(|m| lowered.contains(m)) {
            return Some(ApprovalBypassReason::Emergency);
        }
    }

    if facts.bypass_reason == Some(ApprovalBypassReason::ExcelAutomation) {
        return Some(ApprovalBypassReason::ExcelAutomation);
    }

    if let Some(delivered) = facts.last_vendor_delivery {
        if facts.now - delivered <= Duration::days(REPEAT_ORDER_WINDOW_DAYS) {
            return Some(ApprovalBypassReason::RepeatOrder);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn authorities() -> Vec<ApprovalAuthority> {
        vec![
            ApprovalAuthority {
                role: UserRole::ProjectManager,
                max_amount: 5_000_000.0,
                can_direct_approve: true,
                direct_approve_limit: Some(1_000_000.0),
                is_active: true,
            },
            ApprovalAuthority {
                role: UserRole::HqManagement,
                max_amount: 30_000_000.0,
                can_direct_approve: false,
                direct_approve_limit: None,
                is_active: true,
            },
            ApprovalAuthority {
                role: UserRole::Executive,
                max_amount: 100_000_000.0,
                can_direct_approve: true,
                direct_approve_limit: Some(100_000_000.0),
                is_active: true,
            },
        ]
    }

    #[test]
    fn direct_approval_within_limit() {
        let check = check_authority(&authorities(), UserRole::ProjectManager, 800_000.0);
        assert!(check.can_direct_approve);
        assert!(!check.requires_approval);
    }

    #[test]
    fn within_max_requires_own_approval() {
        let check = check_authority(&authorities(), UserRole::ProjectManager, 3_000_000.0);
        assert!(check.requires_approval);
        assert_eq!(check.next_approver_role, Some(UserRole::ProjectManager));
    }

    #[test]
    fn over_limit_escalates_to_lowest_sufficient_role() {
        let check = check_authority(&authorities(), UserRole::ProjectManager, 12_000_000.0);
        assert_eq!(check.next_approver_role, Some(UserRole::HqManagement));

        let check = check_authority(&authorities(), UserRole::FieldWorker, 500_000_000.0);
        assert!(check.requires_approval);
        assert_eq!(check.next_approver_role, None);
    }

    #[test]
    fn no_authorities_leave_the_approver_to_the_ladder() {
        let check = check_authority(&[], UserRole::FieldWorker, 200_000.0);
        assert!(check.requires_approval);
        assert_eq!(check.next_approver_role, None);
        assert_eq!(
            check.next_approver_role.unwrap_or_else(|| crate::roles::required_role_for_amount(200_000.0)),
            UserRole::ProjectManager
        );
    }

    #[test]
    fn configured_limits_override_the_ladder() {
        let mut table = authorities();
        table[1].max_amount = 50_000_000.0;
        assert!(check_amount_authority(&table, UserRole::HqManagement, 40_000_000.0).is_ok());
        assert!(check_approval_permission(UserRole::HqManagement, 40_000_000.0).is_err());
        assert!(check_amount_authority(&table, UserRole::ProjectManager, 6_000_000.0).is_err());

        assert!(check_amount_authority(&[], UserRole::ProjectManager, 200_000.0).is_ok());
        assert!(check_amount_authority(&[], UserRole::FieldWorker, 10.0).is_err());
        assert!(check_amount_authority(&table, UserRole::Admin, 1e12).is_ok());
    }

    #[test]
    fn approver_chain_stops_at_direct_approver() {
        let chain = required_approver_chain(&authorities(), 12_000_000.0);
        assert_eq!(chain, vec![UserRole::HqManagement, UserRole::Executive]);
        let chain = required_approver_chain(&authorities(), 900_000.0);
        assert_eq!(chain, vec![UserRole::ProjectManager]);
    }

    #[test]
    fn auto_approval_reasons() {
        let now = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
        let base = AutoApprovalFacts {
            amount: 50_000.0,
            notes: None,
            bypass_reason: None,
            last_vendor_delivery: None,
            now,
        };
        assert_eq!(
            check_auto_approval(&base),
            Some(ApprovalBypassReason::AmountThreshold)
        );

        let urgent = AutoApprovalFacts {
            amount: 2_000_000.0,
            notes: Some("현장 긴급 요청"),
            ..base.clone()
        };
        assert_eq!(check_auto_approval(&urgent), Some(ApprovalBypassReason::Emergency));

        let repeat = AutoApprovalFacts {
            amount: 2_000_000.0,
            last_vendor_delivery: Some(now - Duration::days(10)),
            ..base.clone()
        };
        assert_eq!(check_auto_approval(&repeat), Some(ApprovalBypassReason::RepeatOrder));

        let stale = AutoApprovalFacts {
            amount: 2_000_000.0,
            last_vendor_delivery: Some(now - Duration::days(45)),
            ..base
        };
        assert_eq!(check_auto_approval(&stale), None);
    }
}
