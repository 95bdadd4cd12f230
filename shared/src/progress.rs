use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::roles::UserRole;
use crate::status::{ApprovalStatus, StepStatus};
use crate::DomainError;

/// The part of a persisted step instance the progress rules look at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepState {
    pub id: Uuid,
    pub step_order: i32,
    pub required_role: UserRole,
    pub status: StepStatus,
    pub auto_approve_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApprovalProgress {
    pub total_steps: usize,
    pub completed_steps: usize,
    pub progress_percentage: u8,
    pub current_step: Option<StepState>,
    pub is_complete: bool,
    pub is_rejected: bool,
}

impl ApprovalProgress {
    pub fn compute(steps: &[StepState]) -> Self {
        let total_steps = steps.len();
        let completed_steps = steps.iter().filter(|s| s.status.is_done()).count();
        let is_rejected = steps.iter().any(|s| s.status == StepStatus::Rejected);
        let current_step = current(steps).cloned();
        let progress_percentage = if total_steps == 0 {
            0
        } else {
            ((completed_steps as f64 / total_steps as f64) * 100.0).round() as u8
        };

        Self {
            total_steps,
            completed_steps,
            progress_percentage,
            is_complete: !is_rejected && current_step.is_none(),
            current_step,
            is_rejected,
        }
    }
}

/// The step waiting for a decision: the first pending one by `step_order`.
pub fn current(steps: &[StepState]) -> Option<&StepState> {
    steps
        .iter()
        .filter(|s| s.status == StepStatus::Pending)
        .min_by_key(|s| s.step_order)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

/// What a decision does to the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct StepAdvance {
    pub step_id: Uuid,
    pub step_status: StepStatus,
    /// Set when the decision settles the whole order.
    pub order_approval: Option<ApprovalStatus>,
    pub next_step: Option<StepState>,
}

pub fn advance(
    steps: &[StepState],
    actor: UserRole,
    decision: Decision,
) -> Result<StepAdvance, DomainError> {
    if steps.iter().any(|s| s.status == StepStatus::Rejected) {
        return Err(DomainError::validation("approval chain was already rejected"));
    }
    let step = current(steps)
        .ok_or_else(|| DomainError::validation("no approval step is waiting for a decision"))?;
    if !actor.covers(step.required_role) {
        return Err(DomainError::denied(format!(
            "step {} needs {} or above",
            step.step_order, step.required_role
        )));
    }

    Ok(match decision {
        Decision::Reject => StepAdvance {
            step_id: step.id,
            step_status: StepStatus::Rejected,
            order_approval: Some(ApprovalStatus::Rejected),
            next_step: None,
        },
        Decision::Approve => {
            let next_step = steps
                .iter()
                .filter(|s| s.status == StepStatus::Pending && s.id != step.id)
                .min_by_key(|s| s.step_order)
                .cloned();
            StepAdvance {
                step_id: step.id,
                step_status: StepStatus::Approved,
                order_approval: next_step.is_none().then_some(ApprovalStatus::Approved),
                next_step,
            }
        }
    })
}

/// Steps the sweeper may approve now. Only the leading run of due steps
/// counts: a later step never auto-approves while an earlier one still waits
/// on a person.
pub fn due_auto_approvals(steps: &[StepState], now: DateTime<Utc>) -> Vec<Uuid> {
    if steps.iter().any(|s| s.status == StepStatus::Rejected) {
        return Vec::new();
    }
    let mut pending: Vec<&StepState> = steps
        .iter()
        .filter(|s| s.status == StepStatus::Pending)
        .collect();
    pending.sort_by_key(|s| s.step_order);

    pending
        .into_iter()
        .take_while(|s| s.auto_approve_at.is_some_and(|at| at <= now))
        .map(|s| s.id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn step(order: i32, role: UserRole, status: StepStatus) -> StepState {
        StepState {
            id: Uuid::new_v4(),
            step_order: order,
            required_role: role,
            status,
            auto_approve_at: None,
        }
    }

    #[test]
    fn progress_counts_skipped_as_complete() {
        let steps = vec![
            step(1, UserRole::ProjectManager, StepStatus::Approved),
            step(2, UserRole::HqManagement, StepStatus::Skipped),
            step(3, UserRole::Executive, StepStatus::Pending),
        ];
        let progress = ApprovalProgress::compute(&steps);
        assert_eq!(progress.total_steps, 3);
        assert_eq!(progress.completed_steps, 2);
        assert_eq!(progress.progress_percentage, 67);
        assert_eq!(progress.current_step.unwrap().step_order, 3);
        assert!(!progress.is_complete);
    }

    #[test]
    fn empty_chain_reports_zero_percent() {
        let progress = ApprovalProgress::compute(&[]);
        assert_eq!(progress.progress_percentage, 0);
        assert!(progress.is_complete);
    }

    #[test]
    fn last_approval_settles_order() {
        let steps = vec![
            step(1, UserRole::ProjectManager, StepStatus::Approved),
            step(2, UserRole::HqManagement, StepStatus::Pending),
        ];
        let adv = advance(&steps, UserRole::Executive, Decision::Approve).unwrap();
        assert_eq!(adv.step_id, steps[1].id);
        assert_eq!(adv.order_approval, Some(ApprovalStatus::Approved));
        assert!(adv.next_step.is_none());
    }

    #[test]
    fn intermediate_approval_moves_to_next_step() {
        let steps = vec![
            step(2, UserRole::HqManagement, StepStatus::Pending),
            step(1, UserRole::ProjectManager, StepStatus::Pending),
        ];
        let adv = advance(&steps, UserRole::ProjectManager, Decision::Approve).unwrap();
        assert_eq!(adv.step_id, steps[1].id);
        assert_eq!(adv.order_approval, None);
        assert_eq!(adv.next_step.unwrap().step_order, 2);
    }

    #[test]
    fn junior_role_cannot_decide() {
        let steps = vec![step(1, UserRole::Executive, StepStatus::Pending)];
        let err = advance(&steps, UserRole::ProjectManager, Decision::Approve).unwrap_err();
        assert!(matches!(err, DomainError::PermissionDenied(_)));
        assert!(advance(&steps, UserRole::Admin, Decision::Approve).is_ok());
    }

    #[test]
    fn rejection_halts_the_chain() {
        let steps = vec![
            step(1, UserRole::ProjectManager, StepStatus::Pending),
            step(2, UserRole::HqManagement, StepStatus::Pending),
        ];
        let adv = advance(&steps, UserRole::ProjectManager, Decision::Reject).unwrap();
        assert_eq!(adv.order_approval, Some(ApprovalStatus::Rejected));

        let mut after = steps.clone();
        after[0].status = StepStatus::Rejected;
        assert!(advance(&after, UserRole::Admin, Decision::Approve).is_err());
        let progress = ApprovalProgress::compute(&after);
        assert!(progress.is_rejected);
        assert!(!progress.is_complete);
    }

    #[test]
    fn only_leading_due_steps_auto_approve() {
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap();
        let mut first = step(1, UserRole::ProjectManager, StepStatus::Pending);
        first.auto_approve_at = Some(now - Duration::hours(1));
        let mut second = step(2, UserRole::HqManagement, StepStatus::Pending);
        second.auto_approve_at = Some(now);
        let third = step(3, UserRole::Executive, StepStatus::Pending);
        let mut fourth = step(4, UserRole::Admin, StepStatus::Pending);
        fourth.auto_approve_at = Some(now - Duration::hours(5));

        let due = due_auto_approvals(&[first.clone(), second.clone(), third, fourth], now);
        assert_eq!(due, vec![first.id, second.id]);
    }
}
