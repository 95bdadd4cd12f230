use std::collections::HashSet;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use shared::*;
use uuid::Uuid;

use super::{ActingUser, AppState, Page};
use crate::approval::{self, DecisionOutcome};
use crate::error::ApiResult;
use crate::models::*;
use crate::schema::*;

const PENDING_SCAN_LIMIT: i64 = 500;

#[derive(Debug, Default, Deserialize)]
pub struct DecisionRequest {
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn approve(
    State(state): State<AppState>,
    user: ActingUser,
    Path(id): Path<Uuid>,
    Json(request): Json<DecisionRequest>,
) -> ApiResult<Json<DecisionOutcome>> {
    let mut conn = state.pool.get().await?;
    let outcome = approval::decide(&mut conn, id, &user.0, Decision::Approve, request.comments).await?;
    Ok(Json(outcome))
}

pub async fn reject(
    State(state): State<AppState>,
    user: ActingUser,
    Path(id): Path<Uuid>,
    Json(request): Json<DecisionRequest>,
) -> ApiResult<Json<DecisionOutcome>> {
    let mut conn = state.pool.get().await?;
    let reason = request.reason.or(request.comments);
    let outcome = approval::decide(&mut conn, id, &user.0, Decision::Reject, reason).await?;
    Ok(Json(outcome))
}

#[derive(Debug, Serialize)]
pub struct PendingApproval {
    pub order_id: Uuid,
    pub order_number: String,
    pub project_name: String,
    pub vendor_name: String,
    pub total_amount: f64,
    pub required_role: Option<UserRole>,
    pub requested_at: DateTime<Utc>,
}

/// Whether `role` may act on a pending order. Uses the same rule as the
/// approve and reject endpoints so the list never offers an order the
/// decision would refuse.
fn can_act(
    authorities: &[ApprovalAuthority],
    role: UserRole,
    required: Option<UserRole>,
    staged: bool,
    amount: f64,
) -> bool {
    approval::may_decide(authorities, role, required.filter(|_| staged), amount).is_ok()
}

/// Orders among `ids` that still run through active approval steps.
async fn staged_orders(
    conn: &mut AsyncPgConnection,
    ids: Option<&[Uuid]>,
) -> ApiResult<HashSet<Uuid>> {
    let mut query = approval_step_instances::table
        .filter(approval_step_instances::is_active.eq(true))
        .select(approval_step_instances::order_id)
        .distinct()
        .into_boxed();
    if let Some(ids) = ids {
        query = query.filter(approval_step_instances::order_id.eq_any(ids.to_vec()));
    }
    Ok(query.load::<Uuid>(conn).await?.into_iter().collect())
}

/// Orders waiting on a decision the acting user is senior enough to make.
pub async fn pending(
    State(state): State<AppState>,
    user: ActingUser,
) -> ApiResult<Json<Vec<PendingApproval>>> {
    let role = user.role()?;
    let mut conn = state.pool.get().await?;
    let rows: Vec<(PurchaseOrder, String, String)> = purchase_orders::table
        .inner_join(projects::table)
        .inner_join(vendors::table)
        .filter(purchase_orders::order_status.eq(OrderStatus::Created.as_str()))
        .filter(purchase_orders::approval_status.eq(ApprovalStatus::Pending.as_str()))
        .order(purchase_orders::updated_at.asc())
        .limit(PENDING_SCAN_LIMIT)
        .select((PurchaseOrder::as_select(), projects::project_name, vendors::name))
        .load(&mut conn)
        .await?;
    let ids: Vec<Uuid> = rows.iter().map(|(o, _, _)| o.id).collect();
    let staged = staged_orders(&mut conn, Some(ids.as_slice())).await?;
    let authorities = approval::load_authorities(&mut conn).await?;

    let mut waiting = Vec::new();
    for (order, project_name, vendor_name) in rows {
        let required = order
            .current_approver_role
            .as_deref()
            .map(|r| r.parse::<UserRole>())
            .transpose()?;
        if !can_act(&authorities, role, required, staged.contains(&order.id), order.amount()) {
            continue;
        }
        waiting.push(PendingApproval {
            order_id: order.id,
            total_amount: order.amount(),
            order_number: order.order_number,
            project_name,
            vendor_name,
            required_role: required,
            requested_at: order.updated_at,
        });
    }
    Ok(Json(waiting))
}

#[derive(Debug, Serialize)]
pub struct DecisionRecord {
    #[serde(flatten)]
    pub step: StepInstance,
    pub order_number: String,
}

/// Step decisions made by the acting user, newest first.
pub async fn history(
    State(state): State<AppState>,
    user: ActingUser,
    Query(page): Query<Page>,
) -> ApiResult<Json<Vec<DecisionRecord>>> {
    let mut conn = state.pool.get().await?;
    let rows: Vec<(StepInstance, String)> = approval_step_instances::table
        .inner_join(purchase_orders::table)
        .filter(approval_step_instances::approved_by.eq(user.0.id))
        .order(approval_step_instances::approved_at.desc())
        .limit(page.limit())
        .offset(page.offset())
        .select((StepInstance::as_select(), purchase_orders::order_number))
        .load(&mut conn)
        .await?;
    Ok(Json(
        rows.into_iter()
            .map(|(step, order_number)| DecisionRecord { step, order_number })
            .collect(),
    ))
}

#[derive(Debug, Default, PartialEq, Serialize)]
pub struct ApprovalStats {
    pub pending: usize,
    pub approved: usize,
    pub rejected: usize,
    pub not_required: usize,
    /// Pending orders the acting user may decide.
    pub awaiting_me: usize,
    pub approved_today: usize,
}

/// (order_status, approval_status, current_approver_role, amount, approved_at, staged)
type StatsRow = (String, String, Option<String>, f64, Option<DateTime<Utc>>, bool);

fn tally(
    rows: &[StatsRow],
    authorities: &[ApprovalAuthority],
    role: UserRole,
    today: NaiveDate,
) -> ApprovalStats {
    let mut stats = ApprovalStats::default();
    for (order_status, approval_status, approver, amount, approved_at, staged) in rows {
        if order_status == OrderStatus::Cancelled.as_str() {
            continue;
        }
        match approval_status.parse::<ApprovalStatus>() {
            Ok(ApprovalStatus::Pending) => {
                stats.pending += 1;
                let required = approver.as_deref().and_then(|r| r.parse().ok());
                if can_act(authorities, role, required, *staged, *amount) {
                    stats.awaiting_me += 1;
                }
            }
            Ok(ApprovalStatus::Approved) => stats.approved += 1,
            Ok(ApprovalStatus::Rejected) => stats.rejected += 1,
            Ok(ApprovalStatus::NotRequired) => stats.not_required += 1,
            Err(_) => {}
        }
        if approved_at.is_some_and(|at| at.date_naive() == today) {
            stats.approved_today += 1;
        }
    }
    stats
}

pub async fn stats(State(state): State<AppState>, user: ActingUser) -> ApiResult<Json<ApprovalStats>> {
    let role = user.role()?;
    let mut conn = state.pool.get().await?;
    let rows: Vec<(Uuid, String, String, Option<String>, BigDecimal, Option<DateTime<Utc>>)> =
        purchase_orders::table
            .select((
                purchase_orders::id,
                purchase_orders::order_status,
                purchase_orders::approval_status,
                purchase_orders::current_approver_role,
                purchase_orders::total_amount,
                purchase_orders::approved_at,
            ))
            .load(&mut conn)
            .await?;
    let staged = staged_orders(&mut conn, None).await?;
    let authorities = approval::load_authorities(&mut conn).await?;
    let rows: Vec<StatsRow> = rows
        .into_iter()
        .map(|(id, o, a, r, amount, at)| (o, a, r, to_f64(&amount), at, staged.contains(&id)))
        .collect();
    Ok(Json(tally(&rows, &authorities, role, Utc::now().date_naive())))
}

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub order_id: Uuid,
    pub approval_status: String,
    #[serde(flatten)]
    pub progress: ApprovalProgress,
    pub steps: Vec<StepInstance>,
}

pub async fn progress(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<ProgressResponse>> {
    let mut conn = state.pool.get().await?;
    let approval_status: String = purchase_orders::table
        .find(id)
        .select(purchase_orders::approval_status)
        .first(&mut conn)
        .await?;
    let steps = approval::active_steps(&mut conn, id).await?;
    let progress = ApprovalProgress::compute(&step_states(&steps)?);
    Ok(Json(ProgressResponse {
        order_id: id,
        approval_status,
        progress,
        steps,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use shared::authority::check_authority;
    use shared::roles::required_role_for_amount;

    fn hq_limit(max_amount: f64) -> Vec<ApprovalAuthority> {
        vec![ApprovalAuthority {
            role: UserRole::HqManagement,
            max_amount,
            can_direct_approve: false,
            direct_approve_limit: None,
            is_active: true,
        }]
    }

    #[test]
    fn staged_orders_follow_the_step_role() {
        assert!(can_act(&[], UserRole::Executive, Some(UserRole::HqManagement), true, 1.0));
        assert!(!can_act(&[], UserRole::ProjectManager, Some(UserRole::HqManagement), true, 1.0));
    }

    #[test]
    fn listing_and_deciding_agree_without_authorities() {
        let amount = 200_000.0;
        let routed = check_authority(&[], UserRole::FieldWorker, amount)
            .next_approver_role
            .unwrap_or_else(|| required_role_for_amount(amount));
        assert_eq!(routed, UserRole::ProjectManager);

        for role in UserRole::ALL {
            let listed = can_act(&[], *role, Some(routed), false, amount);
            let decided = approval::may_decide(&[], *role, None, amount).is_ok();
            assert_eq!(listed, decided, "{} disagrees", role);
        }
        assert!(can_act(&[], UserRole::ProjectManager, Some(routed), false, amount));
        assert!(!can_act(&[], UserRole::FieldWorker, Some(routed), false, amount));
    }

    #[test]
    fn listing_and_deciding_agree_with_configured_limits() {
        let table = hq_limit(50_000_000.0);
        let amount = 40_000_000.0;
        assert!(can_act(&table, UserRole::HqManagement, Some(UserRole::HqManagement), false, amount));
        assert!(approval::may_decide(&table, UserRole::HqManagement, None, amount).is_ok());

        let tight = hq_limit(20_000_000.0);
        assert!(!can_act(&tight, UserRole::HqManagement, Some(UserRole::HqManagement), false, amount));
        assert!(approval::may_decide(&tight, UserRole::HqManagement, None, amount).is_err());
    }

    #[test]
    fn tally_counts_by_status() {
        let now = Utc.with_ymd_and_hms(2025, 3, 5, 10, 0, 0).unwrap();
        let rows = vec![
            ("created".to_string(), "pending".to_string(), Some("project_manager".to_string()), 10.0, None, true),
            ("created".to_string(), "pending".to_string(), Some("executive".to_string()), 10.0, None, true),
            ("created".to_string(), "approved".to_string(), None, 10.0, Some(now), false),
            ("sent".to_string(), "not_required".to_string(), None, 10.0, Some(now - chrono::Duration::days(2)), false),
            ("draft".to_string(), "rejected".to_string(), None, 10.0, None, false),
            ("cancelled".to_string(), "pending".to_string(), None, 10.0, None, false),
        ];
        let stats = tally(&rows, &[], UserRole::HqManagement, now.date_naive());
        assert_eq!(
            stats,
            ApprovalStats {
                pending: 2,
                approved: 1,
                rejected: 1,
                not_required: 1,
                awaiting_me: 1,
                approved_today: 1,
            }
        );
    }
}
