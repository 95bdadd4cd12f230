//! Order submission and the approval chain.
//!
//! Every entry point runs in one transaction: the order row is locked, the
//! rules in `shared` decide, and the resulting order, step, history and outbox
//! rows are written together.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::Serialize;
use shared::authority::{check_amount_authority, check_authority, check_auto_approval};
use shared::progress::{advance, due_auto_approvals};
use shared::roles::required_role_for_amount;
use shared::workflow::route;
use shared::*;
use tracing::info;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::*;
use crate::outbox;
use crate::schema::*;

pub async fn lock_order(conn: &mut AsyncPgConnection, id: Uuid) -> ApiResult<PurchaseOrder> {
    Ok(purchase_orders::table
        .find(id)
        .select(PurchaseOrder::as_select())
        .for_update()
        .first(conn)
        .await?)
}

/// Active templates visible to a company: its own plus the global ones.
pub async fn load_templates(
    conn: &mut AsyncPgConnection,
    company_id: Option<Uuid>,
) -> ApiResult<Vec<WorkflowTemplate>> {
    let rows = approval_workflow_templates::table
        .filter(approval_workflow_templates::is_active.eq(true))
        .select(TemplateRow::as_select())
        .load(conn)
        .await?;
    rows.iter()
        .filter(|r| r.company_id.is_none() || r.company_id == company_id)
        .map(|r| WorkflowTemplate::try_from(r).map_err(ApiError::from))
        .collect()
}

pub async fn load_settings(
    conn: &mut AsyncPgConnection,
    company_id: Option<Uuid>,
) -> ApiResult<Option<ApprovalSettings>> {
    let Some(company_id) = company_id else {
        return Ok(None);
    };
    let row = approval_workflow_settings::table
        .filter(approval_workflow_settings::company_id.eq(company_id))
        .filter(approval_workflow_settings::is_active.eq(true))
        .select(SettingsRow::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(row.as_ref().map(ApprovalSettings::try_from).transpose()?)
}

pub async fn load_authorities(conn: &mut AsyncPgConnection) -> ApiResult<Vec<ApprovalAuthority>> {
    let rows = approval_authorities::table
        .select(AuthorityRow::as_select())
        .load(conn)
        .await?;
    Ok(rows
        .iter()
        .map(ApprovalAuthority::try_from)
        .collect::<Result<Vec<_>, _>>()?)
}

pub async fn active_steps(conn: &mut AsyncPgConnection, order: Uuid) -> ApiResult<Vec<StepInstance>> {
    Ok(approval_step_instances::table
        .filter(approval_step_instances::order_id.eq(order))
        .filter(approval_step_instances::is_active.eq(true))
        .order(approval_step_instances::step_order.asc())
        .select(StepInstance::as_select())
        .load(conn)
        .await?)
}

/// The category an order is routed on: the major category of its first item.
async fn order_category(conn: &mut AsyncPgConnection, order: Uuid) -> ApiResult<Option<String>> {
    Ok(purchase_order_items::table
        .filter(purchase_order_items::order_id.eq(order))
        .order(purchase_order_items::created_at.asc())
        .select(purchase_order_items::major_category)
        .first::<Option<String>>(conn)
        .await
        .optional()?
        .flatten())
}

async fn last_vendor_delivery(
    conn: &mut AsyncPgConnection,
    vendor: Uuid,
    excluding: Uuid,
) -> ApiResult<Option<DateTime<Utc>>> {
    Ok(purchase_orders::table
        .filter(purchase_orders::vendor_id.eq(vendor))
        .filter(purchase_orders::order_status.eq(OrderStatus::Delivered.as_str()))
        .filter(purchase_orders::id.ne(excluding))
        .select(diesel::dsl::max(purchase_orders::updated_at))
        .first::<Option<DateTime<Utc>>>(conn)
        .await?)
}

async fn record_history(
    conn: &mut AsyncPgConnection,
    entry: NewOrderHistory,
) -> ApiResult<()> {
    diesel::insert_into(order_history::table)
        .values(&entry)
        .execute(conn)
        .await?;
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitOutcome {
    pub order_id: Uuid,
    pub order_status: OrderStatus,
    pub approval_status: ApprovalStatus,
    pub bypass_reason: Option<ApprovalBypassReason>,
    pub current_approver_role: Option<UserRole>,
    pub route: Option<RouteDecision>,
}

/// Moves a draft order out of draft and routes it.
///
/// Automatic bypass is checked first, then the company's approval settings
/// decide between direct approval and a staged chain. Step instances from an
/// earlier round are deactivated so a rejected order starts a fresh chain.
pub async fn submit(conn: &mut AsyncPgConnection, order_id: Uuid, actor: &User) -> ApiResult<SubmitOutcome> {
    let actor_role = actor.role()?;
    let actor_id = actor.id;
    let company_id = actor.company_id;

    conn.transaction::<_, ApiError, _>(|conn| {
        Box::pin(async move {
            let order = lock_order(conn, order_id).await?;
            if order.user_id != actor_id && actor_role != UserRole::Admin {
                return Err(ApiError::from(DomainError::denied(
                    "only the author or an admin may submit this order",
                )));
            }
            let state = order.state()?;
            state.apply(OrderAction::Submit {
                approval: ApprovalStatus::Pending,
            })?;

            let item_count: i64 = purchase_order_items::table
                .filter(purchase_order_items::order_id.eq(order.id))
                .count()
                .get_result(conn)
                .await?;
            if item_count == 0 {
                return Err(ApiError::from(DomainError::validation("an order needs at least one item")));
            }

            let now = Utc::now();
            let amount = order.amount();
            let category = order_category(conn, order.id).await?;
            let earlier_bypass = order
                .approval_bypass_reason
                .as_deref()
                .map(|s| s.parse::<ApprovalBypassReason>())
                .transpose()?;
            let facts = AutoApprovalFacts {
                amount,
                notes: order.notes.as_deref(),
                bypass_reason: earlier_bypass,
                last_vendor_delivery: last_vendor_delivery(conn, order.vendor_id, order.id).await?,
                now,
            };

            diesel::update(
                approval_step_instances::table
                    .filter(approval_step_instances::order_id.eq(order.id))
                    .filter(approval_step_instances::is_active.eq(true)),
            )
            .set((
                approval_step_instances::is_active.eq(false),
                approval_step_instances::updated_at.eq(now),
            ))
            .execute(conn)
            .await?;

            let mut bypass = check_auto_approval(&facts);
            let mut approved_by = None;
            let mut approver_role = None;
            let mut decision = None;

            if bypass.is_none() {
                let settings = load_settings(conn, company_id).await?;
                let templates = load_templates(conn, company_id).await?;
                let ctx = RouteContext {
                    amount,
                    category: category.as_deref(),
                    submitter_role: actor_role,
                    now,
                };
                let routed = route(settings.as_ref(), &templates, &ctx);

                match routed.mode {
                    ApprovalMode::Direct if routed.can_direct_approve => {
                        bypass = Some(ApprovalBypassReason::DirectApproval);
                        approved_by = Some(actor_id);
                    }
                    ApprovalMode::Direct => {
                        let authorities = load_authorities(conn).await?;
                        let check = check_authority(&authorities, actor_role, amount);
                        if check.can_direct_approve {
                            bypass = Some(ApprovalBypassReason::DirectApproval);
                            approved_by = Some(actor_id);
                        } else {
                            approver_role = Some(
                                check
                                    .next_approver_role
                                    .unwrap_or_else(|| required_role_for_amount(amount)),
                            );
                        }
                    }
                    ApprovalMode::Staged => {
                        let first_pending = routed
                            .steps
                            .iter()
                            .find(|s| s.status == StepStatus::Pending);
                        match first_pending {
                            Some(step) => approver_role = Some(step.required_role),
                            None => bypass = Some(ApprovalBypassReason::AllStepsSkipped),
                        }
                        let rows: Vec<NewStepInstance> = routed
                            .steps
                            .iter()
                            .map(|s| NewStepInstance::planned(order.id, routed.template_id, s))
                            .collect();
                        if !rows.is_empty() {
                            diesel::insert_into(approval_step_instances::table)
                                .values(&rows)
                                .execute(conn)
                                .await?;
                        }
                    }
                }
                decision = Some(routed);
            }

            let approval = match bypass {
                Some(ApprovalBypassReason::AllStepsSkipped) => ApprovalStatus::Approved,
                Some(_) => ApprovalStatus::NotRequired,
                None => ApprovalStatus::Pending,
            };
            let next = state.apply(OrderAction::Submit { approval })?;
            let approved_at = bypass.is_some().then_some(now);
            let template_id = decision.as_ref().and_then(|d| d.template_id);

            diesel::update(purchase_orders::table.find(order.id))
                .set((
                    OrderStateChange::from(next),
                    purchase_orders::approval_bypass_reason.eq(bypass.map(|b| b.to_string())),
                    purchase_orders::current_approver_role.eq(approver_role.map(|r| r.to_string())),
                    purchase_orders::approved_by.eq(approved_by),
                    purchase_orders::approved_at.eq(approved_at),
                    purchase_orders::template_id.eq(template_id),
                ))
                .execute(conn)
                .await?;

            record_history(
                conn,
                NewOrderHistory::new(
                    order.id,
                    Some(actor_id),
                    "submitted",
                    serde_json::json!({
                        "from": state.legacy(),
                        "to": next.legacy(),
                        "approval_status": next.approval_status,
                        "bypass_reason": bypass,
                        "reasoning": decision.as_ref().map(|d| d.reasoning.clone()),
                    }),
                ),
            )
            .await?;

            let event = match (bypass, approver_role) {
                (Some(reason), _) => NotificationEvent::OrderApproved {
                    order_id: order.id,
                    order_number: order.order_number.clone(),
                    bypass_reason: Some(reason),
                },
                (None, role) => NotificationEvent::ApprovalRequested {
                    order_id: order.id,
                    order_number: order.order_number.clone(),
                    step_order: decision
                        .as_ref()
                        .and_then(|d| d.steps.iter().find(|s| s.status == StepStatus::Pending))
                        .map(|s| s.step_order)
                        .unwrap_or(0),
                    required_role: role.unwrap_or_else(|| required_role_for_amount(amount)),
                    total_amount: amount,
                },
            };
            outbox::enqueue(conn, &event).await?;

            info!(
                "Order {} submitted: {} / {}",
                order.order_number, next.order_status, next.approval_status
            );

            Ok(SubmitOutcome {
                order_id: order.id,
                order_status: next.order_status,
                approval_status: next.approval_status,
                bypass_reason: bypass,
                current_approver_role: approver_role,
                route: decision,
            })
        })
    })
    .await
}

/// Whether `role` may decide a pending order. A staged order needs the role
/// its current step names; any other order needs authority over the amount.
pub fn may_decide(
    authorities: &[ApprovalAuthority],
    role: UserRole,
    step_role: Option<UserRole>,
    amount: f64,
) -> Result<(), DomainError> {
    match step_role {
        Some(required) if role.covers(required) => Ok(()),
        Some(required) => Err(DomainError::denied(format!(
            "this step needs the {} role",
            required
        ))),
        None => check_amount_authority(authorities, role, amount),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionOutcome {
    pub order_id: Uuid,
    pub order_status: OrderStatus,
    pub approval_status: ApprovalStatus,
    pub decided_step: Option<i32>,
    pub next_approver_role: Option<UserRole>,
}

/// Applies an approver's decision to an order waiting for approval.
///
/// Orders routed through a staged template advance their current step; orders
/// without steps are decided in one go by anyone whose limit covers the
/// amount. A rejection needs a reason and sends the order back to draft.
pub async fn decide(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    actor: &User,
    decision: Decision,
    comment: Option<String>,
) -> ApiResult<DecisionOutcome> {
    let actor_role = actor.role()?;
    let actor_id = actor.id;
    let comment = comment.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());
    if decision == Decision::Reject && comment.is_none() {
        return Err(DomainError::validation("a rejection needs a reason").into());
    }

    conn.transaction::<_, ApiError, _>(|conn| {
        Box::pin(async move {
            let order = lock_order(conn, order_id).await?;
            let state = order.state()?;
            let action = match decision {
                Decision::Approve => OrderAction::Approve,
                Decision::Reject => OrderAction::Reject,
            };
            state.apply(action)?;

            let now = Utc::now();
            let amount = order.amount();
            let steps = active_steps(conn, order.id).await?;

            let (settles, decided_step, next_role) = if steps.is_empty() {
                let authorities = load_authorities(conn).await?;
                may_decide(&authorities, actor_role, None, amount)?;
                (true, None, None)
            } else {
                let states = step_states(&steps)?;
                let step_advance = advance(&states, actor_role, decision)?;
                let decided = steps.iter().find(|s| s.id == step_advance.step_id);
                let (rejection_reason, comments) = match decision {
                    Decision::Reject => (comment.clone(), None),
                    Decision::Approve => (None, comment.clone()),
                };
                diesel::update(approval_step_instances::table.find(step_advance.step_id))
                    .set((
                        approval_step_instances::status.eq(step_advance.step_status.as_str()),
                        approval_step_instances::approved_by.eq(Some(actor_id)),
                        approval_step_instances::approved_at.eq(Some(now)),
                        approval_step_instances::rejection_reason.eq(rejection_reason),
                        approval_step_instances::comments.eq(comments),
                        approval_step_instances::updated_at.eq(now),
                    ))
                    .execute(conn)
                    .await?;

                let step_order = decided.map(|s| s.step_order);
                if decision == Decision::Approve {
                    outbox::enqueue(
                        conn,
                        &NotificationEvent::StepApproved {
                            order_id: order.id,
                            order_number: order.order_number.clone(),
                            step_order: step_order.unwrap_or_default(),
                            approved_by: Some(actor_id),
                            automatic: false,
                        },
                    )
                    .await?;
                }
                (
                    step_advance.order_approval.is_some(),
                    step_order,
                    step_advance.next_step.map(|s| (s.step_order, s.required_role)),
                )
            };

            let next = if settles { state.apply(action)? } else { state };
            let approved = settles && decision == Decision::Approve;

            diesel::update(purchase_orders::table.find(order.id))
                .set((
                    OrderStateChange::from(next),
                    purchase_orders::current_approver_role.eq(next_role.map(|(_, r)| r.to_string())),
                    purchase_orders::approved_by.eq(if approved { Some(actor_id) } else { order.approved_by }),
                    purchase_orders::approved_at.eq(if approved { Some(now) } else { order.approved_at }),
                ))
                .execute(conn)
                .await?;

            record_history(
                conn,
                NewOrderHistory::new(
                    order.id,
                    Some(actor_id),
                    match decision {
                        Decision::Approve => "approved",
                        Decision::Reject => "rejected",
                    },
                    serde_json::json!({
                        "from": state.legacy(),
                        "to": next.legacy(),
                        "step_order": decided_step,
                        "comment": comment,
                    }),
                ),
            )
            .await?;

            let event = match (decision, settles, next_role) {
                (Decision::Reject, _, _) => Some(NotificationEvent::OrderRejected {
                    order_id: order.id,
                    order_number: order.order_number.clone(),
                    rejected_by: actor_id,
                    reason: comment.clone(),
                }),
                (Decision::Approve, true, _) => Some(NotificationEvent::OrderApproved {
                    order_id: order.id,
                    order_number: order.order_number.clone(),
                    bypass_reason: None,
                }),
                (Decision::Approve, false, Some((step_order, required_role))) => {
                    Some(NotificationEvent::ApprovalRequested {
                        order_id: order.id,
                        order_number: order.order_number.clone(),
                        step_order,
                        required_role,
                        total_amount: amount,
                    })
                }
                (Decision::Approve, false, None) => None,
            };
            if let Some(event) = event {
                outbox::enqueue(conn, &event).await?;
            }

            info!(
                "Order {} {:?} by {}: now {} / {}",
                order.order_number, decision, actor_id, next.order_status, next.approval_status
            );

            Ok(DecisionOutcome {
                order_id: order.id,
                order_status: next.order_status,
                approval_status: next.approval_status,
                decided_step,
                next_approver_role: next_role.map(|(_, r)| r),
            })
        })
    })
    .await
}

/// Orders with at least one active pending step whose auto-approval time has
/// passed.
pub async fn orders_due_for_auto_approval(
    conn: &mut AsyncPgConnection,
    now: DateTime<Utc>,
) -> ApiResult<Vec<Uuid>> {
    Ok(approval_step_instances::table
        .filter(approval_step_instances::is_active.eq(true))
        .filter(approval_step_instances::status.eq(StepStatus::Pending.as_str()))
        .filter(approval_step_instances::auto_approve_at.le(now))
        .select(approval_step_instances::order_id)
        .distinct()
        .load(conn)
        .await?)
}

/// Approves the due steps of one order. Returns how many steps were approved.
pub async fn auto_approve(conn: &mut AsyncPgConnection, order_id: Uuid, now: DateTime<Utc>) -> ApiResult<usize> {
    conn.transaction::<_, ApiError, _>(|conn| {
        Box::pin(async move {
            let order = lock_order(conn, order_id).await?;
            let state = order.state()?;
            if state.apply(OrderAction::Approve).is_err() {
                return Ok(0);
            }

            let steps = active_steps(conn, order.id).await?;
            let states = step_states(&steps)?;
            let due = due_auto_approvals(&states, now);
            if due.is_empty() {
                return Ok(0);
            }

            diesel::update(
                approval_step_instances::table.filter(approval_step_instances::id.eq_any(due.clone())),
            )
            .set((
                approval_step_instances::status.eq(StepStatus::Approved.as_str()),
                approval_step_instances::approved_at.eq(Some(now)),
                approval_step_instances::comments.eq(Some("approved automatically after the waiting period")),
                approval_step_instances::updated_at.eq(now),
            ))
            .execute(conn)
            .await?;

            for step in states.iter().filter(|s| due.contains(&s.id)) {
                outbox::enqueue(
                    conn,
                    &NotificationEvent::StepApproved {
                        order_id: order.id,
                        order_number: order.order_number.clone(),
                        step_order: step.step_order,
                        approved_by: None,
                        automatic: true,
                    },
                )
                .await?;
            }

            let next_step = states
                .iter()
                .filter(|s| s.status == StepStatus::Pending && !due.contains(&s.id))
                .min_by_key(|s| s.step_order);

            let next = match next_step {
                Some(_) => state,
                None => state.apply(OrderAction::Approve)?,
            };
            diesel::update(purchase_orders::table.find(order.id))
                .set((
                    OrderStateChange::from(next),
                    purchase_orders::current_approver_role
                        .eq(next_step.map(|s| s.required_role.to_string())),
                    purchase_orders::approved_at.eq(if next_step.is_none() { Some(now) } else { order.approved_at }),
                ))
                .execute(conn)
                .await?;

            record_history(
                conn,
                NewOrderHistory::new(
                    order.id,
                    None,
                    "auto_approved",
                    serde_json::json!({
                        "steps": states
                            .iter()
                            .filter(|s| due.contains(&s.id))
                            .map(|s| s.step_order)
                            .collect::<Vec<_>>(),
                        "to": next.legacy(),
                    }),
                ),
            )
            .await?;

            let event = match next_step {
                Some(step) => NotificationEvent::ApprovalRequested {
                    order_id: order.id,
                    order_number: order.order_number.clone(),
                    step_order: step.step_order,
                    required_role: step.required_role,
                    total_amount: order.amount(),
                },
                None => NotificationEvent::OrderApproved {
                    order_id: order.id,
                    order_number: order.order_number.clone(),
                    bypass_reason: None,
                },
            };
            outbox::enqueue(conn, &event).await?;

            Ok(due.len())
        })
    })
    .await
}
