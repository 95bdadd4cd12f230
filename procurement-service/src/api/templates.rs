use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use shared::authority::{check_authority, required_approver_chain};
use shared::workflow::route;
use shared::*;
use tracing::info;
use uuid::Uuid;

use super::{ActingUser, AppState};
use crate::approval;
use crate::error::{ApiError, ApiResult};
use crate::models::*;
use crate::schema::*;

#[derive(Debug, Clone, Deserialize)]
pub struct TemplateRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "active")]
    pub is_active: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub min_amount: Option<f64>,
    #[serde(default)]
    pub max_amount: Option<f64>,
    #[serde(default)]
    pub category_filter: Vec<String>,
    pub steps: Vec<WorkflowStep>,
}

fn active() -> bool {
    true
}

impl TemplateRequest {
    fn into_template(self, id: Uuid) -> Result<WorkflowTemplate, DomainError> {
        let template = WorkflowTemplate {
            id,
            name: self.name,
            description: self.description,
            is_active: self.is_active,
            is_default: self.is_default,
            min_amount: self.min_amount,
            max_amount: self.max_amount,
            category_filter: self
                .category_filter
                .into_iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
            steps: self.steps,
        };
        template.validate()?;
        Ok(template)
    }
}

pub async fn list(State(state): State<AppState>) -> ApiResult<Json<Vec<TemplateRow>>> {
    let mut conn = state.pool.get().await?;
    let rows = approval_workflow_templates::table
        .order((
            approval_workflow_templates::is_default.desc(),
            approval_workflow_templates::name.asc(),
        ))
        .select(TemplateRow::as_select())
        .load(&mut conn)
        .await?;
    Ok(Json(rows))
}

pub async fn get(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<TemplateRow>> {
    let mut conn = state.pool.get().await?;
    let row = approval_workflow_templates::table
        .find(id)
        .select(TemplateRow::as_select())
        .first(&mut conn)
        .await?;
    Ok(Json(row))
}

/// Only one active default template per company scope.
async fn clear_other_defaults(
    conn: &mut diesel_async::AsyncPgConnection,
    keep: Uuid,
    company_id: Option<Uuid>,
) -> ApiResult<()> {
    let others = approval_workflow_templates::table
        .filter(approval_workflow_templates::id.ne(keep))
        .filter(approval_workflow_templates::is_default.eq(true))
        .into_boxed();
    let others = match company_id {
        Some(c) => others.filter(approval_workflow_templates::company_id.eq(c)),
        None => others.filter(approval_workflow_templates::company_id.is_null()),
    };
    let ids: Vec<Uuid> = others
        .select(approval_workflow_templates::id)
        .load(conn)
        .await?;
    if !ids.is_empty() {
        diesel::update(approval_workflow_templates::table.filter(approval_workflow_templates::id.eq_any(ids)))
            .set(approval_workflow_templates::is_default.eq(false))
            .execute(conn)
            .await?;
    }
    Ok(())
}

pub async fn create(
    State(state): State<AppState>,
    user: ActingUser,
    Json(request): Json<TemplateRequest>,
) -> ApiResult<(StatusCode, Json<TemplateRow>)> {
    user.require_admin()?;
    let template = request.into_template(Uuid::new_v4())?;
    let values = TemplateValues::from_template(&template, user.0.company_id)?;
    let mut conn = state.pool.get().await?;

    let row = conn
        .transaction::<_, ApiError, _>(|conn| {
            Box::pin(async move {
                if values.is_default {
                    clear_other_defaults(conn, values.id, values.company_id).await?;
                }
                let row = diesel::insert_into(approval_workflow_templates::table)
                    .values(&values)
                    .returning(TemplateRow::as_returning())
                    .get_result(conn)
                    .await?;
                Ok(row)
            })
        })
        .await?;
    info!("Created approval workflow template '{}'", row.name);
    Ok((StatusCode::CREATED, Json(row)))
}

pub async fn update(
    State(state): State<AppState>,
    user: ActingUser,
    Path(id): Path<Uuid>,
    Json(request): Json<TemplateRequest>,
) -> ApiResult<Json<TemplateRow>> {
    user.require_admin()?;
    let template = request.into_template(id)?;
    let mut conn = state.pool.get().await?;

    let row = conn
        .transaction::<_, ApiError, _>(|conn| {
            Box::pin(async move {
                let existing = approval_workflow_templates::table
                    .find(id)
                    .select(TemplateRow::as_select())
                    .for_update()
                    .first(conn)
                    .await?;
                let values = TemplateValues::from_template(&template, existing.company_id)?;
                if values.is_default {
                    clear_other_defaults(conn, id, existing.company_id).await?;
                }
                let row = diesel::update(approval_workflow_templates::table.find(id))
                    .set((&values, approval_workflow_templates::updated_at.eq(Utc::now())))
                    .returning(TemplateRow::as_returning())
                    .get_result(conn)
                    .await?;
                Ok(row)
            })
        })
        .await?;
    Ok(Json(row))
}

/// Templates referenced by orders are deactivated instead of removed.
pub async fn delete(
    State(state): State<AppState>,
    user: ActingUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    user.require_admin()?;
    let mut conn = state.pool.get().await?;
    let in_use: i64 = purchase_orders::table
        .filter(purchase_orders::template_id.eq(id))
        .count()
        .get_result(&mut conn)
        .await?;

    let affected = if in_use > 0 {
        diesel::update(approval_workflow_templates::table.find(id))
            .set((
                approval_workflow_templates::is_active.eq(false),
                approval_workflow_templates::is_default.eq(false),
                approval_workflow_templates::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)
            .await?
    } else {
        diesel::delete(approval_workflow_templates::table.find(id))
            .execute(&mut conn)
            .await?
    };
    if affected == 0 {
        return Err(ApiError::not_found("template not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    /// False when the company has never saved settings and the built-in
    /// direct, admin-only behaviour applies.
    pub configured: bool,
    #[serde(flatten)]
    pub settings: ApprovalSettings,
}

fn unconfigured() -> ApprovalSettings {
    ApprovalSettings {
        mode: ApprovalMode::Direct,
        direct_approval_roles: vec![UserRole::Admin],
        require_all_stages: true,
        skip_lower_stages: false,
    }
}

pub async fn get_settings(State(state): State<AppState>, user: ActingUser) -> ApiResult<Json<SettingsResponse>> {
    let mut conn = state.pool.get().await?;
    let settings = approval::load_settings(&mut conn, user.0.company_id).await?;
    Ok(Json(SettingsResponse {
        configured: settings.is_some(),
        settings: settings.unwrap_or_else(unconfigured),
    }))
}

/// Saves a new active settings row; the previous one is kept inactive.
pub async fn put_settings(
    State(state): State<AppState>,
    user: ActingUser,
    Json(settings): Json<ApprovalSettings>,
) -> ApiResult<Json<SettingsResponse>> {
    user.require_admin()?;
    let company_id = user
        .0
        .company_id
        .ok_or_else(|| ApiError::unprocessable("user belongs to no company"))?;
    let user_id = user.0.id;
    let mut conn = state.pool.get().await?;

    let row = NewSettings {
        id: Uuid::new_v4(),
        company_id,
        approval_mode: settings.mode.to_string(),
        direct_approval_roles: serde_json::to_value(&settings.direct_approval_roles)?,
        require_all_stages: settings.require_all_stages,
        skip_lower_stages: settings.skip_lower_stages,
        updated_by: Some(user_id),
    };
    conn.transaction::<_, ApiError, _>(|conn| {
        Box::pin(async move {
            diesel::update(
                approval_workflow_settings::table
                    .filter(approval_workflow_settings::company_id.eq(company_id))
                    .filter(approval_workflow_settings::is_active.eq(true)),
            )
            .set((
                approval_workflow_settings::is_active.eq(false),
                approval_workflow_settings::updated_at.eq(Utc::now()),
            ))
            .execute(conn)
            .await?;
            diesel::insert_into(approval_workflow_settings::table)
                .values(&row)
                .execute(conn)
                .await?;
            Ok(())
        })
    })
    .await?;

    info!("Approval settings of company {} set to {}", company_id, settings.mode);
    Ok(Json(SettingsResponse {
        configured: true,
        settings,
    }))
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthorityRequest {
    pub role: UserRole,
    pub max_amount: f64,
    #[serde(default)]
    pub can_direct_approve: bool,
    #[serde(default)]
    pub direct_approve_limit: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "active")]
    pub is_active: bool,
}

impl AuthorityRequest {
    fn values(&self, id: Uuid) -> Result<AuthorityValues, DomainError> {
        if self.max_amount < 0.0 {
            return Err(DomainError::validation("max_amount cannot be negative"));
        }
        if let Some(limit) = self.direct_approve_limit {
            if limit < 0.0 || limit > self.max_amount {
                return Err(DomainError::validation(
                    "direct_approve_limit must lie between 0 and max_amount",
                ));
            }
        }
        Ok(AuthorityValues {
            id,
            role: self.role.to_string(),
            max_amount: money(self.max_amount)?,
            can_direct_approve: self.can_direct_approve,
            direct_approve_limit: self.direct_approve_limit.map(money).transpose()?,
            description: self.description.clone(),
            is_active: self.is_active,
        })
    }
}

pub async fn list_authorities(State(state): State<AppState>) -> ApiResult<Json<Vec<AuthorityRow>>> {
    let mut conn = state.pool.get().await?;
    let rows = approval_authorities::table
        .order(approval_authorities::max_amount.asc())
        .select(AuthorityRow::as_select())
        .load(&mut conn)
        .await?;
    Ok(Json(rows))
}

pub async fn get_authority(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<AuthorityRow>> {
    let mut conn = state.pool.get().await?;
    let row = approval_authorities::table
        .find(id)
        .select(AuthorityRow::as_select())
        .first(&mut conn)
        .await?;
    Ok(Json(row))
}

pub async fn create_authority(
    State(state): State<AppState>,
    user: ActingUser,
    Json(request): Json<AuthorityRequest>,
) -> ApiResult<(StatusCode, Json<AuthorityRow>)> {
    user.require_admin()?;
    let values = request.values(Uuid::new_v4())?;
    let mut conn = state.pool.get().await?;
    let row = diesel::insert_into(approval_authorities::table)
        .values(&values)
        .returning(AuthorityRow::as_returning())
        .get_result(&mut conn)
        .await?;
    Ok((StatusCode::CREATED, Json(row)))
}

pub async fn update_authority(
    State(state): State<AppState>,
    user: ActingUser,
    Path(id): Path<Uuid>,
    Json(request): Json<AuthorityRequest>,
) -> ApiResult<Json<AuthorityRow>> {
    user.require_admin()?;
    let values = request.values(id)?;
    let mut conn = state.pool.get().await?;
    let row = diesel::update(approval_authorities::table.find(id))
        .set((&values, approval_authorities::updated_at.eq(Utc::now())))
        .returning(AuthorityRow::as_returning())
        .get_result(&mut conn)
        .await?;
    Ok(Json(row))
}

pub async fn delete_authority(
    State(state): State<AppState>,
    user: ActingUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    user.require_admin()?;
    let mut conn = state.pool.get().await?;
    let affected = diesel::delete(approval_authorities::table.find(id))
        .execute(&mut conn)
        .await?;
    if affected == 0 {
        return Err(ApiError::not_found("approval authority not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct PreviewRequest {
    pub amount: f64,
    #[serde(default)]
    pub category: Option<String>,
    /// Defaults to the acting user's role.
    #[serde(default)]
    pub submitter_role: Option<UserRole>,
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    #[serde(flatten)]
    pub route: RouteDecision,
    pub authority: AuthorityCheck,
    pub approver_chain: Vec<UserRole>,
}

/// Shows how an order of the given amount and category would be routed,
/// without creating anything.
pub async fn preview(
    State(state): State<AppState>,
    user: ActingUser,
    Json(request): Json<PreviewRequest>,
) -> ApiResult<Json<PreviewResponse>> {
    if !request.amount.is_finite() || request.amount < 0.0 {
        return Err(DomainError::validation("amount must be a non-negative number").into());
    }
    let submitter_role = match request.submitter_role {
        Some(role) => role,
        None => user.role()?,
    };
    let mut conn = state.pool.get().await?;
    let settings = approval::load_settings(&mut conn, user.0.company_id).await?;
    let templates = approval::load_templates(&mut conn, user.0.company_id).await?;
    let authorities = approval::load_authorities(&mut conn).await?;

    let ctx = RouteContext {
        amount: request.amount,
        category: request.category.as_deref(),
        submitter_role,
        now: Utc::now(),
    };
    Ok(Json(PreviewResponse {
        route: route(settings.as_ref(), &templates, &ctx),
        authority: check_authority(&authorities, submitter_role, request.amount),
        approver_chain: required_approver_chain(&authorities, request.amount),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> TemplateRequest {
        serde_json::from_value(serde_json::json!({
            "name": "  자재 구매  ",
            "category_filter": [" 철근 ", ""],
            "steps": [
                {"step_order": 1, "required_role": "project_manager"},
                {"step_order": 2, "required_role": "executive", "skip_condition": "amount_below", "skip_threshold": 30000000.0}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn template_request_defaults_and_trims() {
        let template = request().into_template(Uuid::new_v4()).unwrap();
        assert!(template.is_active);
        assert!(!template.is_default);
        assert_eq!(template.category_filter, vec!["철근".to_string()]);

        let values = TemplateValues::from_template(&template, None).unwrap();
        assert_eq!(values.name, "자재 구매");
        assert_eq!(values.steps.as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn template_request_is_validated() {
        let mut bad = request();
        bad.steps.clear();
        assert!(bad.into_template(Uuid::new_v4()).is_err());
    }

    #[test]
    fn authority_limits_are_checked() {
        let mut req = AuthorityRequest {
            role: UserRole::HqManagement,
            max_amount: 30_000_000.0,
            can_direct_approve: true,
            direct_approve_limit: Some(10_000_000.0),
            description: None,
            is_active: true,
        };
        let values = req.values(Uuid::new_v4()).unwrap();
        assert_eq!(values.role, "hq_management");

        req.direct_approve_limit = Some(40_000_000.0);
        assert!(req.values(Uuid::new_v4()).is_err());
    }
}
