//! Vendors, projects and the item catalogue. Deleting a record only marks it
//! inactive since orders keep referring to it.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::Deserialize;
use shared::excel::is_valid_email;
use shared::*;
use uuid::Uuid;

use super::{ActingUser, AppState, Page};
use crate::error::{ApiError, ApiResult};
use crate::models::*;
use crate::schema::*;

const VENDOR_TYPES: [&str; 2] = ["vendor", "delivery"];
const PROJECT_STATUSES: [&str; 5] = ["planning", "active", "on_hold", "completed", "cancelled"];

#[derive(Debug, Default, Deserialize)]
pub struct MasterFilter {
    pub search: Option<String>,
    #[serde(default)]
    pub include_inactive: bool,
    /// Only used by the item list.
    pub major_category: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl MasterFilter {
    fn page(&self) -> Page {
        Page {
            page: self.page,
            limit: self.limit,
        }
    }

    fn pattern(&self) -> Option<String> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{}%", s))
    }
}

fn required(field: &str, value: &str) -> Result<String, DomainError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(DomainError::validation(format!("{} is required", field)));
    }
    Ok(value.to_string())
}

fn one_of(field: &str, value: &str, allowed: &[&str]) -> Result<String, DomainError> {
    if !allowed.contains(&value) {
        return Err(DomainError::validation(format!(
            "{} must be one of {}",
            field,
            allowed.join(", ")
        )));
    }
    Ok(value.to_string())
}

fn checked_email(email: Option<String>) -> Result<Option<String>, DomainError> {
    match email.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
        Some(e) if is_valid_email(e) => Ok(Some(e.to_string())),
        Some(e) => Err(DomainError::validation(format!("'{}' is not a valid email", e))),
        None => Ok(None),
    }
}

fn cleaned_aliases(aliases: Vec<String>) -> serde_json::Value {
    let mut seen: Vec<String> = Vec::new();
    for alias in aliases {
        let alias = alias.trim().to_string();
        if !alias.is_empty() && !seen.iter().any(|s| s.eq_ignore_ascii_case(&alias)) {
            seen.push(alias);
        }
    }
    serde_json::json!(seen)
}

// vendors

#[derive(Debug, Deserialize)]
pub struct VendorRequest {
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub business_number: Option<String>,
    pub contact_person: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub vendor_type: Option<String>,
}

impl VendorRequest {
    fn into_new(self) -> Result<NewVendor, DomainError> {
        Ok(NewVendor {
            id: Uuid::new_v4(),
            name: required("name", &self.name)?,
            aliases: cleaned_aliases(self.aliases),
            business_number: self.business_number,
            contact_person: self.contact_person,
            email: checked_email(self.email)?,
            phone: self.phone,
            address: self.address,
            vendor_type: one_of(
                "vendor_type",
                self.vendor_type.as_deref().unwrap_or("vendor"),
                &VENDOR_TYPES,
            )?,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct VendorPatch {
    pub name: Option<String>,
    pub aliases: Option<Vec<String>>,
    pub business_number: Option<String>,
    pub contact_person: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub vendor_type: Option<String>,
    pub is_active: Option<bool>,
}

impl VendorPatch {
    fn into_changes(self) -> Result<VendorChanges, DomainError> {
        Ok(VendorChanges {
            name: self.name.as_deref().map(|n| required("name", n)).transpose()?,
            aliases: self.aliases.map(cleaned_aliases),
            business_number: self.business_number,
            contact_person: self.contact_person,
            email: checked_email(self.email)?,
            phone: self.phone,
            address: self.address,
            vendor_type: self
                .vendor_type
                .as_deref()
                .map(|t| one_of("vendor_type", t, &VENDOR_TYPES))
                .transpose()?,
            is_active: self.is_active,
            updated_at: Some(Utc::now()),
        })
    }
}

pub async fn list_vendors(
    State(state): State<AppState>,
    Query(filter): Query<MasterFilter>,
) -> ApiResult<Json<Vec<Vendor>>> {
    let mut conn = state.pool.get().await?;
    let mut query = vendors::table.into_boxed();
    if !filter.include_inactive {
        query = query.filter(vendors::is_active.eq(true));
    }
    if let Some(pattern) = filter.pattern() {
        query = query.filter(
            vendors::name
                .ilike(pattern.clone())
                .or(vendors::contact_person.ilike(pattern)),
        );
    }
    let page = filter.page();
    let rows = query
        .order(vendors::name.asc())
        .limit(page.limit())
        .offset(page.offset())
        .select(Vendor::as_select())
        .load(&mut conn)
        .await?;
    Ok(Json(rows))
}

pub async fn get_vendor(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Vendor>> {
    let mut conn = state.pool.get().await?;
    let vendor = vendors::table
        .find(id)
        .select(Vendor::as_select())
        .first(&mut conn)
        .await?;
    Ok(Json(vendor))
}

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    pub name: String,
}

/// Finds the active vendor whose name or one of whose aliases matches.
pub async fn lookup_vendor(
    State(state): State<AppState>,
    Query(query): Query<LookupQuery>,
) -> ApiResult<Json<Vendor>> {
    let name = required("name", &query.name)?;
    let mut conn = state.pool.get().await?;
    let vendor = find_vendor(&mut conn, &name)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("no vendor answers to '{}'", name)))?;
    Ok(Json(vendor))
}

pub(super) async fn find_vendor(
    conn: &mut diesel_async::AsyncPgConnection,
    name: &str,
) -> ApiResult<Option<Vendor>> {
    let active = vendors::table
        .filter(vendors::is_active.eq(true))
        .select(Vendor::as_select())
        .load(conn)
        .await?;
    Ok(active.into_iter().find(|v| v.answers_to(name)))
}

pub async fn create_vendor(
    State(state): State<AppState>,
    user: ActingUser,
    Json(request): Json<VendorRequest>,
) -> ApiResult<(StatusCode, Json<Vendor>)> {
    user.require_at_least(UserRole::ProjectManager)?;
    let row = request.into_new()?;
    let mut conn = state.pool.get().await?;
    let vendor = diesel::insert_into(vendors::table)
        .values(&row)
        .returning(Vendor::as_returning())
        .get_result(&mut conn)
        .await?;
    Ok((StatusCode::CREATED, Json(vendor)))
}

pub async fn update_vendor(
    State(state): State<AppState>,
    user: ActingUser,
    Path(id): Path<Uuid>,
    Json(patch): Json<VendorPatch>,
) -> ApiResult<Json<Vendor>> {
    user.require_at_least(UserRole::ProjectManager)?;
    let changes = patch.into_changes()?;
    let mut conn = state.pool.get().await?;
    let vendor = diesel::update(vendors::table.find(id))
        .set(&changes)
        .returning(Vendor::as_returning())
        .get_result(&mut conn)
        .await?;
    Ok(Json(vendor))
}

pub async fn delete_vendor(
    State(state): State<AppState>,
    user: ActingUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    user.require_admin()?;
    let mut conn = state.pool.get().await?;
    let affected = diesel::update(vendors::table.find(id))
        .set((vendors::is_active.eq(false), vendors::updated_at.eq(Utc::now())))
        .execute(&mut conn)
        .await?;
    if affected == 0 {
        return Err(ApiError::not_found("vendor not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}

// projects

#[derive(Debug, Deserialize)]
pub struct ProjectRequest {
    pub project_name: String,
    pub project_code: String,
    pub client_name: Option<String>,
    pub location: Option<String>,
    pub status: Option<String>,
    pub total_budget: Option<f64>,
    pub project_manager_id: Option<Uuid>,
}

impl ProjectRequest {
    fn into_new(self) -> Result<NewProject, DomainError> {
        Ok(NewProject {
            id: Uuid::new_v4(),
            project_name: required("project_name", &self.project_name)?,
            project_code: required("project_code", &self.project_code)?,
            client_name: self.client_name,
            location: self.location,
            status: one_of(
                "status",
                self.status.as_deref().unwrap_or("active"),
                &PROJECT_STATUSES,
            )?,
            total_budget: self.total_budget.map(money).transpose()?,
            project_manager_id: self.project_manager_id,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ProjectPatch {
    pub project_name: Option<String>,
    pub project_code: Option<String>,
    pub client_name: Option<String>,
    pub location: Option<String>,
    pub status: Option<String>,
    pub total_budget: Option<f64>,
    pub project_manager_id: Option<Uuid>,
    pub is_active: Option<bool>,
}

impl ProjectPatch {
    fn into_changes(self) -> Result<ProjectChanges, DomainError> {
        Ok(ProjectChanges {
            project_name: self
                .project_name
                .as_deref()
                .map(|n| required("project_name", n))
                .transpose()?,
            project_code: self
                .project_code
                .as_deref()
                .map(|c| required("project_code", c))
                .transpose()?,
            client_name: self.client_name,
            location: self.location,
            status: self
                .status
                .as_deref()
                .map(|s| one_of("status", s, &PROJECT_STATUSES))
                .transpose()?,
            total_budget: self.total_budget.map(money).transpose()?,
            project_manager_id: self.project_manager_id,
            is_active: self.is_active,
            updated_at: Some(Utc::now()),
        })
    }
}

pub async fn list_projects(
    State(state): State<AppState>,
    Query(filter): Query<MasterFilter>,
) -> ApiResult<Json<Vec<Project>>> {
    let mut conn = state.pool.get().await?;
    let mut query = projects::table.into_boxed();
    if !filter.include_inactive {
        query = query.filter(projects::is_active.eq(true));
    }
    if let Some(pattern) = filter.pattern() {
        query = query.filter(
            projects::project_name
                .ilike(pattern.clone())
                .or(projects::project_code.ilike(pattern)),
        );
    }
    let page = filter.page();
    let rows = query
        .order(projects::project_name.asc())
        .limit(page.limit())
        .offset(page.offset())
        .select(Project::as_select())
        .load(&mut conn)
        .await?;
    Ok(Json(rows))
}

pub async fn get_project(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Project>> {
    let mut conn = state.pool.get().await?;
    let project = projects::table
        .find(id)
        .select(Project::as_select())
        .first(&mut conn)
        .await?;
    Ok(Json(project))
}

pub async fn create_project(
    State(state): State<AppState>,
    user: ActingUser,
    Json(request): Json<ProjectRequest>,
) -> ApiResult<(StatusCode, Json<Project>)> {
    user.require_at_least(UserRole::HqManagement)?;
    let row = request.into_new()?;
    let mut conn = state.pool.get().await?;
    let project = diesel::insert_into(projects::table)
        .values(&row)
        .returning(Project::as_returning())
        .get_result(&mut conn)
        .await?;
    Ok((StatusCode::CREATED, Json(project)))
}

pub async fn update_project(
    State(state): State<AppState>,
    user: ActingUser,
    Path(id): Path<Uuid>,
    Json(patch): Json<ProjectPatch>,
) -> ApiResult<Json<Project>> {
    user.require_at_least(UserRole::ProjectManager)?;
    let changes = patch.into_changes()?;
    let mut conn = state.pool.get().await?;
    let project = diesel::update(projects::table.find(id))
        .set(&changes)
        .returning(Project::as_returning())
        .get_result(&mut conn)
        .await?;
    Ok(Json(project))
}

pub async fn delete_project(
    State(state): State<AppState>,
    user: ActingUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    user.require_admin()?;
    let mut conn = state.pool.get().await?;
    let affected = diesel::update(projects::table.find(id))
        .set((projects::is_active.eq(false), projects::updated_at.eq(Utc::now())))
        .execute(&mut conn)
        .await?;
    if affected == 0 {
        return Err(ApiError::not_found("project not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}

// items

#[derive(Debug, Deserialize)]
pub struct ItemRequest {
    pub name: String,
    pub specification: Option<String>,
    pub unit: String,
    #[serde(default)]
    pub unit_price: f64,
    pub major_category: Option<String>,
    pub middle_category: Option<String>,
    pub minor_category: Option<String>,
}

fn checked_price(price: f64) -> Result<f64, DomainError> {
    if price < 0.0 {
        return Err(DomainError::validation("unit_price cannot be negative"));
    }
    Ok(price)
}

impl ItemRequest {
    fn into_new(self) -> Result<NewItem, DomainError> {
        Ok(NewItem {
            id: Uuid::new_v4(),
            name: required("name", &self.name)?,
            specification: self.specification,
            unit: required("unit", &self.unit)?,
            unit_price: money(checked_price(self.unit_price)?)?,
            major_category: self.major_category,
            middle_category: self.middle_category,
            minor_category: self.minor_category,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ItemPatch {
    pub name: Option<String>,
    pub specification: Option<String>,
    pub unit: Option<String>,
    pub unit_price: Option<f64>,
    pub major_category: Option<String>,
    pub middle_category: Option<String>,
    pub minor_category: Option<String>,
    pub is_active: Option<bool>,
}

impl ItemPatch {
    fn into_changes(self) -> Result<ItemChanges, DomainError> {
        Ok(ItemChanges {
            name: self.name.as_deref().map(|n| required("name", n)).transpose()?,
            specification: self.specification,
            unit: self.unit.as_deref().map(|u| required("unit", u)).transpose()?,
            unit_price: self
                .unit_price
                .map(|p| checked_price(p).and_then(money))
                .transpose()?,
            major_category: self.major_category,
            middle_category: self.middle_category,
            minor_category: self.minor_category,
            is_active: self.is_active,
            updated_at: Some(Utc::now()),
        })
    }
}

pub async fn list_items(
    State(state): State<AppState>,
    Query(filter): Query<MasterFilter>,
) -> ApiResult<Json<Vec<Item>>> {
    let mut conn = state.pool.get().await?;
    let mut query = items::table.into_boxed();
    if !filter.include_inactive {
        query = query.filter(items::is_active.eq(true));
    }
    if let Some(major) = filter.major_category.as_deref() {
        query = query.filter(items::major_category.eq(major.to_string()));
    }
    if let Some(pattern) = filter.pattern() {
        query = query.filter(
            items::name
                .ilike(pattern.clone())
                .or(items::specification.ilike(pattern)),
        );
    }
    let page = filter.page();
    let rows = query
        .order(items::name.asc())
        .limit(page.limit())
        .offset(page.offset())
        .select(Item::as_select())
        .load(&mut conn)
        .await?;
    Ok(Json(rows))
}

pub async fn get_item(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Item>> {
    let mut conn = state.pool.get().await?;
    let item = items::table
        .find(id)
        .select(Item::as_select())
        .first(&mut conn)
        .await?;
    Ok(Json(item))
}

pub async fn create_item(
    State(state): State<AppState>,
    user: ActingUser,
    Json(request): Json<ItemRequest>,
) -> ApiResult<(StatusCode, Json<Item>)> {
    user.require_at_least(UserRole::ProjectManager)?;
    let row = request.into_new()?;
    let mut conn = state.pool.get().await?;
    let item = diesel::insert_into(items::table)
        .values(&row)
        .returning(Item::as_returning())
        .get_result(&mut conn)
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn update_item(
    State(state): State<AppState>,
    user: ActingUser,
    Path(id): Path<Uuid>,
    Json(patch): Json<ItemPatch>,
) -> ApiResult<Json<Item>> {
    user.require_at_least(UserRole::ProjectManager)?;
    let changes = patch.into_changes()?;
    let mut conn = state.pool.get().await?;
    let item = diesel::update(items::table.find(id))
        .set(&changes)
        .returning(Item::as_returning())
        .get_result(&mut conn)
        .await?;
    Ok(Json(item))
}

pub async fn delete_item(
    State(state): State<AppState>,
    user: ActingUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    user.require_at_least(UserRole::ProjectManager)?;
    let mut conn = state.pool.get().await?;
    let affected = diesel::update(items::table.find(id))
        .set((items::is_active.eq(false), items::updated_at.eq(Utc::now())))
        .execute(&mut conn)
        .await?;
    if affected == 0 {
        return Err(ApiError::not_found("item not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}
