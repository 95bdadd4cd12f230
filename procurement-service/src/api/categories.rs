use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Deserialize;
use shared::category::{self, CategoryBranch};
use shared::*;
use tracing::info;
use uuid::Uuid;

use super::{ActingUser, AppState};
use crate::error::{ApiError, ApiResult};
use crate::models::*;
use crate::schema::*;

const MAX_BATCH: usize = 1_000;

/// The active category tree.
pub(super) async fn load_tree(conn: &mut AsyncPgConnection) -> ApiResult<CategoryTree> {
    let rows = item_categories::table
        .filter(item_categories::is_active.eq(true))
        .select(ItemCategory::as_select())
        .load(conn)
        .await?;
    let nodes = rows
        .into_iter()
        .map(CategoryNode::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(CategoryTree::new(nodes))
}

pub async fn tree(State(state): State<AppState>) -> ApiResult<Json<Vec<CategoryBranch>>> {
    let mut conn = state.pool.get().await?;
    Ok(Json(load_tree(&mut conn).await?.nested()))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListFilter {
    pub level: Option<CategoryLevel>,
    pub parent_id: Option<Uuid>,
}

/// Flat list, optionally restricted to one level or to the children of a
/// parent.
pub async fn list(
    State(state): State<AppState>,
    Query(filter): Query<ListFilter>,
) -> ApiResult<Json<Vec<CategoryNode>>> {
    let mut conn = state.pool.get().await?;
    let tree = load_tree(&mut conn).await?;
    let nodes: Vec<CategoryNode> = match (filter.parent_id, filter.level) {
        (Some(parent), level) => tree
            .children(parent)
            .filter(|n| level.map_or(true, |l| n.level == l))
            .cloned()
            .collect(),
        (None, Some(level)) => tree.by_level(level).cloned().collect(),
        (None, None) => CategoryLevel::ALL
            .iter()
            .flat_map(|&l| tree.by_level(l))
            .cloned()
            .collect(),
    };
    Ok(Json(nodes))
}

#[derive(Debug, Deserialize)]
pub struct NewCategoryRequest {
    pub level: CategoryLevel,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub display_order: Option<i32>,
}

pub async fn create(
    State(state): State<AppState>,
    user: ActingUser,
    Json(request): Json<NewCategoryRequest>,
) -> ApiResult<(StatusCode, Json<CategoryNode>)> {
    user.require_admin()?;
    let name = request.name.trim().to_string();
    if name.is_empty() {
        return Err(DomainError::validation("category name is required").into());
    }
    let mut conn = state.pool.get().await?;
    let tree = load_tree(&mut conn).await?;
    tree.check_parent(request.level, request.parent_id)?;

    if tree.sibling_named(request.parent_id, &name, None).is_some() {
        return Err(ApiError::conflict(format!("category '{}' already exists here", name)));
    }
    let siblings: Vec<&CategoryNode> = match request.parent_id {
        Some(parent) => tree.children(parent).collect(),
        None => tree.majors().collect(),
    };
    let display_order = request.display_order.unwrap_or_else(|| {
        siblings.iter().map(|n| n.display_order).max().map_or(0, |m| m + 1)
    });

    let row = NewItemCategory {
        id: Uuid::new_v4(),
        category_type: request.level.to_string(),
        category_name: name,
        parent_id: request.parent_id,
        display_order,
    };
    let created = diesel::insert_into(item_categories::table)
        .values(&row)
        .returning(ItemCategory::as_returning())
        .get_result(&mut conn)
        .await?;
    Ok((StatusCode::CREATED, Json(CategoryNode::try_from(created)?)))
}

/// Active categories of one level.
pub async fn by_level(
    State(state): State<AppState>,
    Path(level): Path<CategoryLevel>,
) -> ApiResult<Json<Vec<CategoryNode>>> {
    let mut conn = state.pool.get().await?;
    let tree = load_tree(&mut conn).await?;
    Ok(Json(tree.by_level(level).cloned().collect()))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateCategoryRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub display_order: Option<i32>,
}

/// Renames, moves or reorders a category. Its level never changes.
pub async fn update(
    State(state): State<AppState>,
    user: ActingUser,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateCategoryRequest>,
) -> ApiResult<Json<CategoryNode>> {
    user.require_admin()?;
    let name = match request.name.as_deref().map(str::trim) {
        Some("") => return Err(DomainError::validation("category name cannot be blank").into()),
        other => other.map(str::to_string),
    };
    let mut conn = state.pool.get().await?;
    let tree = load_tree(&mut conn).await?;
    let current = tree
        .get(id)
        .ok_or_else(|| ApiError::not_found(format!("category {} not found", id)))?;

    let parent_id = request.parent_id.or(current.parent_id);
    let node = tree.check_move(id, parent_id)?;
    let name = name.unwrap_or_else(|| node.name.clone());
    if tree.sibling_named(parent_id, &name, Some(id)).is_some() {
        return Err(ApiError::conflict(format!("category '{}' already exists here", name)));
    }

    let updated = diesel::update(item_categories::table.find(id))
        .set((
            item_categories::category_name.eq(&name),
            item_categories::parent_id.eq(parent_id),
            item_categories::display_order.eq(request.display_order.unwrap_or(node.display_order)),
        ))
        .returning(ItemCategory::as_returning())
        .get_result(&mut conn)
        .await?;
    info!("Updated category {} ({})", name, id);
    Ok(Json(CategoryNode::try_from(updated)?))
}

/// Items and order lines filed under `node`'s name at its level.
async fn references(conn: &mut AsyncPgConnection, node: &CategoryNode) -> ApiResult<i64> {
    let name = node.name.as_str();
    let (stored, ordered): (i64, i64) = match node.level {
        CategoryLevel::Major => (
            items::table
                .filter(items::is_active.eq(true))
                .filter(items::major_category.eq(name))
                .count()
                .get_result(conn)
                .await?,
            purchase_order_items::table
                .filter(purchase_order_items::major_category.eq(name))
                .count()
                .get_result(conn)
                .await?,
        ),
        CategoryLevel::Middle => (
            items::table
                .filter(items::is_active.eq(true))
                .filter(items::middle_category.eq(name))
                .count()
                .get_result(conn)
                .await?,
            purchase_order_items::table
                .filter(purchase_order_items::middle_category.eq(name))
                .count()
                .get_result(conn)
                .await?,
        ),
        CategoryLevel::Minor => (
            items::table
                .filter(items::is_active.eq(true))
                .filter(items::minor_category.eq(name))
                .count()
                .get_result(conn)
                .await?,
            purchase_order_items::table
                .filter(purchase_order_items::minor_category.eq(name))
                .count()
                .get_result(conn)
                .await?,
        ),
    };
    Ok(stored + ordered)
}

/// Deactivates a category that has no active children and nothing filed
/// under it.
pub async fn delete(
    State(state): State<AppState>,
    user: ActingUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    user.require_admin()?;
    let mut conn = state.pool.get().await?;
    let tree = load_tree(&mut conn).await?;
    let node = tree
        .get(id)
        .ok_or_else(|| ApiError::not_found(format!("category {} not found", id)))?;
    if tree.children(id).next().is_some() {
        return Err(ApiError::conflict(format!(
            "category '{}' still has subcategories",
            node.name
        )));
    }
    let used = references(&mut conn, node).await?;
    if used > 0 {
        return Err(ApiError::conflict(format!(
            "category '{}' is used by {} items or order lines",
            node.name, used
        )));
    }

    diesel::update(item_categories::table.find(id))
        .set(item_categories::is_active.eq(false))
        .execute(&mut conn)
        .await?;
    info!("Deactivated category {} ({})", node.name, id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn validate_mapping(
    State(state): State<AppState>,
    Json(request): Json<CategoryMappingRequest>,
) -> ApiResult<Json<CategoryMappingResult>> {
    let mut conn = state.pool.get().await?;
    let tree = load_tree(&mut conn).await?;
    Ok(Json(category::validate_mapping(&tree, &request)))
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub requests: Vec<CategoryMappingRequest>,
}

pub async fn validate_mapping_batch(
    State(state): State<AppState>,
    Json(batch): Json<BatchRequest>,
) -> ApiResult<Json<Vec<CategoryMappingResult>>> {
    if batch.requests.len() > MAX_BATCH {
        return Err(ApiError::bad_request(format!(
            "at most {} mappings can be validated at once",
            MAX_BATCH
        )));
    }
    let mut conn = state.pool.get().await?;
    let tree = load_tree(&mut conn).await?;
    Ok(Json(category::validate_batch(&tree, &batch.requests)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{create_router, tests::offline_state};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn oversized_batch_is_rejected_before_loading_the_tree() {
        let requests: Vec<serde_json::Value> = (0..=MAX_BATCH)
            .map(|_| serde_json::json!({"major": "철강재"}))
            .collect();
        let body = serde_json::json!({ "requests": requests }).to_string();
        let response = create_router(offline_state())
            .oneshot(
                Request::post("/api/categories/validate-mapping-batch")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_level_is_a_bad_request() {
        let response = create_router(offline_state())
            .oneshot(Request::get("/api/categories/sub").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn update_and_delete_need_an_acting_user() {
        let id = Uuid::new_v4();
        let app = create_router(offline_state());

        let response = app
            .clone()
            .oneshot(
                Request::put(format!("/api/categories/{}", id))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"name": "형강"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                Request::delete(format!("/api/categories/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn update_request_fields_are_optional() {
        let request: UpdateCategoryRequest =
            serde_json::from_value(serde_json::json!({"display_order": 3})).unwrap();
        assert!(request.name.is_none());
        assert!(request.parent_id.is_none());
        assert_eq!(request.display_order, Some(3));
    }

    #[test]
    fn list_filter_parses_level() {
        let filter: ListFilter = serde_json::from_value(serde_json::json!({"level": "middle"})).unwrap();
        assert_eq!(filter.level, Some(CategoryLevel::Middle));
        assert!(filter.parent_id.is_none());
    }
}
