//! Order sheet ingestion: parse the submitted grid, check categories and
//! duplicates, then turn the reviewed rows into order payloads.

use std::collections::HashMap;

use axum::{extract::State, Json};
use bigdecimal::BigDecimal;
use chrono::{Duration, NaiveDate, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use shared::category::{self, CategoryResolution};
use shared::duplicate::{detect_duplicates, resolve_rows, DetectionOptions, ExistingItem};
use shared::excel::{group_orders, parse_input_sheet};
use shared::*;
use tracing::info;
use uuid::Uuid;

use super::categories::load_tree;
use super::master::find_vendor;
use super::orders::{insert_order, OrderInput, OrderItemInput};
use super::{ActingUser, AppState};
use crate::error::{ApiError, ApiResult};
use crate::models::to_f64;
use crate::schema::*;

/// Stored items older than this are not compared against.
const EXISTING_WINDOW_DAYS: i64 = 90;
const EXISTING_LIMIT: i64 = 2_000;
const MAX_ROWS: usize = 5_000;

fn check_size(rows: usize) -> ApiResult<()> {
    if rows > MAX_ROWS {
        return Err(ApiError::bad_request(format!(
            "at most {} rows can be ingested at once",
            MAX_ROWS
        )));
    }
    Ok(())
}

pub async fn parse(Json(sheet): Json<SheetGrid>) -> ApiResult<Json<ParsedSheet>> {
    check_size(sheet.rows.len())?;
    let parsed = parse_input_sheet(&sheet)?;
    info!(
        "Parsed order sheet: {} rows, {} valid, {} errors",
        parsed.total_rows,
        parsed.rows.len(),
        parsed.errors.len()
    );
    Ok(Json(parsed))
}

#[derive(Debug, Clone, Deserialize)]
pub struct DuplicateOptions {
    #[serde(default = "default_threshold")]
    pub similarity_threshold: f64,
    #[serde(default = "default_true")]
    pub check_existing: bool,
}

fn default_threshold() -> f64 {
    shared::duplicate::DEFAULT_SIMILARITY_THRESHOLD
}

fn default_true() -> bool {
    true
}

impl Default for DuplicateOptions {
    fn default() -> Self {
        Self {
            similarity_threshold: default_threshold(),
            check_existing: true,
        }
    }
}

impl DuplicateOptions {
    fn detection(&self) -> Result<DetectionOptions, DomainError> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(DomainError::validation("similarity_threshold must lie between 0 and 1"));
        }
        Ok(DetectionOptions {
            similarity_threshold: self.similarity_threshold,
            check_existing: self.check_existing,
        })
    }
}

type ExistingRow = (Uuid, Uuid, String, Option<String>, BigDecimal, BigDecimal, String, String, NaiveDate);

/// Recently ordered items, shaped for duplicate comparison.
async fn load_existing(conn: &mut AsyncPgConnection) -> ApiResult<Vec<ExistingItem>> {
    let since = Utc::now().date_naive() - Duration::days(EXISTING_WINDOW_DAYS);
    let rows: Vec<ExistingRow> = purchase_order_items::table
        .inner_join(
            purchase_orders::table
                .inner_join(projects::table)
                .inner_join(vendors::table),
        )
        .filter(purchase_orders::order_date.ge(since))
        .filter(purchase_orders::order_status.ne(OrderStatus::Cancelled.as_str()))
        .order(purchase_orders::order_date.desc())
        .limit(EXISTING_LIMIT)
        .select((
            purchase_order_items::id,
            purchase_order_items::order_id,
            purchase_order_items::item_name,
            purchase_order_items::specification,
            purchase_order_items::quantity,
            purchase_order_items::unit_price,
            vendors::name,
            projects::project_name,
            purchase_orders::order_date,
        ))
        .load(conn)
        .await?;

    Ok(rows
        .into_iter()
        .map(|(id, order_id, item_name, specification, qty, price, vendor, project, date)| ExistingItem {
            id,
            order_id,
            candidate: DuplicateCandidate {
                item_name,
                specification,
                vendor_name: vendor,
                project_name: project,
                quantity: to_f64(&qty),
                unit_price: to_f64(&price),
                request_date: Some(date),
            },
        })
        .collect())
}

async fn duplicate_checks(
    conn: &mut AsyncPgConnection,
    rows: &[InputRow],
    options: &DetectionOptions,
) -> ApiResult<Vec<DuplicateCheck>> {
    let existing = if options.check_existing {
        load_existing(conn).await?
    } else {
        Vec::new()
    };
    let candidates: Vec<DuplicateCandidate> = rows.iter().map(DuplicateCandidate::from).collect();
    Ok(detect_duplicates(&candidates, &existing, options))
}

fn mapping_request(row: &InputRow) -> CategoryMappingRequest {
    CategoryMappingRequest {
        major: row.major_category.clone(),
        middle: row.middle_category.clone(),
        minor: row.minor_category.clone(),
    }
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub rows: Vec<InputRow>,
    #[serde(default)]
    pub options: DuplicateOptions,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub categories: Vec<CategoryMappingResult>,
    pub duplicates: Vec<DuplicateCheck>,
    pub needs_review: usize,
}

fn flagged(category: &CategoryMappingResult, duplicate: Option<&DuplicateCheck>) -> bool {
    category.status != MappingStatus::ExactMatch || duplicate.is_some_and(|d| d.is_duplicate)
}

pub async fn validate(
    State(state): State<AppState>,
    Json(request): Json<ValidateRequest>,
) -> ApiResult<Json<ValidateResponse>> {
    check_size(request.rows.len())?;
    let options = request.options.detection()?;
    let mut conn = state.pool.get().await?;

    let tree = load_tree(&mut conn).await?;
    let mappings: Vec<CategoryMappingRequest> = request.rows.iter().map(mapping_request).collect();
    let categories = category::validate_batch(&tree, &mappings);
    let duplicates = duplicate_checks(&mut conn, &request.rows, &options).await?;

    let needs_review = categories
        .iter()
        .enumerate()
        .filter(|(i, c)| flagged(c, duplicates.iter().find(|d| d.row_index == *i)))
        .count();
    Ok(Json(ValidateResponse {
        categories,
        duplicates,
        needs_review,
    }))
}

#[derive(Debug, Deserialize)]
pub struct FinalizeRequest {
    pub rows: Vec<InputRow>,
    /// Category ids picked per row, keyed by the row's position in `rows`.
    #[serde(default)]
    pub resolutions: HashMap<usize, CategoryResolution>,
    /// Duplicate actions chosen over the suggested ones, keyed the same way.
    #[serde(default)]
    pub overrides: HashMap<usize, MergeAction>,
    #[serde(default)]
    pub options: DuplicateOptions,
    /// Create draft orders from the payloads.
    #[serde(default)]
    pub commit: bool,
}

#[derive(Debug, Serialize)]
pub struct FinalizeResponse {
    pub orders: Vec<OrderDraft>,
    pub duplicates: Vec<DuplicateCheck>,
    pub kept_rows: usize,
    pub dropped_rows: usize,
    pub created_order_ids: Vec<Uuid>,
}

fn apply_resolutions(
    tree: &CategoryTree,
    rows: &mut [InputRow],
    resolutions: &HashMap<usize, CategoryResolution>,
) -> Result<(), DomainError> {
    for (&index, picked) in resolutions {
        let row = rows
            .get_mut(index)
            .ok_or_else(|| DomainError::validation(format!("no row at position {}", index)))?;
        let resolved = tree.resolve(picked).map_err(|e| match e {
            DomainError::Validation(msg) => DomainError::validation(format!("row {}: {}", row.row_number, msg)),
            other => other,
        })?;
        row.apply_category(&resolved);
    }
    Ok(())
}

fn order_input(draft: &OrderDraft, project_id: Uuid, vendor_id: Uuid) -> OrderInput {
    OrderInput {
        project_id,
        vendor_id,
        order_date: draft.order_date,
        delivery_date: draft.delivery_date,
        notes: draft.notes.clone(),
        items: draft
            .items
            .iter()
            .map(|item| OrderItemInput {
                item_id: None,
                item_name: item.item_name.clone(),
                specification: item.specification.clone(),
                unit: None,
                quantity: item.quantity,
                unit_price: item.unit_price,
                major_category: item.major_category.clone(),
                middle_category: item.middle_category.clone(),
                minor_category: item.minor_category.clone(),
                notes: item.notes.clone(),
            })
            .collect(),
    }
}

/// Creates one draft order per payload. Orders made this way carry the
/// sheet-automation bypass so submitting them skips approval.
async fn commit_drafts(conn: &mut AsyncPgConnection, user_id: Uuid, drafts: &[OrderDraft]) -> ApiResult<Vec<Uuid>> {
    let mut ids = Vec::with_capacity(drafts.len());
    for draft in drafts {
        let project_id: Uuid = projects::table
            .filter(projects::project_name.eq(draft.project_name.trim()))
            .filter(projects::is_active.eq(true))
            .select(projects::id)
            .first(conn)
            .await
            .optional()?
            .ok_or_else(|| ApiError::unprocessable(format!("unknown project '{}'", draft.project_name)))?;
        let vendor = find_vendor(conn, &draft.vendor_name)
            .await?
            .ok_or_else(|| ApiError::unprocessable(format!("unknown vendor '{}'", draft.vendor_name)))?;

        let input = order_input(draft, project_id, vendor.id);
        ids.push(insert_order(conn, user_id, &input, Some(ApprovalBypassReason::ExcelAutomation)).await?);
    }
    Ok(ids)
}

pub async fn finalize(
    State(state): State<AppState>,
    user: ActingUser,
    Json(request): Json<FinalizeRequest>,
) -> ApiResult<Json<FinalizeResponse>> {
    check_size(request.rows.len())?;
    let options = request.options.detection()?;
    let mut conn = state.pool.get().await?;

    let mut rows = request.rows;
    if !request.resolutions.is_empty() {
        let tree = load_tree(&mut conn).await?;
        apply_resolutions(&tree, &mut rows, &request.resolutions)?;
    }
    let duplicates = duplicate_checks(&mut conn, &rows, &options).await?;
    let kept = resolve_rows(&rows, &duplicates, &request.overrides);
    let orders = group_orders(&kept);

    let created_order_ids = if request.commit {
        let user_id = user.0.id;
        let drafts = orders.clone();
        let ids = conn
            .transaction::<_, ApiError, _>(|conn| {
                Box::pin(async move { commit_drafts(conn, user_id, &drafts).await })
            })
            .await?;
        info!("Created {} draft orders from an order sheet", ids.len());
        ids
    } else {
        Vec::new()
    };

    Ok(Json(FinalizeResponse {
        kept_rows: kept.len(),
        dropped_rows: rows.len() - kept.len(),
        orders,
        duplicates,
        created_order_ids,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{create_router, tests::json_body, tests::offline_state};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    fn sheet_row(item: &str, qty: serde_json::Value) -> serde_json::Value {
        json!([
            "2025-03-01", "2025-03-10", "대한철강", "sales@daehan.co.kr", "", "",
            "송도 현장", "철강재", "철근", "D10", item, "SD400", qty, 850, null, ""
        ])
    }

    #[tokio::test]
    async fn parse_returns_rows_and_errors() {
        let body = json!({
            "sheet_name": "Input",
            "rows": [
                (0..16).map(|i| format!("col{}", i)).collect::<Vec<_>>(),
                sheet_row("이형철근", json!("1,200")),
                sheet_row("원형철근", json!(-3)),
            ]
        });
        let response = create_router(offline_state())
            .oneshot(
                Request::post("/api/excel/parse")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["total_rows"], 2);
        assert_eq!(json["rows"].as_array().map(Vec::len), Some(1));
        assert_eq!(json["rows"][0]["quantity"], 1200.0);
        assert_eq!(json["errors"][0]["field"], "quantity");
    }

    #[tokio::test]
    async fn parse_rejects_other_sheets() {
        let body = json!({"sheet_name": "Sheet1", "rows": []});
        let response = create_router(offline_state())
            .oneshot(
                Request::post("/api/excel/parse")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    fn input_row(row_number: usize, item: &str) -> InputRow {
        InputRow {
            row_number,
            order_date: NaiveDate::from_ymd_opt(2025, 3, 1),
            delivery_date: None,
            vendor_name: "대한철강".to_string(),
            vendor_email: None,
            delivery_name: None,
            delivery_email: None,
            project_name: "송도 현장".to_string(),
            major_category: Some("철강".to_string()),
            middle_category: None,
            minor_category: None,
            item_name: item.to_string(),
            specification: None,
            quantity: 10.0,
            unit_price: 1_000.0,
            total_amount: 10_000.0,
            notes: None,
        }
    }

    #[test]
    fn resolutions_replace_typed_categories() {
        let steel = CategoryNode {
            id: Uuid::new_v4(),
            level: CategoryLevel::Major,
            name: "철강재".to_string(),
            parent_id: None,
            display_order: 0,
        };
        let rebar = CategoryNode {
            id: Uuid::new_v4(),
            level: CategoryLevel::Middle,
            name: "철근".to_string(),
            parent_id: Some(steel.id),
            display_order: 0,
        };
        let tree = CategoryTree::new(vec![steel.clone(), rebar.clone()]);
        let mut rows = vec![input_row(2, "이형철근"), input_row(3, "원형철근")];
        let resolutions = HashMap::from([(
            1,
            CategoryResolution {
                major_id: Some(steel.id),
                middle_id: Some(rebar.id),
                minor_id: None,
            },
        )]);

        apply_resolutions(&tree, &mut rows, &resolutions).unwrap();
        assert_eq!(rows[0].major_category.as_deref(), Some("철강"));
        assert_eq!(rows[1].major_category.as_deref(), Some("철강재"));
        assert_eq!(rows[1].middle_category.as_deref(), Some("철근"));

        let out_of_range = HashMap::from([(5, CategoryResolution::default())]);
        assert!(apply_resolutions(&tree, &mut rows, &out_of_range).is_err());
    }

    #[test]
    fn drafts_become_order_inputs() {
        let drafts = group_orders(&[input_row(2, "이형철근"), input_row(3, "원형철근")]);
        assert_eq!(drafts.len(), 1);
        let input = order_input(&drafts[0], Uuid::new_v4(), Uuid::new_v4());
        assert_eq!(input.items.len(), 2);
        assert_eq!(input.order_date, NaiveDate::from_ymd_opt(2025, 3, 1));
        assert_eq!(input.items[1].item_name, "원형철근");
    }

    #[test]
    fn threshold_must_be_a_fraction() {
        let options = DuplicateOptions {
            similarity_threshold: 85.0,
            check_existing: false,
        };
        assert!(options.detection().is_err());
    }
}
