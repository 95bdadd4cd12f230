use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{NaiveDate, Utc};
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use shared::order::{line_total, order_number, round_won};
use shared::*;
use tracing::info;
use uuid::Uuid;

use super::{ActingUser, AppState, Page};
use crate::approval::{self, SubmitOutcome};
use crate::error::{ApiError, ApiResult};
use crate::models::*;
use crate::outbox;
use crate::schema::*;

const EXPORT_LIMIT: i64 = 10_000;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderFilter {
    pub status: Option<String>,
    pub project_id: Option<Uuid>,
    pub vendor_id: Option<Uuid>,
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

type OrderSource = diesel::dsl::InnerJoin<
    diesel::dsl::InnerJoin<purchase_orders::table, projects::table>,
    vendors::table,
>;

fn filtered(filter: &OrderFilter) -> ApiResult<diesel::dsl::IntoBoxed<'static, OrderSource, Pg>> {
    let mut query = purchase_orders::table
        .inner_join(projects::table)
        .inner_join(vendors::table)
        .into_boxed();

    if let Some(status) = filter.status.as_deref().filter(|s| !s.is_empty()) {
        let status: PurchaseOrderStatus = status.parse()?;
        query = query.filter(purchase_orders::status.eq(status.as_str()));
    }
    if let Some(project_id) = filter.project_id {
        query = query.filter(purchase_orders::project_id.eq(project_id));
    }
    if let Some(vendor_id) = filter.vendor_id {
        query = query.filter(purchase_orders::vendor_id.eq(vendor_id));
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search);
        query = query.filter(
            purchase_orders::order_number
                .ilike(pattern.clone())
                .or(projects::project_name.ilike(pattern.clone()))
                .or(vendors::name.ilike(pattern)),
        );
    }
    Ok(query)
}

#[derive(Debug, Serialize)]
pub struct OrderSummary {
    #[serde(flatten)]
    pub order: PurchaseOrder,
    pub project_name: String,
    pub vendor_name: String,
}

#[derive(Debug, Serialize)]
pub struct OrderList {
    pub orders: Vec<OrderSummary>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
}

pub async fn list(State(state): State<AppState>, Query(filter): Query<OrderFilter>) -> ApiResult<Json<OrderList>> {
    let mut conn = state.pool.get().await?;
    let page = Page {
        page: filter.page,
        limit: filter.limit,
    };

    let total: i64 = filtered(&filter)?.count().get_result(&mut conn).await?;
    let rows: Vec<(PurchaseOrder, String, String)> = filtered(&filter)?
        .select((PurchaseOrder::as_select(), projects::project_name, vendors::name))
        .order(purchase_orders::created_at.desc())
        .limit(page.limit())
        .offset(page.offset())
        .load(&mut conn)
        .await?;

    Ok(Json(OrderList {
        orders: rows
            .into_iter()
            .map(|(order, project_name, vendor_name)| OrderSummary {
                order,
                project_name,
                vendor_name,
            })
            .collect(),
        total,
        page: page.page.unwrap_or(1).max(1),
        limit: page.limit(),
    }))
}

#[derive(Debug, Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: PurchaseOrder,
    pub project_name: String,
    pub vendor_name: String,
    pub items: Vec<OrderItem>,
}

pub(super) async fn load_detail(conn: &mut AsyncPgConnection, id: Uuid) -> ApiResult<OrderDetail> {
    let (order, project_name, vendor_name): (PurchaseOrder, String, String) = purchase_orders::table
        .inner_join(projects::table)
        .inner_join(vendors::table)
        .filter(purchase_orders::id.eq(id))
        .select((PurchaseOrder::as_select(), projects::project_name, vendors::name))
        .first(conn)
        .await?;
    let items = purchase_order_items::table
        .filter(purchase_order_items::order_id.eq(id))
        .order(purchase_order_items::created_at.asc())
        .select(OrderItem::as_select())
        .load(conn)
        .await?;
    Ok(OrderDetail {
        order,
        project_name,
        vendor_name,
        items,
    })
}

pub async fn get(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<OrderDetail>> {
    let mut conn = state.pool.get().await?;
    Ok(Json(load_detail(&mut conn, id).await?))
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderItemInput {
    pub item_id: Option<Uuid>,
    pub item_name: String,
    pub specification: Option<String>,
    pub unit: Option<String>,
    pub quantity: f64,
    pub unit_price: f64,
    pub major_category: Option<String>,
    pub middle_category: Option<String>,
    pub minor_category: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderInput {
    pub project_id: Uuid,
    pub vendor_id: Uuid,
    pub order_date: Option<NaiveDate>,
    pub delivery_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub items: Vec<OrderItemInput>,
}

impl OrderInput {
    fn validate(&self) -> Result<(), DomainError> {
        if self.items.is_empty() {
            return Err(DomainError::validation("an order needs at least one item"));
        }
        for (i, item) in self.items.iter().enumerate() {
            if item.item_name.trim().is_empty() {
                return Err(DomainError::validation(format!("item {} has no name", i + 1)));
            }
            if !(item.quantity > 0.0) {
                return Err(DomainError::validation(format!("item {} needs a positive quantity", i + 1)));
            }
            if item.unit_price < 0.0 {
                return Err(DomainError::validation(format!("item {} has a negative unit price", i + 1)));
            }
        }
        if let (Some(order_date), Some(delivery_date)) = (self.order_date, self.delivery_date) {
            if delivery_date < order_date {
                return Err(DomainError::validation("delivery date is before the order date"));
            }
        }
        Ok(())
    }

    fn total(&self) -> f64 {
        round_won(
            self.items
                .iter()
                .map(|i| line_total(i.quantity, i.unit_price))
                .sum(),
        )
    }
}

fn item_rows(order_id: Uuid, items: &[OrderItemInput]) -> Result<Vec<NewOrderItem>, DomainError> {
    items
        .iter()
        .map(|i| {
            Ok(NewOrderItem {
                id: Uuid::new_v4(),
                order_id,
                item_id: i.item_id,
                item_name: i.item_name.trim().to_string(),
                specification: i.specification.clone(),
                unit: i.unit.clone(),
                quantity: quantity(i.quantity)?,
                unit_price: money(i.unit_price)?,
                total_amount: money(line_total(i.quantity, i.unit_price))?,
                major_category: i.major_category.clone(),
                middle_category: i.middle_category.clone(),
                minor_category: i.minor_category.clone(),
                notes: i.notes.clone(),
            })
        })
        .collect()
}

/// Inserts a draft order with its items on the caller's connection. The
/// number is the next free `PO-YYYYMMDD-NNNN` of the order date; a
/// concurrent insert of the same number fails on the unique index.
pub(super) async fn insert_order(
    conn: &mut AsyncPgConnection,
    user_id: Uuid,
    input: &OrderInput,
    bypass: Option<ApprovalBypassReason>,
) -> ApiResult<Uuid> {
    input.validate()?;
    let order_date = input.order_date.unwrap_or_else(|| Utc::now().date_naive());
    let prefix = format!("PO-{}-", order_date.format("%Y%m%d"));
    let taken: i64 = purchase_orders::table
        .filter(purchase_orders::order_number.like(format!("{}%", prefix)))
        .count()
        .get_result(conn)
        .await?;
    let number = order_number(order_date, u32::try_from(taken + 1).unwrap_or(u32::MAX));

    let id = Uuid::new_v4();
    let state = OrderState::draft();
    diesel::insert_into(purchase_orders::table)
        .values(&NewPurchaseOrder {
            id,
            order_number: number.clone(),
            project_id: input.project_id,
            vendor_id: input.vendor_id,
            user_id,
            order_date,
            delivery_date: input.delivery_date,
            status: state.legacy().to_string(),
            order_status: state.order_status.to_string(),
            approval_status: state.approval_status.to_string(),
            total_amount: money(input.total())?,
            notes: input.notes.clone(),
        })
        .execute(conn)
        .await?;

    if let Some(reason) = bypass {
        diesel::update(purchase_orders::table.find(id))
            .set(purchase_orders::approval_bypass_reason.eq(Some(reason.to_string())))
            .execute(conn)
            .await?;
    }

    diesel::insert_into(purchase_order_items::table)
        .values(&item_rows(id, &input.items)?)
        .execute(conn)
        .await?;

    diesel::insert_into(order_history::table)
        .values(&NewOrderHistory::new(
            id,
            Some(user_id),
            "created",
            serde_json::json!({"order_number": number, "total_amount": input.total()}),
        ))
        .execute(conn)
        .await?;

    info!("Created order {}", number);
    Ok(id)
}

pub async fn create(
    State(state): State<AppState>,
    user: ActingUser,
    Json(input): Json<OrderInput>,
) -> ApiResult<(StatusCode, Json<OrderDetail>)> {
    let mut conn = state.pool.get().await?;
    let user_id = user.0.id;
    let id = conn
        .transaction::<_, ApiError, _>(|conn| {
            Box::pin(async move { insert_order(conn, user_id, &input, None).await })
        })
        .await?;
    Ok((StatusCode::CREATED, Json(load_detail(&mut conn, id).await?)))
}

fn ensure_author(order: &PurchaseOrder, user: &ActingUser) -> ApiResult<()> {
    if order.user_id != user.0.id && user.role()? != UserRole::Admin {
        return Err(DomainError::denied("only the author or an admin may change this order").into());
    }
    Ok(())
}

fn ensure_editable(order: &PurchaseOrder, action: &str) -> ApiResult<()> {
    let state = order.state()?;
    if !state.is_editable() {
        return Err(DomainError::InvalidTransition {
            from: format!("{}/{}", state.order_status, state.approval_status),
            action: action.to_string(),
        }
        .into());
    }
    Ok(())
}

pub async fn update(
    State(state): State<AppState>,
    user: ActingUser,
    Path(id): Path<Uuid>,
    Json(input): Json<OrderInput>,
) -> ApiResult<Json<OrderDetail>> {
    input.validate()?;
    let mut conn = state.pool.get().await?;
    let user = &user;
    conn.transaction::<_, ApiError, _>(|conn| {
        Box::pin(async move {
            let order = approval::lock_order(conn, id).await?;
            ensure_author(&order, user)?;
            ensure_editable(&order, "update")?;

            diesel::update(purchase_orders::table.find(id))
                .set((
                    purchase_orders::project_id.eq(input.project_id),
                    purchase_orders::vendor_id.eq(input.vendor_id),
                    purchase_orders::order_date.eq(input.order_date.unwrap_or(order.order_date)),
                    purchase_orders::delivery_date.eq(input.delivery_date),
                    purchase_orders::notes.eq(input.notes.clone()),
                    purchase_orders::total_amount.eq(money(input.total())?),
                    purchase_orders::updated_at.eq(Utc::now()),
                ))
                .execute(conn)
                .await?;

            diesel::delete(purchase_order_items::table.filter(purchase_order_items::order_id.eq(id)))
                .execute(conn)
                .await?;
            diesel::insert_into(purchase_order_items::table)
                .values(&item_rows(id, &input.items)?)
                .execute(conn)
                .await?;

            diesel::insert_into(order_history::table)
                .values(&NewOrderHistory::new(
                    id,
                    Some(user.0.id),
                    "updated",
                    serde_json::json!({
                        "previous_total": order.amount(),
                        "total_amount": input.total(),
                        "items": input.items.len(),
                    }),
                ))
                .execute(conn)
                .await?;
            Ok(())
        })
    })
    .await?;
    Ok(Json(load_detail(&mut conn, id).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    user: ActingUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let mut conn = state.pool.get().await?;
    let user = &user;
    conn.transaction::<_, ApiError, _>(|conn| {
        Box::pin(async move {
            let order = approval::lock_order(conn, id).await?;
            ensure_author(&order, user)?;
            ensure_editable(&order, "delete")?;
            diesel::delete(purchase_orders::table.find(id))
                .execute(conn)
                .await?;
            info!("Deleted draft order {}", order.order_number);
            Ok(())
        })
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn submit(
    State(state): State<AppState>,
    user: ActingUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SubmitOutcome>> {
    let mut conn = state.pool.get().await?;
    Ok(Json(approval::submit(&mut conn, id, &user.0).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct TransitionRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TransitionResponse {
    pub order_id: Uuid,
    pub status: PurchaseOrderStatus,
    pub order_status: OrderStatus,
    pub approval_status: ApprovalStatus,
}

type Authorize = fn(&PurchaseOrder, &ActingUser) -> ApiResult<()>;

/// Applies a transition that needs no routing and records it.
async fn transition(
    conn: &mut AsyncPgConnection,
    id: Uuid,
    user: &ActingUser,
    authorize: Authorize,
    action: OrderAction,
    history_action: &'static str,
    reason: Option<String>,
) -> ApiResult<TransitionResponse> {
    conn.transaction::<_, ApiError, _>(|conn| {
        Box::pin(async move {
            let order = approval::lock_order(conn, id).await?;
            authorize(&order, user)?;
            let state = order.state()?;
            let next = state.apply(action)?;
            let now = Utc::now();

            diesel::update(purchase_orders::table.find(id))
                .set((
                    OrderStateChange::from(next),
                    purchase_orders::current_approver_role.eq(None::<String>),
                ))
                .execute(conn)
                .await?;

            if next.order_status == OrderStatus::Cancelled {
                diesel::update(
                    approval_step_instances::table
                        .filter(approval_step_instances::order_id.eq(id))
                        .filter(approval_step_instances::is_active.eq(true)),
                )
                .set((
                    approval_step_instances::is_active.eq(false),
                    approval_step_instances::updated_at.eq(now),
                ))
                .execute(conn)
                .await?;
            }

            diesel::insert_into(order_history::table)
                .values(&NewOrderHistory::new(
                    id,
                    Some(user.0.id),
                    history_action,
                    serde_json::json!({
                        "from": state.legacy(),
                        "to": next.legacy(),
                        "reason": reason,
                    }),
                ))
                .execute(conn)
                .await?;

            if next.order_status == OrderStatus::Delivered {
                outbox::enqueue(
                    conn,
                    &NotificationEvent::OrderDelivered {
                        order_id: id,
                        order_number: order.order_number.clone(),
                    },
                )
                .await?;
            }

            info!("Order {} {}", order.order_number, history_action);
            Ok(TransitionResponse {
                order_id: id,
                status: next.legacy(),
                order_status: next.order_status,
                approval_status: next.approval_status,
            })
        })
    })
    .await
}

pub async fn cancel(
    State(state): State<AppState>,
    user: ActingUser,
    Path(id): Path<Uuid>,
    Json(request): Json<TransitionRequest>,
) -> ApiResult<Json<TransitionResponse>> {
    let mut conn = state.pool.get().await?;
    Ok(Json(
        transition(
            &mut conn,
            id,
            &user,
            may_cancel,
            OrderAction::Cancel,
            "cancelled",
            request.reason,
        )
        .await?,
    ))
}

fn may_cancel(order: &PurchaseOrder, user: &ActingUser) -> ApiResult<()> {
    if order.user_id != user.0.id && !user.role()?.covers(UserRole::ProjectManager) {
        return Err(DomainError::denied("only the author or a project manager may cancel this order").into());
    }
    Ok(())
}

pub async fn deliver(
    State(state): State<AppState>,
    user: ActingUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TransitionResponse>> {
    let mut conn = state.pool.get().await?;
    Ok(Json(
        transition(
            &mut conn,
            id,
            &user,
            |_, _| Ok(()),
            OrderAction::Deliver,
            "delivered",
            None,
        )
        .await?,
    ))
}

pub async fn history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<OrderHistoryEntry>>> {
    let mut conn = state.pool.get().await?;
    let entries = order_history::table
        .filter(order_history::order_id.eq(id))
        .order(order_history::created_at.asc())
        .select(OrderHistoryEntry::as_select())
        .load(&mut conn)
        .await?;
    Ok(Json(entries))
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_line(fields: &[String]) -> String {
    let mut line = fields
        .iter()
        .map(|f| csv_field(f))
        .collect::<Vec<_>>()
        .join(",");
    line.push_str("\r\n");
    line
}

const EXPORT_HEADER: [&str; 10] = [
    "order_number",
    "order_date",
    "delivery_date",
    "project",
    "vendor",
    "status",
    "order_status",
    "approval_status",
    "total_amount",
    "created_at",
];

fn export_row(order: &PurchaseOrder, project_name: &str, vendor_name: &str) -> String {
    csv_line(&[
        order.order_number.clone(),
        order.order_date.to_string(),
        order.delivery_date.map(|d| d.to_string()).unwrap_or_default(),
        project_name.to_string(),
        vendor_name.to_string(),
        order.status.clone(),
        order.order_status.clone(),
        order.approval_status.clone(),
        order.total_amount.to_string(),
        order.created_at.to_rfc3339(),
    ])
}

/// The filtered order list as a CSV download. The byte-order mark keeps
/// spreadsheet programs from misreading Korean text.
pub async fn export(
    State(state): State<AppState>,
    Query(filter): Query<OrderFilter>,
) -> ApiResult<impl IntoResponse> {
    let mut conn = state.pool.get().await?;
    let rows: Vec<(PurchaseOrder, String, String)> = filtered(&filter)?
        .select((PurchaseOrder::as_select(), projects::project_name, vendors::name))
        .order(purchase_orders::created_at.desc())
        .limit(EXPORT_LIMIT)
        .load(&mut conn)
        .await?;

    let mut body = String::from("\u{feff}");
    body.push_str(&csv_line(&EXPORT_HEADER.map(String::from)));
    for (order, project_name, vendor_name) in &rows {
        body.push_str(&export_row(order, project_name, vendor_name));
    }

    let filename = format!("orders-{}.csv", Utc::now().format("%Y%m%d"));
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(items: Vec<(f64, f64)>) -> OrderInput {
        OrderInput {
            project_id: Uuid::new_v4(),
            vendor_id: Uuid::new_v4(),
            order_date: NaiveDate::from_ymd_opt(2025, 3, 1),
            delivery_date: NaiveDate::from_ymd_opt(2025, 3, 10),
            notes: None,
            items: items
                .into_iter()
                .map(|(quantity, unit_price)| OrderItemInput {
                    item_id: None,
                    item_name: "철근 D13".to_string(),
                    specification: None,
                    unit: Some("톤".to_string()),
                    quantity,
                    unit_price,
                    major_category: None,
                    middle_category: None,
                    minor_category: None,
                    notes: None,
                })
                .collect(),
        }
    }

    #[test]
    fn total_sums_line_totals() {
        let order = input(vec![(2.0, 1_000.5), (1.5, 300.0)]);
        assert!(order.validate().is_ok());
        assert_eq!(order.total(), 2_451.0);
    }

    #[test]
    fn validation_rejects_bad_orders() {
        assert!(input(vec![]).validate().is_err());
        assert!(input(vec![(0.0, 10.0)]).validate().is_err());
        assert!(input(vec![(1.0, -1.0)]).validate().is_err());

        let mut late = input(vec![(1.0, 1.0)]);
        late.delivery_date = NaiveDate::from_ymd_opt(2025, 2, 1);
        assert!(late.validate().is_err());
    }

    #[test]
    fn csv_fields_are_quoted_when_needed() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(
            csv_line(&["x".to_string(), "y\nz".to_string()]),
            "x,\"y\nz\"\r\n"
        );
    }
}
