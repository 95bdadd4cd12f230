//! Invoices and goods receipts recorded against sent orders. Every change
//! leaves a line in the order's verification log.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use bigdecimal::BigDecimal;
use chrono::{NaiveDate, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use shared::*;
use tracing::info;
use uuid::Uuid;

use super::{ActingUser, AppState};
use crate::error::{ApiError, ApiResult};
use crate::models::*;
use crate::schema::*;

const INVOICE_TYPES: [&str; 2] = ["invoice", "tax_invoice"];

async fn log(
    conn: &mut AsyncPgConnection,
    order_id: Uuid,
    invoice_id: Option<Uuid>,
    item_receipt_id: Option<Uuid>,
    action: &str,
    details: String,
    performed_by: Uuid,
) -> ApiResult<()> {
    diesel::insert_into(verification_logs::table)
        .values(&NewVerificationLog {
            id: Uuid::new_v4(),
            order_id,
            invoice_id,
            item_receipt_id,
            action: action.to_string(),
            details: Some(details),
            performed_by,
        })
        .execute(conn)
        .await?;
    Ok(())
}

/// Orders that were never sent have nothing to reconcile.
fn ensure_reconcilable(order: &PurchaseOrder) -> ApiResult<()> {
    let state = order.state()?;
    match state.order_status {
        OrderStatus::Sent | OrderStatus::Delivered => Ok(()),
        other => Err(ApiError::conflict(format!(
            "order {} is {} and cannot be reconciled",
            order.order_number, other
        ))),
    }
}

pub async fn list_invoices(State(state): State<AppState>, Path(order_id): Path<Uuid>) -> ApiResult<Json<Vec<Invoice>>> {
    let mut conn = state.pool.get().await?;
    let rows = invoices::table
        .filter(invoices::order_id.eq(order_id))
        .order(invoices::issue_date.asc())
        .select(Invoice::as_select())
        .load(&mut conn)
        .await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct InvoiceRequest {
    pub invoice_number: String,
    #[serde(default)]
    pub invoice_type: Option<String>,
    pub issue_date: NaiveDate,
    pub total_amount: f64,
    #[serde(default)]
    pub vat_amount: f64,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl InvoiceRequest {
    fn into_new(self, order_id: Uuid, uploaded_by: Uuid) -> Result<NewInvoice, DomainError> {
        let invoice_number = self.invoice_number.trim().to_string();
        if invoice_number.is_empty() {
            return Err(DomainError::validation("invoice_number is required"));
        }
        let invoice_type = self.invoice_type.unwrap_or_else(|| "invoice".to_string());
        if !INVOICE_TYPES.contains(&invoice_type.as_str()) {
            return Err(DomainError::validation(format!(
                "invoice_type must be one of {}",
                INVOICE_TYPES.join(", ")
            )));
        }
        if !(self.total_amount > 0.0) {
            return Err(DomainError::validation("total_amount must be positive"));
        }
        if self.vat_amount < 0.0 || self.vat_amount > self.total_amount {
            return Err(DomainError::validation("vat_amount must lie between 0 and total_amount"));
        }
        Ok(NewInvoice {
            id: Uuid::new_v4(),
            order_id,
            invoice_number,
            invoice_type,
            issue_date: self.issue_date,
            total_amount: money(self.total_amount)?,
            vat_amount: money(self.vat_amount)?,
            file_path: self.file_path,
            uploaded_by,
            notes: self.notes,
        })
    }
}

pub async fn create_invoice(
    State(state): State<AppState>,
    user: ActingUser,
    Path(order_id): Path<Uuid>,
    Json(request): Json<InvoiceRequest>,
) -> ApiResult<(StatusCode, Json<Invoice>)> {
    let user_id = user.0.id;
    let row = request.into_new(order_id, user_id)?;
    let mut conn = state.pool.get().await?;

    let invoice = conn
        .transaction::<_, ApiError, _>(|conn| {
            Box::pin(async move {
                let order = purchase_orders::table
                    .find(order_id)
                    .select(PurchaseOrder::as_select())
                    .first(conn)
                    .await?;
                ensure_reconcilable(&order)?;
                let invoice = diesel::insert_into(invoices::table)
                    .values(&row)
                    .returning(Invoice::as_returning())
                    .get_result(conn)
                    .await?;
                log(
                    conn,
                    order_id,
                    Some(invoice.id),
                    None,
                    "invoice_uploaded",
                    format!(
                        "{} {} for {} (order total {})",
                        invoice.invoice_type, invoice.invoice_number, invoice.total_amount, order.total_amount
                    ),
                    user_id,
                )
                .await?;
                Ok(invoice)
            })
        })
        .await?;
    Ok((StatusCode::CREATED, Json(invoice)))
}

/// Invoices only move forward: pending, then verified, then paid.
fn next_invoice_status(current: &str, wanted: &str) -> Result<&'static str, DomainError> {
    match (current, wanted) {
        ("pending", "verified") => Ok("verified"),
        ("verified", "paid") => Ok("paid"),
        (from, to) => Err(DomainError::InvalidTransition {
            from: from.to_string(),
            action: to.to_string(),
        }),
    }
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    #[serde(default = "verified")]
    pub status: String,
    #[serde(default)]
    pub notes: Option<String>,
}

fn verified() -> String {
    "verified".to_string()
}

/// Difference between the invoice and the order, as shown in the log.
fn amount_gap(invoice: &BigDecimal, order: &BigDecimal) -> String {
    let gap = invoice - order;
    if gap == BigDecimal::from(0) {
        "matches the order total".to_string()
    } else {
        format!("differs from the order total by {}", gap)
    }
}

pub async fn verify_invoice(
    State(state): State<AppState>,
    user: ActingUser,
    Path(id): Path<Uuid>,
    Json(request): Json<VerifyRequest>,
) -> ApiResult<Json<Invoice>> {
    user.require_at_least(UserRole::ProjectManager)?;
    let user_id = user.0.id;
    let mut conn = state.pool.get().await?;

    let invoice = conn
        .transaction::<_, ApiError, _>(|conn| {
            Box::pin(async move {
                let invoice = invoices::table
                    .find(id)
                    .select(Invoice::as_select())
                    .for_update()
                    .first(conn)
                    .await?;
                let next = next_invoice_status(&invoice.status, request.status.trim())?;
                let order_total: BigDecimal = purchase_orders::table
                    .find(invoice.order_id)
                    .select(purchase_orders::total_amount)
                    .first(conn)
                    .await?;
                let now = Utc::now();

                let updated = diesel::update(invoices::table.find(id))
                    .set((
                        invoices::status.eq(next),
                        invoices::verified_by.eq(Some(user_id)),
                        invoices::verified_at.eq(Some(now)),
                        invoices::notes.eq(request.notes.clone().or(invoice.notes.clone())),
                        invoices::updated_at.eq(now),
                    ))
                    .returning(Invoice::as_returning())
                    .get_result(conn)
                    .await?;
                log(
                    conn,
                    invoice.order_id,
                    Some(id),
                    None,
                    &format!("invoice_{}", next),
                    format!(
                        "{} {}",
                        invoice.invoice_number,
                        amount_gap(&invoice.total_amount, &order_total)
                    ),
                    user_id,
                )
                .await?;
                info!("Invoice {} marked {}", invoice.invoice_number, next);
                Ok(updated)
            })
        })
        .await?;
    Ok(Json(invoice))
}

#[derive(Debug, Deserialize)]
pub struct ReceiptRequest {
    pub received_quantity: f64,
    #[serde(default)]
    pub received_date: Option<NaiveDate>,
    #[serde(default)]
    pub invoice_id: Option<Uuid>,
    #[serde(default)]
    pub quality_check: bool,
    #[serde(default)]
    pub quality_notes: Option<String>,
    #[serde(default)]
    pub rejected: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

impl ReceiptRequest {
    fn status(&self) -> &'static str {
        if self.rejected {
            "rejected"
        } else if self.quality_check {
            "approved"
        } else {
            "pending"
        }
    }
}

/// Accepted receipts may not add up to more than was ordered.
fn check_receivable(ordered: f64, already: f64, incoming: f64) -> Result<(), DomainError> {
    if !(incoming > 0.0) {
        return Err(DomainError::validation("received_quantity must be positive"));
    }
    let remaining = ordered - already;
    if incoming > remaining + 1e-9 {
        return Err(DomainError::validation(format!(
            "only {} of {} remain to be received",
            remaining.max(0.0),
            ordered
        )));
    }
    Ok(())
}

pub async fn create_receipt(
    State(state): State<AppState>,
    user: ActingUser,
    Path(order_item_id): Path<Uuid>,
    Json(request): Json<ReceiptRequest>,
) -> ApiResult<(StatusCode, Json<ItemReceipt>)> {
    let user_id = user.0.id;
    let mut conn = state.pool.get().await?;

    let receipt = conn
        .transaction::<_, ApiError, _>(|conn| {
            Box::pin(async move {
                let item = purchase_order_items::table
                    .find(order_item_id)
                    .select(OrderItem::as_select())
                    .for_update()
                    .first(conn)
                    .await?;
                let order = purchase_orders::table
                    .find(item.order_id)
                    .select(PurchaseOrder::as_select())
                    .first(conn)
                    .await?;
                ensure_reconcilable(&order)?;

                if let Some(invoice_id) = request.invoice_id {
                    let invoice_order: Uuid = invoices::table
                        .find(invoice_id)
                        .select(invoices::order_id)
                        .first(conn)
                        .await
                        .optional()?
                        .ok_or_else(|| ApiError::unprocessable("invoice does not exist"))?;
                    if invoice_order != order.id {
                        return Err(ApiError::unprocessable("invoice belongs to another order"));
                    }
                }

                let status = request.status();
                if status != "rejected" {
                    let received: Vec<BigDecimal> = item_receipts::table
                        .filter(item_receipts::order_item_id.eq(order_item_id))
                        .filter(item_receipts::status.ne("rejected"))
                        .select(item_receipts::received_quantity)
                        .load(conn)
                        .await?;
                    let already: f64 = received.iter().map(to_f64).sum();
                    check_receivable(to_f64(&item.quantity), already, request.received_quantity)?;
                }

                let receipt = diesel::insert_into(item_receipts::table)
                    .values(&NewItemReceipt {
                        id: Uuid::new_v4(),
                        order_item_id,
                        invoice_id: request.invoice_id,
                        received_quantity: quantity(request.received_quantity)?,
                        received_date: request.received_date.unwrap_or_else(|| Utc::now().date_naive()),
                        quality_check: request.quality_check,
                        quality_notes: request.quality_notes.clone(),
                        verified_by: user_id,
                        status: status.to_string(),
                        notes: request.notes.clone(),
                    })
                    .returning(ItemReceipt::as_returning())
                    .get_result(conn)
                    .await?;
                log(
                    conn,
                    order.id,
                    request.invoice_id,
                    Some(receipt.id),
                    "item_received",
                    format!(
                        "{} x {} received ({})",
                        item.item_name, receipt.received_quantity, status
                    ),
                    user_id,
                )
                .await?;
                Ok(receipt)
            })
        })
        .await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

#[derive(Debug, Serialize)]
pub struct LogEntry {
    #[serde(flatten)]
    pub log: VerificationLog,
    pub performed_by_name: String,
}

pub async fn logs(State(state): State<AppState>, Path(order_id): Path<Uuid>) -> ApiResult<Json<Vec<LogEntry>>> {
    let mut conn = state.pool.get().await?;
    let rows: Vec<(VerificationLog, String)> = verification_logs::table
        .inner_join(users::table)
        .filter(verification_logs::order_id.eq(order_id))
        .order(verification_logs::created_at.desc())
        .select((VerificationLog::as_select(), users::name))
        .load(&mut conn)
        .await?;
    Ok(Json(
        rows.into_iter()
            .map(|(log, performed_by_name)| LogEntry { log, performed_by_name })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn invoices_move_forward_only() {
        assert_eq!(next_invoice_status("pending", "verified").unwrap(), "verified");
        assert_eq!(next_invoice_status("verified", "paid").unwrap(), "paid");
        assert!(next_invoice_status("pending", "paid").is_err());
        assert!(next_invoice_status("paid", "verified").is_err());
    }

    #[test]
    fn receipts_cannot_exceed_the_order() {
        assert!(check_receivable(10.0, 4.0, 6.0).is_ok());
        assert!(check_receivable(10.0, 4.0, 6.5).is_err());
        assert!(check_receivable(10.0, 0.0, 0.0).is_err());
    }

    #[test]
    fn invoice_amounts_are_validated() {
        let request = |total: f64, vat: f64| InvoiceRequest {
            invoice_number: "INV-1".to_string(),
            invoice_type: Some("tax_invoice".to_string()),
            issue_date: NaiveDate::from_ymd_opt(2025, 3, 2).unwrap(),
            total_amount: total,
            vat_amount: vat,
            file_path: None,
            notes: None,
        };
        let row = request(110_000.0, 10_000.0)
            .into_new(Uuid::new_v4(), Uuid::new_v4())
            .unwrap();
        assert_eq!(row.vat_amount.to_string(), "10000.00");
        assert!(request(0.0, 0.0).into_new(Uuid::new_v4(), Uuid::new_v4()).is_err());
        assert!(request(100.0, 200.0).into_new(Uuid::new_v4(), Uuid::new_v4()).is_err());
    }

    #[test]
    fn gap_is_described() {
        let order = BigDecimal::from_str("1000.00").unwrap();
        assert_eq!(amount_gap(&order, &order), "matches the order total");
        let invoice = BigDecimal::from_str("1100.00").unwrap();
        assert!(amount_gap(&invoice, &order).contains("100"));
    }
}
