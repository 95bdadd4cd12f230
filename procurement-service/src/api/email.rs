use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use shared::excel::is_valid_email;
use shared::*;
use tracing::info;
use uuid::Uuid;

use super::{ActingUser, AppState, Page};
use crate::approval;
use crate::error::{ApiError, ApiResult};
use crate::models::*;
use crate::outbox;
use crate::schema::*;

const MAX_RECIPIENTS: usize = 50;

#[derive(Debug, Deserialize)]
pub struct SendEmailRequest {
    pub recipients: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub attachments: Vec<String>,
}

/// Trims, drops blanks and duplicates, and rejects malformed addresses.
fn addresses(field: &str, raw: &[String]) -> Result<Vec<String>, DomainError> {
    let mut out: Vec<String> = Vec::new();
    for address in raw {
        let address = address.trim();
        if address.is_empty() {
            continue;
        }
        if !is_valid_email(address) {
            return Err(DomainError::validation(format!(
                "{} contains an invalid address '{}'",
                field, address
            )));
        }
        if !out.iter().any(|a| a.eq_ignore_ascii_case(address)) {
            out.push(address.to_string());
        }
    }
    Ok(out)
}

impl SendEmailRequest {
    fn checked(&self) -> Result<(Vec<String>, Vec<String>), DomainError> {
        let to = addresses("recipients", &self.recipients)?;
        if to.is_empty() {
            return Err(DomainError::validation("at least one recipient is required"));
        }
        let cc: Vec<String> = addresses("cc", &self.cc)?
            .into_iter()
            .filter(|c| !to.iter().any(|t| t.eq_ignore_ascii_case(c)))
            .collect();
        if to.len() + cc.len() > MAX_RECIPIENTS {
            return Err(DomainError::validation(format!(
                "at most {} addresses per email",
                MAX_RECIPIENTS
            )));
        }
        Ok((to, cc))
    }
}

fn default_subject(order_number: &str) -> String {
    format!("[발주서] {}", order_number)
}

#[derive(Debug, Serialize)]
pub struct SendEmailResponse {
    pub history_id: Uuid,
    pub order_id: Uuid,
    pub recipients: usize,
    /// Whether the order moved to sent with this email.
    pub order_sent: bool,
    pub order_status: OrderStatus,
}

/// Records the email, hands it to the dispatcher through the outbox and, when
/// the order may be sent, marks it sent.
pub async fn send(
    State(state): State<AppState>,
    user: ActingUser,
    Path(id): Path<Uuid>,
    Json(request): Json<SendEmailRequest>,
) -> ApiResult<(StatusCode, Json<SendEmailResponse>)> {
    let (to, cc) = request.checked()?;
    let role = user.role()?;
    let user_id = user.0.id;
    let mut conn = state.pool.get().await?;

    let response = conn
        .transaction::<_, ApiError, _>(|conn| {
            Box::pin(async move {
                let order = approval::lock_order(conn, id).await?;
                if order.user_id != user_id && !role.covers(UserRole::ProjectManager) {
                    return Err(ApiError::forbidden("only the author or a manager may email this order"));
                }
                let order_state = order.state()?;
                if order_state.order_status == OrderStatus::Draft
                    || order_state.order_status == OrderStatus::Cancelled
                {
                    return Err(ApiError::conflict(format!(
                        "a {} order cannot be emailed",
                        order_state.order_status
                    )));
                }

                let subject = request
                    .subject
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| default_subject(&order.order_number));
                let history_id = Uuid::new_v4();
                diesel::insert_into(email_sending_history::table)
                    .values(&NewEmailHistory {
                        id: history_id,
                        order_id: id,
                        order_number: order.order_number.clone(),
                        sender_user_id: user_id,
                        recipients: serde_json::json!(to),
                        cc: serde_json::json!(cc),
                        subject: subject.clone(),
                        message_content: request.message.clone(),
                        attachment_files: serde_json::json!(request.attachments),
                    })
                    .execute(conn)
                    .await?;

                let details: Vec<NewEmailDetail> = to
                    .iter()
                    .map(|a| (a, "to"))
                    .chain(cc.iter().map(|a| (a, "cc")))
                    .map(|(address, kind)| NewEmailDetail {
                        id: Uuid::new_v4(),
                        history_id,
                        recipient_email: address.clone(),
                        recipient_type: kind.to_string(),
                    })
                    .collect();
                diesel::insert_into(email_sending_details::table)
                    .values(&details)
                    .execute(conn)
                    .await?;

                outbox::enqueue(
                    conn,
                    &NotificationEvent::EmailRequested {
                        history_id,
                        order_id: id,
                        order_number: order.order_number.clone(),
                        recipients: to.clone(),
                        cc: cc.clone(),
                        subject,
                        message: request.message.clone(),
                    },
                )
                .await?;

                let mut order_status = order_state.order_status;
                let order_sent = order_state.is_sendable();
                if order_sent {
                    let next = order_state.apply(OrderAction::Send)?;
                    diesel::update(purchase_orders::table.find(id))
                        .set((
                            OrderStateChange::from(next),
                            purchase_orders::sent_at.eq(Some(Utc::now())),
                        ))
                        .execute(conn)
                        .await?;
                    diesel::insert_into(order_history::table)
                        .values(&NewOrderHistory::new(
                            id,
                            Some(user_id),
                            "sent",
                            serde_json::json!({
                                "from": order_state.legacy(),
                                "to": next.legacy(),
                                "email_history_id": history_id,
                            }),
                        ))
                        .execute(conn)
                        .await?;
                    outbox::enqueue(
                        conn,
                        &NotificationEvent::OrderSent {
                            order_id: id,
                            order_number: order.order_number.clone(),
                            vendor_id: order.vendor_id,
                        },
                    )
                    .await?;
                    order_status = next.order_status;
                }

                info!(
                    "Queued email for order {} to {} recipients",
                    order.order_number,
                    to.len() + cc.len()
                );
                Ok(SendEmailResponse {
                    history_id,
                    order_id: id,
                    recipients: to.len() + cc.len(),
                    order_sent,
                    order_status,
                })
            })
        })
        .await?;

    Ok((StatusCode::ACCEPTED, Json(response)))
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryFilter {
    pub order_id: Option<Uuid>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(filter): Query<HistoryFilter>,
) -> ApiResult<Json<Vec<EmailHistory>>> {
    let page = Page {
        page: filter.page,
        limit: filter.limit,
    };
    let mut conn = state.pool.get().await?;
    let mut query = email_sending_history::table.into_boxed();
    if let Some(order_id) = filter.order_id {
        query = query.filter(email_sending_history::order_id.eq(order_id));
    }
    let rows = query
        .order(email_sending_history::created_at.desc())
        .limit(page.limit())
        .offset(page.offset())
        .select(EmailHistory::as_select())
        .load(&mut conn)
        .await?;
    Ok(Json(rows))
}

#[derive(Debug, Serialize)]
pub struct EmailHistoryDetail {
    #[serde(flatten)]
    pub history: EmailHistory,
    pub details: Vec<EmailDetail>,
}

pub async fn get(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<EmailHistoryDetail>> {
    let mut conn = state.pool.get().await?;
    let history = email_sending_history::table
        .find(id)
        .select(EmailHistory::as_select())
        .first(&mut conn)
        .await?;
    let details = email_sending_details::table
        .filter(email_sending_details::history_id.eq(id))
        .order(email_sending_details::recipient_type.desc())
        .select(EmailDetail::as_select())
        .load(&mut conn)
        .await?;
    Ok(Json(EmailHistoryDetail { history, details }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(to: &[&str], cc: &[&str]) -> SendEmailRequest {
        SendEmailRequest {
            recipients: to.iter().map(|s| s.to_string()).collect(),
            cc: cc.iter().map(|s| s.to_string()).collect(),
            subject: None,
            message: None,
            attachments: Vec::new(),
        }
    }

    #[test]
    fn recipients_are_cleaned() {
        let (to, cc) = request(
            &[" sales@vendor.co.kr ", "", "SALES@vendor.co.kr"],
            &["sales@vendor.co.kr", "pm@site.co.kr"],
        )
        .checked()
        .unwrap();
        assert_eq!(to, vec!["sales@vendor.co.kr".to_string()]);
        assert_eq!(cc, vec!["pm@site.co.kr".to_string()]);
    }

    #[test]
    fn bad_or_missing_recipients_fail() {
        assert!(request(&[], &["pm@site.co.kr"]).checked().is_err());
        assert!(request(&["not-an-address"], &[]).checked().is_err());
    }

    #[test]
    fn subject_defaults_to_order_number() {
        assert_eq!(default_subject("PO-20250301-001"), "[발주서] PO-20250301-001");
    }
}
