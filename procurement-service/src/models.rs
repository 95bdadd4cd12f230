use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use shared::*;
use uuid::Uuid;

use crate::schema::*;

/// Money columns carry two decimals.
pub fn money(value: f64) -> Result<BigDecimal, DomainError> {
    scaled(value, 2)
}

/// Quantity columns carry three decimals.
pub fn quantity(value: f64) -> Result<BigDecimal, DomainError> {
    scaled(value, 3)
}

fn scaled(value: f64, scale: usize) -> Result<BigDecimal, DomainError> {
    if !value.is_finite() {
        return Err(DomainError::validation(format!("{} is not a finite number", value)));
    }
    format!("{:.*}", scale, value)
        .parse()
        .map_err(|_| DomainError::validation(format!("{} is not a valid amount", value)))
}

pub fn to_f64(value: &BigDecimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

fn string_list(value: &serde_json::Value) -> Result<Vec<String>, serde_json::Error> {
    serde_json::from_value(value.clone())
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = users)]
pub struct User {
    pub id: Uuid,
    pub company_id: Option<Uuid>,
    pub email: String,
    pub name: String,
    pub role: String,
    pub phone_number: Option<String>,
    pub position: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn role(&self) -> Result<UserRole, DomainError> {
        self.role.parse()
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = vendors)]
pub struct Vendor {
    pub id: Uuid,
    pub name: String,
    pub aliases: serde_json::Value,
    pub business_number: Option<String>,
    pub contact_person: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub vendor_type: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Vendor {
    /// True when `name` is the vendor's name or one of its aliases, ignoring
    /// case and surrounding blanks.
    pub fn answers_to(&self, name: &str) -> bool {
        let wanted = name.trim().to_lowercase();
        if self.name.trim().to_lowercase() == wanted {
            return true;
        }
        string_list(&self.aliases)
            .unwrap_or_default()
            .iter()
            .any(|a| a.trim().to_lowercase() == wanted)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = vendors)]
pub struct NewVendor {
    pub id: Uuid,
    pub name: String,
    pub aliases: serde_json::Value,
    pub business_number: Option<String>,
    pub contact_person: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub vendor_type: String,
}

#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = vendors)]
pub struct VendorChanges {
    pub name: Option<String>,
    pub aliases: Option<serde_json::Value>,
    pub business_number: Option<String>,
    pub contact_person: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub vendor_type: Option<String>,
    pub is_active: Option<bool>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = projects)]
pub struct Project {
    pub id: Uuid,
    pub project_name: String,
    pub project_code: String,
    pub client_name: Option<String>,
    pub location: Option<String>,
    pub status: String,
    pub total_budget: Option<BigDecimal>,
    pub project_manager_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = projects)]
pub struct NewProject {
    pub id: Uuid,
    pub project_name: String,
    pub project_code: String,
    pub client_name: Option<String>,
    pub location: Option<String>,
    pub status: String,
    pub total_budget: Option<BigDecimal>,
    pub project_manager_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = projects)]
pub struct ProjectChanges {
    pub project_name: Option<String>,
    pub project_code: Option<String>,
    pub client_name: Option<String>,
    pub location: Option<String>,
    pub status: Option<String>,
    pub total_budget: Option<BigDecimal>,
    pub project_manager_id: Option<Uuid>,
    pub is_active: Option<bool>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = items)]
pub struct Item {
    pub id: Uuid,
    pub name: String,
    pub specification: Option<String>,
    pub unit: String,
    pub unit_price: BigDecimal,
    pub major_category: Option<String>,
    pub middle_category: Option<String>,
    pub minor_category: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = items)]
pub struct NewItem {
    pub id: Uuid,
    pub name: String,
    pub specification: Option<String>,
    pub unit: String,
    pub unit_price: BigDecimal,
    pub major_category: Option<String>,
    pub middle_category: Option<String>,
    pub minor_category: Option<String>,
}

#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = items)]
pub struct ItemChanges {
    pub name: Option<String>,
    pub specification: Option<String>,
    pub unit: Option<String>,
    pub unit_price: Option<BigDecimal>,
    pub major_category: Option<String>,
    pub middle_category: Option<String>,
    pub minor_category: Option<String>,
    pub is_active: Option<bool>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = item_categories)]
pub struct ItemCategory {
    pub id: Uuid,
    pub category_type: String,
    pub category_name: String,
    pub parent_id: Option<Uuid>,
    pub display_order: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<ItemCategory> for CategoryNode {
    type Error = DomainError;

    fn try_from(row: ItemCategory) -> Result<Self, Self::Error> {
        Ok(CategoryNode {
            id: row.id,
            level: row.category_type.parse()?,
            name: row.category_name,
            parent_id: row.parent_id,
            display_order: row.display_order,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = item_categories)]
pub struct NewItemCategory {
    pub id: Uuid,
    pub category_type: String,
    pub category_name: String,
    pub parent_id: Option<Uuid>,
    pub display_order: i32,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = approval_workflow_templates)]
pub struct TemplateRow {
    pub id: Uuid,
    pub company_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub is_default: bool,
    pub min_amount: Option<BigDecimal>,
    pub max_amount: Option<BigDecimal>,
    pub category_filter: serde_json::Value,
    pub steps: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<&TemplateRow> for WorkflowTemplate {
    type Error = serde_json::Error;

    fn try_from(row: &TemplateRow) -> Result<Self, Self::Error> {
        Ok(WorkflowTemplate {
            id: row.id,
            name: row.name.clone(),
            description: row.description.clone(),
            is_active: row.is_active,
            is_default: row.is_default,
            min_amount: row.min_amount.as_ref().map(to_f64),
            max_amount: row.max_amount.as_ref().map(to_f64),
            category_filter: string_list(&row.category_filter)?,
            steps: serde_json::from_value(row.steps.clone())?,
        })
    }
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = approval_workflow_templates)]
#[diesel(treat_none_as_null = true)]
pub struct TemplateValues {
    pub id: Uuid,
    pub company_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub is_default: bool,
    pub min_amount: Option<BigDecimal>,
    pub max_amount: Option<BigDecimal>,
    pub category_filter: serde_json::Value,
    pub steps: serde_json::Value,
}

impl TemplateValues {
    pub fn from_template(
        template: &WorkflowTemplate,
        company_id: Option<Uuid>,
    ) -> Result<Self, DomainError> {
        Ok(Self {
            id: template.id,
            company_id,
            name: template.name.trim().to_string(),
            description: template.description.clone(),
            is_active: template.is_active,
            is_default: template.is_default,
            min_amount: template.min_amount.map(money).transpose()?,
            max_amount: template.max_amount.map(money).transpose()?,
            category_filter: serde_json::json!(template.category_filter),
            steps: serde_json::to_value(&template.steps)
                .map_err(|e| DomainError::validation(e.to_string()))?,
        })
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = purchase_orders)]
pub struct PurchaseOrder {
    pub id: Uuid,
    pub order_number: String,
    pub project_id: Uuid,
    pub vendor_id: Uuid,
    pub user_id: Uuid,
    pub template_id: Option<Uuid>,
    pub order_date: NaiveDate,
    pub delivery_date: Option<NaiveDate>,
    pub status: String,
    pub order_status: String,
    pub approval_status: String,
    pub total_amount: BigDecimal,
    pub notes: Option<String>,
    pub approval_bypass_reason: Option<String>,
    pub current_approver_role: Option<String>,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PurchaseOrder {
    pub fn state(&self) -> Result<OrderState, DomainError> {
        Ok(OrderState {
            order_status: self.order_status.parse()?,
            approval_status: self.approval_status.parse()?,
        })
    }

    pub fn amount(&self) -> f64 {
        to_f64(&self.total_amount)
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = purchase_orders)]
pub struct NewPurchaseOrder {
    pub id: Uuid,
    pub order_number: String,
    pub project_id: Uuid,
    pub vendor_id: Uuid,
    pub user_id: Uuid,
    pub order_date: NaiveDate,
    pub delivery_date: Option<NaiveDate>,
    pub status: String,
    pub order_status: String,
    pub approval_status: String,
    pub total_amount: BigDecimal,
    pub notes: Option<String>,
}

/// Columns written when an order moves between states.
#[derive(Debug, Clone, AsChangeset)]
#[diesel(table_name = purchase_orders)]
pub struct OrderStateChange {
    pub status: String,
    pub order_status: String,
    pub approval_status: String,
    pub updated_at: DateTime<Utc>,
}

impl From<OrderState> for OrderStateChange {
    fn from(state: OrderState) -> Self {
        Self {
            status: state.legacy().to_string(),
            order_status: state.order_status.to_string(),
            approval_status: state.approval_status.to_string(),
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = purchase_order_items)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub item_id: Option<Uuid>,
    pub item_name: String,
    pub specification: Option<String>,
    pub unit: Option<String>,
    pub quantity: BigDecimal,
    pub unit_price: BigDecimal,
    pub total_amount: BigDecimal,
    pub major_category: Option<String>,
    pub middle_category: Option<String>,
    pub minor_category: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = purchase_order_items)]
pub struct NewOrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub item_id: Option<Uuid>,
    pub item_name: String,
    pub specification: Option<String>,
    pub unit: Option<String>,
    pub quantity: BigDecimal,
    pub unit_price: BigDecimal,
    pub total_amount: BigDecimal,
    pub major_category: Option<String>,
    pub middle_category: Option<String>,
    pub minor_category: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = order_history)]
pub struct OrderHistoryEntry {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub changes: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = order_history)]
pub struct NewOrderHistory {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub changes: serde_json::Value,
}

impl NewOrderHistory {
    pub fn new(order_id: Uuid, user_id: Option<Uuid>, action: &str, changes: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            user_id,
            action: action.to_string(),
            changes,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = approval_authorities)]
pub struct AuthorityRow {
    pub id: Uuid,
    pub role: String,
    pub max_amount: BigDecimal,
    pub can_direct_approve: bool,
    pub direct_approve_limit: Option<BigDecimal>,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<&AuthorityRow> for ApprovalAuthority {
    type Error = DomainError;

    fn try_from(row: &AuthorityRow) -> Result<Self, Self::Error> {
        Ok(ApprovalAuthority {
            role: row.role.parse()?,
            max_amount: to_f64(&row.max_amount),
            can_direct_approve: row.can_direct_approve,
            direct_approve_limit: row.direct_approve_limit.as_ref().map(to_f64),
            is_active: row.is_active,
        })
    }
}

#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = approval_authorities)]
#[diesel(treat_none_as_null = true)]
pub struct AuthorityValues {
    pub id: Uuid,
    pub role: String,
    pub max_amount: BigDecimal,
    pub can_direct_approve: bool,
    pub direct_approve_limit: Option<BigDecimal>,
    pub description: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = approval_workflow_settings)]
pub struct SettingsRow {
    pub id: Uuid,
    pub company_id: Uuid,
    pub approval_mode: String,
    pub direct_approval_roles: serde_json::Value,
    pub require_all_stages: bool,
    pub skip_lower_stages: bool,
    pub is_active: bool,
    pub updated_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<&SettingsRow> for ApprovalSettings {
    type Error = DomainError;

    fn try_from(row: &SettingsRow) -> Result<Self, Self::Error> {
        let roles = string_list(&row.direct_approval_roles)
            .map_err(|e| DomainError::validation(e.to_string()))?
            .iter()
            .map(|r| r.parse())
            .collect::<Result<Vec<UserRole>, _>>()?;
        Ok(ApprovalSettings {
            mode: row.approval_mode.parse()?,
            direct_approval_roles: roles,
            require_all_stages: row.require_all_stages,
            skip_lower_stages: row.skip_lower_stages,
        })
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = approval_workflow_settings)]
pub struct NewSettings {
    pub id: Uuid,
    pub company_id: Uuid,
    pub approval_mode: String,
    pub direct_approval_roles: serde_json::Value,
    pub require_all_stages: bool,
    pub skip_lower_stages: bool,
    pub updated_by: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = approval_step_instances)]
pub struct StepInstance {
    pub id: Uuid,
    pub order_id: Uuid,
    pub template_id: Option<Uuid>,
    pub step_order: i32,
    pub required_role: String,
    pub status: String,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub comments: Option<String>,
    pub skip_reason: Option<String>,
    pub auto_approve_at: Option<DateTime<Utc>>,
    pub notify_on_pending: bool,
    pub notify_on_approved: bool,
    pub notify_on_rejected: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<&StepInstance> for StepState {
    type Error = DomainError;

    fn try_from(row: &StepInstance) -> Result<Self, Self::Error> {
        Ok(StepState {
            id: row.id,
            step_order: row.step_order,
            required_role: row.required_role.parse()?,
            status: row.status.parse()?,
            auto_approve_at: row.auto_approve_at,
        })
    }
}

pub fn step_states(rows: &[StepInstance]) -> Result<Vec<StepState>, DomainError> {
    rows.iter().map(StepState::try_from).collect()
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = approval_step_instances)]
pub struct NewStepInstance {
    pub id: Uuid,
    pub order_id: Uuid,
    pub template_id: Option<Uuid>,
    pub step_order: i32,
    pub required_role: String,
    pub status: String,
    pub skip_reason: Option<String>,
    pub auto_approve_at: Option<DateTime<Utc>>,
    pub notify_on_pending: bool,
    pub notify_on_approved: bool,
    pub notify_on_rejected: bool,
}

impl NewStepInstance {
    pub fn planned(order_id: Uuid, template_id: Option<Uuid>, step: &PlannedStep) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            template_id,
            step_order: step.step_order,
            required_role: step.required_role.to_string(),
            status: step.status.to_string(),
            skip_reason: step.skip_reason.clone(),
            auto_approve_at: step.auto_approve_at,
            notify_on_pending: step.notify_on_pending,
            notify_on_approved: step.notify_on_approved,
            notify_on_rejected: step.notify_on_rejected,
        }
    }
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = email_sending_history)]
pub struct EmailHistory {
    pub id: Uuid,
    pub order_id: Uuid,
    pub order_number: String,
    pub sender_user_id: Uuid,
    pub recipients: serde_json::Value,
    pub cc: serde_json::Value,
    pub subject: String,
    pub message_content: Option<String>,
    pub attachment_files: serde_json::Value,
    pub sending_status: String,
    pub sent_count: i32,
    pub failed_count: i32,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = email_sending_history)]
pub struct NewEmailHistory {
    pub id: Uuid,
    pub order_id: Uuid,
    pub order_number: String,
    pub sender_user_id: Uuid,
    pub recipients: serde_json::Value,
    pub cc: serde_json::Value,
    pub subject: String,
    pub message_content: Option<String>,
    pub attachment_files: serde_json::Value,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = email_sending_details)]
pub struct EmailDetail {
    pub id: Uuid,
    pub history_id: Uuid,
    pub recipient_email: String,
    pub recipient_type: String,
    pub sending_status: String,
    pub error_message: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = email_sending_details)]
pub struct NewEmailDetail {
    pub id: Uuid,
    pub history_id: Uuid,
    pub recipient_email: String,
    pub recipient_type: String,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = invoices)]
pub struct Invoice {
    pub id: Uuid,
    pub order_id: Uuid,
    pub invoice_number: String,
    pub invoice_type: String,
    pub issue_date: NaiveDate,
    pub total_amount: BigDecimal,
    pub vat_amount: BigDecimal,
    pub status: String,
    pub file_path: Option<String>,
    pub uploaded_by: Uuid,
    pub verified_by: Option<Uuid>,
    pub verified_at: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = invoices)]
pub struct NewInvoice {
    pub id: Uuid,
    pub order_id: Uuid,
    pub invoice_number: String,
    pub invoice_type: String,
    pub issue_date: NaiveDate,
    pub total_amount: BigDecimal,
    pub vat_amount: BigDecimal,
    pub file_path: Option<String>,
    pub uploaded_by: Uuid,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = item_receipts)]
pub struct ItemReceipt {
    pub id: Uuid,
    pub order_item_id: Uuid,
    pub invoice_id: Option<Uuid>,
    pub received_quantity: BigDecimal,
    pub received_date: NaiveDate,
    pub quality_check: bool,
    pub quality_notes: Option<String>,
    pub verified_by: Uuid,
    pub status: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = item_receipts)]
pub struct NewItemReceipt {
    pub id: Uuid,
    pub order_item_id: Uuid,
    pub invoice_id: Option<Uuid>,
    pub received_quantity: BigDecimal,
    pub received_date: NaiveDate,
    pub quality_check: bool,
    pub quality_notes: Option<String>,
    pub verified_by: Uuid,
    pub status: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize)]
#[diesel(table_name = verification_logs)]
pub struct VerificationLog {
    pub id: Uuid,
    pub order_id: Uuid,
    pub invoice_id: Option<Uuid>,
    pub item_receipt_id: Option<Uuid>,
    pub action: String,
    pub details: Option<String>,
    pub performed_by: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = verification_logs)]
pub struct NewVerificationLog {
    pub id: Uuid,
    pub order_id: Uuid,
    pub invoice_id: Option<Uuid>,
    pub item_receipt_id: Option<Uuid>,
    pub action: String,
    pub details: Option<String>,
    pub performed_by: Uuid,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = outbox_events)]
pub struct DbOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: Option<bool>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = outbox_events)]
pub struct NewOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
}

impl From<OutboxEvent> for NewOutboxEvent {
    fn from(event: OutboxEvent) -> Self {
        Self {
            id: event.id,
            aggregate_id: event.aggregate_id,
            event_type: event.event_type,
            event_data: event.event_data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_rounds_to_cents() {
        assert_eq!(money(1234.567).unwrap().to_string(), "1234.57");
        assert_eq!(quantity(2.0).unwrap().to_string(), "2.000");
        assert!(money(f64::NAN).is_err());
        assert_eq!(to_f64(&money(99.5).unwrap()), 99.5);
    }

    #[test]
    fn vendor_matches_aliases() {
        let vendor = Vendor {
            id: Uuid::new_v4(),
            name: "대한철강(주)".to_string(),
            aliases: serde_json::json!(["대한철강", "Daehan Steel"]),
            business_number: None,
            contact_person: None,
            email: None,
            phone: None,
            address: None,
            vendor_type: "vendor".to_string(),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(vendor.answers_to(" daehan steel "));
        assert!(vendor.answers_to("대한철강(주)"));
        assert!(!vendor.answers_to("한빛전기"));
    }

    #[test]
    fn template_row_decodes_steps() {
        let row = TemplateRow {
            id: Uuid::new_v4(),
            company_id: None,
            name: "기본".to_string(),
            description: None,
            is_active: true,
            is_default: true,
            min_amount: None,
            max_amount: Some(money(5_000_000.0).unwrap()),
            category_filter: serde_json::json!(["철근"]),
            steps: serde_json::json!([{"step_order": 1, "required_role": "project_manager"}]),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let template = WorkflowTemplate::try_from(&row).unwrap();
        assert_eq!(template.max_amount, Some(5_000_000.0));
        assert_eq!(template.steps[0].required_role, UserRole::ProjectManager);
        assert_eq!(template.category_filter, vec!["철근".to_string()]);
    }

    #[test]
    fn state_change_writes_legacy_status() {
        let change = OrderStateChange::from(OrderState {
            order_status: OrderStatus::Created,
            approval_status: ApprovalStatus::Pending,
        });
        assert_eq!(change.status, "pending");
        assert_eq!(change.order_status, "created");
    }
}
