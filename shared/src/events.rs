use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::authority::ApprovalBypassReason;
use crate::roles::UserRole;

pub const ORDER_NOTIFICATIONS_TOPIC: &str = "order-notifications";
pub const EMAIL_DISPATCH_TOPIC: &str = "email-dispatch";

/// Published through the outbox once the state change that raised it commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum NotificationEvent {
    ApprovalRequested {
        order_id: Uuid,
        order_number: String,
        step_order: i32,
        required_role: UserRole,
        total_amount: f64,
    },
    StepApproved {
        order_id: Uuid,
        order_number: String,
        step_order: i32,
        approved_by: Option<Uuid>,
        automatic: bool,
    },
    OrderApproved {
        order_id: Uuid,
        order_number: String,
        bypass_reason: Option<ApprovalBypassReason>,
    },
    OrderRejected {
        order_id: Uuid,
        order_number: String,
        rejected_by: Uuid,
        reason: Option<String>,
    },
    OrderSent {
        order_id: Uuid,
        order_number: String,
        vendor_id: Uuid,
    },
    OrderDelivered {
        order_id: Uuid,
        order_number: String,
    },
    EmailRequested {
        history_id: Uuid,
        order_id: Uuid,
        order_number: String,
        recipients: Vec<String>,
        cc: Vec<String>,
        subject: String,
        message: Option<String>,
    },
}

/// Where an event type is published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    OrderNotifications,
    EmailDispatch,
}

impl Channel {
    pub fn for_event_type(event_type: &str) -> Self {
        match event_type {
            "EmailRequested" => Channel::EmailDispatch,
            _ => Channel::OrderNotifications,
        }
    }
}

impl NotificationEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            NotificationEvent::ApprovalRequested { .. } => "ApprovalRequested",
            NotificationEvent::StepApproved { .. } => "StepApproved",
            NotificationEvent::OrderApproved { .. } => "OrderApproved",
            NotificationEvent::OrderRejected { .. } => "OrderRejected",
            NotificationEvent::OrderSent { .. } => "OrderSent",
            NotificationEvent::OrderDelivered { .. } => "OrderDelivered",
            NotificationEvent::EmailRequested { .. } => "EmailRequested",
        }
    }

    pub fn order_id(&self) -> Uuid {
        match self {
            NotificationEvent::ApprovalRequested { order_id, .. }
            | NotificationEvent::StepApproved { order_id, .. }
            | NotificationEvent::OrderApproved { order_id, .. }
            | NotificationEvent::OrderRejected { order_id, .. }
            | NotificationEvent::OrderSent { order_id, .. }
            | NotificationEvent::OrderDelivered { order_id, .. }
            | NotificationEvent::EmailRequested { order_id, .. } => *order_id,
        }
    }

    pub fn channel(&self) -> Channel {
        Channel::for_event_type(self.event_type())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

impl OutboxEvent {
    pub fn new(event: &NotificationEvent) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            aggregate_id: event.order_id(),
            event_type: event.event_type().to_string(),
            event_data: serde_json::to_value(event)?,
            processed: false,
            created_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged_by_type() {
        let order_id = Uuid::new_v4();
        let event = NotificationEvent::OrderApproved {
            order_id,
            order_number: "PO-20250301-0001".to_string(),
            bypass_reason: Some(ApprovalBypassReason::AmountThreshold),
        };
        let outbox = OutboxEvent::new(&event).unwrap();
        assert_eq!(outbox.aggregate_id, order_id);
        assert_eq!(outbox.event_type, "OrderApproved");
        assert_eq!(outbox.event_data["type"], "OrderApproved");
        assert_eq!(outbox.event_data["bypass_reason"], "amount_threshold");

        let back: NotificationEvent = serde_json::from_value(outbox.event_data).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn email_requests_go_to_their_own_channel() {
        let event = NotificationEvent::EmailRequested {
            history_id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            order_number: "PO-20250301-0002".to_string(),
            recipients: vec!["sales@vendor.co.kr".to_string()],
            cc: vec![],
            subject: "발주서".to_string(),
            message: None,
        };
        assert_eq!(event.channel(), Channel::EmailDispatch);
        assert_eq!(Channel::for_event_type("OrderSent"), Channel::OrderNotifications);
    }
}
