use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::status::{legacy_status, ApprovalStatus, OrderStatus, PurchaseOrderStatus};
use crate::DomainError;

/// The dual status pair stored on every purchase order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderState {
    pub order_status: OrderStatus,
    pub approval_status: ApprovalStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderAction {
    /// Leave draft. `approval` is the outcome of routing: `Pending` for staged
    /// approval, `NotRequired` for direct or automatic approval, `Approved`
    /// when every planned step was skipped.
    Submit { approval: ApprovalStatus },
    Approve,
    Reject,
    Send,
    Deliver,
    Cancel,
}

impl OrderAction {
    fn name(&self) -> &'static str {
        match self {
            OrderAction::Submit { .. } => "submit",
            OrderAction::Approve => "approve",
            OrderAction::Reject => "reject",
            OrderAction::Send => "send",
            OrderAction::Deliver => "deliver",
            OrderAction::Cancel => "cancel",
        }
    }
}

impl OrderState {
    pub fn draft() -> Self {
        Self {
            order_status: OrderStatus::Draft,
            approval_status: ApprovalStatus::NotRequired,
        }
    }

    pub fn legacy(&self) -> PurchaseOrderStatus {
        legacy_status(self.order_status, self.approval_status)
    }

    pub fn is_editable(&self) -> bool {
        self.order_status == OrderStatus::Draft
    }

    pub fn is_sendable(&self) -> bool {
        self.order_status == OrderStatus::Created
            && matches!(
                self.approval_status,
                ApprovalStatus::Approved | ApprovalStatus::NotRequired
            )
    }

    pub fn apply(self, action: OrderAction) -> Result<OrderState, DomainError> {
        use ApprovalStatus as A;
        use OrderStatus as O;

        let next = match (self.order_status, self.approval_status, action) {
            (O::Draft, _, OrderAction::Submit { approval }) if approval != A::Rejected => {
                Some((O::Created, approval))
            }
            (O::Created, A::Pending, OrderAction::Approve) => Some((O::Created, A::Approved)),
            (O::Created, A::Pending, OrderAction::Reject) => Some((O::Draft, A::Rejected)),
            (O::Created, A::Approved | A::NotRequired, OrderAction::Send) => {
                Some((O::Sent, self.approval_status))
            }
            (O::Sent, _, OrderAction::Deliver) => Some((O::Delivered, self.approval_status)),
            (O::Draft | O::Created, _, OrderAction::Cancel) => {
                Some((O::Cancelled, self.approval_status))
            }
            _ => None,
        };

        match next {
            Some((order_status, approval_status)) => Ok(OrderState {
                order_status,
                approval_status,
            }),
            None => Err(DomainError::InvalidTransition {
                from: format!("{}/{}", self.order_status, self.approval_status),
                action: action.name().to_string(),
            }),
        }
    }
}

/// `PO-YYYYMMDD-NNNN`, where `sequence` counts the day's orders from 1.
pub fn order_number(date: NaiveDate, sequence: u32) -> String {
    format!("PO-{}-{:04}", date.format("%Y%m%d"), sequence)
}

pub fn line_total(quantity: f64, unit_price: f64) -> f64 {
    round_won(quantity * unit_price)
}

/// Rounds to two decimal places, the scale of every amount column.
pub fn round_won(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_order_walks_to_delivery() {
        let state = OrderState::draft()
            .apply(OrderAction::Submit {
                approval: ApprovalStatus::Pending,
            })
            .unwrap();
        assert_eq!(state.legacy(), PurchaseOrderStatus::Pending);
        assert!(!state.is_sendable());

        let state = state.apply(OrderAction::Approve).unwrap();
        assert!(state.is_sendable());
        let state = state.apply(OrderAction::Send).unwrap();
        let state = state.apply(OrderAction::Deliver).unwrap();
        assert_eq!(state.legacy(), PurchaseOrderStatus::Completed);
    }

    #[test]
    fn rejection_returns_to_draft_and_can_resubmit() {
        let state = OrderState::draft()
            .apply(OrderAction::Submit {
                approval: ApprovalStatus::Pending,
            })
            .unwrap()
            .apply(OrderAction::Reject)
            .unwrap();
        assert_eq!(state.order_status, OrderStatus::Draft);
        assert_eq!(state.approval_status, ApprovalStatus::Rejected);
        assert!(state.is_editable());

        let resubmitted = state
            .apply(OrderAction::Submit {
                approval: ApprovalStatus::NotRequired,
            })
            .unwrap();
        assert!(resubmitted.is_sendable());
    }

    #[test]
    fn sent_orders_cannot_be_cancelled() {
        let sent = OrderState {
            order_status: OrderStatus::Sent,
            approval_status: ApprovalStatus::Approved,
        };
        let err = sent.apply(OrderAction::Cancel).unwrap_err();
        assert_eq!(
            err,
            DomainError::InvalidTransition {
                from: "sent/approved".to_string(),
                action: "cancel".to_string(),
            }
        );
    }

    #[test]
    fn pending_orders_cannot_be_sent() {
        let pending = OrderState {
            order_status: OrderStatus::Created,
            approval_status: ApprovalStatus::Pending,
        };
        assert!(pending.apply(OrderAction::Send).is_err());
    }

    #[test]
    fn order_numbers_are_zero_padded() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 7).unwrap();
        assert_eq!(order_number(date, 12), "PO-20250307-0012");
        assert_eq!(line_total(3.0, 1234.567), 3703.7);
    }
}
