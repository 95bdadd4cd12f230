string_enum! {
    /// Lifecycle of the order document itself.
    pub enum OrderStatus {
        Draft => "draft",
        Created => "created",
        Sent => "sent",
        Delivered => "delivered",
        Cancelled => "cancelled",
    }
}

string_enum! {
    /// Approval track, orthogonal to `OrderStatus`.
    pub enum ApprovalStatus {
        NotRequired => "not_required",
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
}

string_enum! {
    /// Single-column status kept for list filters and older clients.
    pub enum PurchaseOrderStatus {
        Draft => "draft",
        Pending => "pending",
        Approved => "approved",
        Sent => "sent",
        Completed => "completed",
        Cancelled => "cancelled",
    }
}

string_enum! {
    pub enum StepStatus {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
        Skipped => "skipped",
    }
}

impl StepStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, StepStatus::Approved | StepStatus::Skipped)
    }
}

/// Derives the legacy status from the dual status pair.
pub fn legacy_status(order: OrderStatus, approval: ApprovalStatus) -> PurchaseOrderStatus {
    match (order, approval) {
        (OrderStatus::Cancelled, _) => PurchaseOrderStatus::Cancelled,
        (OrderStatus::Delivered, _) => PurchaseOrderStatus::Completed,
        (OrderStatus::Sent, _) => PurchaseOrderStatus::Sent,
        (OrderStatus::Created, ApprovalStatus::Pending) => PurchaseOrderStatus::Pending,
        (OrderStatus::Created, ApprovalStatus::Approved | ApprovalStatus::NotRequired) => {
            PurchaseOrderStatus::Approved
        }
        (OrderStatus::Created, ApprovalStatus::Rejected) | (OrderStatus::Draft, _) => {
            PurchaseOrderStatus::Draft
        }
    }
}
