//! Domain types and business rules for the procurement service.
//!
//! Nothing in this crate touches the database or the network. The service
//! crate loads rows, converts them into these types and persists whatever the
//! rules decide.

/// Declares a fieldless enum that round-trips through a fixed string, both for
/// serde and for the `Varchar` columns the service stores it in.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        $vis enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(crate::DomainError::UnknownValue {
                        kind: stringify!($name),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

pub mod authority;
pub mod cache;
pub mod category;
pub mod duplicate;
pub mod error;
pub mod events;
pub mod excel;
pub mod order;
pub mod progress;
pub mod roles;
pub mod status;
pub mod workflow;

pub use authority::{ApprovalAuthority, ApprovalBypassReason, AuthorityCheck, AutoApprovalFacts};
pub use cache::{CachePolicy, CacheTier};
pub use category::{
    CategoryLevel, CategoryMappingRequest, CategoryMappingResult, CategoryNode, CategoryTree,
    MappingStatus,
};
pub use duplicate::{DuplicateCandidate, DuplicateCheck, DuplicateType, MergeAction};
pub use error::DomainError;
pub use events::{NotificationEvent, OutboxEvent};
pub use excel::{InputRow, OrderDraft, ParsedSheet, RowError, SheetGrid};
pub use order::{OrderAction, OrderState};
pub use progress::{ApprovalProgress, Decision, StepAdvance, StepState};
pub use roles::UserRole;
pub use status::{ApprovalStatus, OrderStatus, PurchaseOrderStatus, StepStatus};
pub use workflow::{
    ApprovalMode, ApprovalSettings, PlannedStep, RouteContext, RouteDecision, SkipCondition,
    WorkflowStep, WorkflowTemplate,
};
