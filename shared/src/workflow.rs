//! Approval workflow templates and routing.
//!
//! A template maps an amount range and an optional category filter to an
//! ordered list of role-gated steps. Routing picks a template for an order and
//! turns its steps into a plan: each step is either pending (someone with the
//! role has to sign) or skipped because its skip condition held.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::roles::UserRole;
use crate::status::StepStatus;
use crate::DomainError;

pub const DEFAULT_AUTO_APPROVE_DELAY_HOURS: u32 = 24;

string_enum! {
    pub enum SkipCondition {
        AmountBelow => "amount_below",
        CategoryMatch => "category_match",
        Always => "always",
    }
}

string_enum! {
    pub enum ApprovalMode {
        Direct => "direct",
        Staged => "staged",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepNotifications {
    pub on_pending: bool,
    pub on_approved: bool,
    pub on_rejected: bool,
    pub reminder_interval_hours: Option<u32>,
}

impl Default for StepNotifications {
    fn default() -> Self {
        Self {
            on_pending: true,
            on_approved: true,
            on_rejected: true,
            reminder_interval_hours: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub step_order: i32,
    pub required_role: UserRole,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub skip_condition: Option<SkipCondition>,
    #[serde(default)]
    pub skip_threshold: Option<f64>,
    #[serde(default)]
    pub skip_categories: Vec<String>,
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default)]
    pub auto_approve_delay_hours: Option<u32>,
    #[serde(default)]
    pub notifications: StepNotifications,
}

impl WorkflowStep {
    pub fn new(step_order: i32, required_role: UserRole) -> Self {
        Self {
            step_order,
            required_role,
            description: None,
            skip_condition: None,
            skip_threshold: None,
            skip_categories: Vec::new(),
            auto_approve: false,
            auto_approve_delay_hours: None,
            notifications: StepNotifications::default(),
        }
    }

    /// Returns the reason this step is skipped for the given order, if any.
    pub fn skip_reason(&self, amount: f64, category: Option<&str>) -> Option<String> {
        match self.skip_condition? {
            SkipCondition::Always => Some("step is always skipped".to_string()),
            SkipCondition::AmountBelow => {
                let threshold = self.skip_threshold?;
                (amount < threshold)
                    .then(|| format!("amount {:.0} is below {:.0}", amount, threshold))
            }
            SkipCondition::CategoryMatch => {
                let category = category?;
                contains_category(&self.skip_categories, category)
                    .then(|| format!("category '{}' skips this step", category.trim()))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub is_active: bool,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub min_amount: Option<f64>,
    #[serde(default)]
    pub max_amount: Option<f64>,
    #[serde(default)]
    pub category_filter: Vec<String>,
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowTemplate {
    pub fn matches(&self, amount: f64, category: Option<&str>) -> bool {
        if !self.is_active {
            return false;
        }
        if amount < self.min_amount.unwrap_or(0.0) {
            return false;
        }
        if let Some(max) = self.max_amount {
            if amount > max {
                return false;
            }
        }
        if self.category_filter.is_empty() {
            return true;
        }
        category.is_some_and(|c| contains_category(&self.category_filter, c))
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("template name is required"));
        }
        if self.steps.is_empty() {
            return Err(DomainError::validation("a template needs at least one step"));
        }
        if let (Some(min), Some(max)) = (self.min_amount, self.max_amount) {
            if min > max {
                return Err(DomainError::validation("min_amount exceeds max_amount"));
            }
        }
        let mut orders: Vec<i32> = self.steps.iter().map(|s| s.step_order).collect();
        orders.sort_unstable();
        if orders.windows(2).any(|w| w[0] == w[1]) {
            return Err(DomainError::validation("step_order values must be unique"));
        }
        for step in &self.steps {
            match step.skip_condition {
                Some(SkipCondition::AmountBelow) if step.skip_threshold.is_none() => {
                    return Err(DomainError::validation(format!(
                        "step {} skips below an amount but has no threshold",
                        step.step_order
                    )));
                }
                Some(SkipCondition::CategoryMatch) if step.skip_categories.is_empty() => {
                    return Err(DomainError::validation(format!(
                        "step {} skips on category but lists none",
                        step.step_order
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn sorted_steps(&self) -> Vec<&WorkflowStep> {
        let mut steps: Vec<&WorkflowStep> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.step_order);
        steps
    }
}

fn contains_category(list: &[String], category: &str) -> bool {
    let wanted = category.trim().to_lowercase();
    list.iter().any(|c| c.trim().to_lowercase() == wanted)
}

/// Picks the template for an order.
///
/// Category-specific templates win over generic ones, then the narrower
/// amount band (higher minimum), then the lower id so the choice is stable.
/// When nothing matches, the active default template is used.
pub fn select_template<'a>(
    templates: &'a [WorkflowTemplate],
    amount: f64,
    category: Option<&str>,
) -> Option<&'a WorkflowTemplate> {
    let best = templates
        .iter()
        .filter(|t| t.matches(amount, category))
        .min_by(|a, b| {
            a.category_filter
                .is_empty()
                .cmp(&b.category_filter.is_empty())
                .then_with(|| {
                    let a_min = a.min_amount.unwrap_or(0.0);
                    let b_min = b.min_amount.unwrap_or(0.0);
                    b_min.total_cmp(&a_min)
                })
                .then_with(|| a.id.cmp(&b.id))
        });

    best.or_else(|| templates.iter().find(|t| t.is_active && t.is_default))
}

/// One step of an order's approval plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedStep {
    pub step_order: i32,
    pub required_role: UserRole,
    pub status: StepStatus,
    pub skip_reason: Option<String>,
    pub auto_approve_at: Option<DateTime<Utc>>,
    pub notify_on_pending: bool,
    pub notify_on_approved: bool,
    pub notify_on_rejected: bool,
}

pub fn plan_steps(
    template: &WorkflowTemplate,
    amount: f64,
    category: Option<&str>,
    now: DateTime<Utc>,
) -> Vec<PlannedStep> {
    template
        .sorted_steps()
        .into_iter()
        .map(|step| {
            let skip_reason = step.skip_reason(amount, category);
            let status = if skip_reason.is_some() {
                StepStatus::Skipped
            } else {
                StepStatus::Pending
            };
            let auto_approve_at = (status == StepStatus::Pending && step.auto_approve).then(|| {
                let hours = step
                    .auto_approve_delay_hours
                    .unwrap_or(DEFAULT_AUTO_APPROVE_DELAY_HOURS);
                now + Duration::hours(i64::from(hours))
            });
            PlannedStep {
                step_order: step.step_order,
                required_role: step.required_role,
                status,
                skip_reason,
                auto_approve_at,
                notify_on_pending: step.notifications.on_pending,
                notify_on_approved: step.notifications.on_approved,
                notify_on_rejected: step.notifications.on_rejected,
            }
        })
        .collect()
}

/// Company-level approval configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalSettings {
    pub mode: ApprovalMode,
    #[serde(default)]
    pub direct_approval_roles: Vec<UserRole>,
    #[serde(default = "default_true")]
    pub require_all_stages: bool,
    #[serde(default)]
    pub skip_lower_stages: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone)]
pub struct RouteContext<'a> {
    pub amount: f64,
    pub category: Option<&'a str>,
    pub submitter_role: UserRole,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteDecision {
    pub mode: ApprovalMode,
    pub can_direct_approve: bool,
    pub template_id: Option<Uuid>,
    pub template_name: Option<String>,
    pub steps: Vec<PlannedStep>,
    pub reasoning: String,
}

impl RouteDecision {
    fn direct(can_direct_approve: bool, reasoning: impl Into<String>) -> Self {
        Self {
            mode: ApprovalMode::Direct,
            can_direct_approve,
            template_id: None,
            template_name: None,
            steps: Vec::new(),
            reasoning: reasoning.into(),
        }
    }

    pub fn pending_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Pending)
            .count()
    }
}

pub fn route(
    settings: Option<&ApprovalSettings>,
    templates: &[WorkflowTemplate],
    ctx: &RouteContext<'_>,
) -> RouteDecision {
    let Some(settings) = settings else {
        return RouteDecision::direct(
            ctx.submitter_role == UserRole::Admin,
            "no approval settings configured, only admins approve directly",
        );
    };

    if settings.mode == ApprovalMode::Direct {
        let allowed = settings.direct_approval_roles.contains(&ctx.submitter_role);
        let reasoning = if allowed {
            format!("{} may approve directly", ctx.submitter_role)
        } else {
            format!("{} has no direct approval right", ctx.submitter_role)
        };
        return RouteDecision::direct(allowed, reasoning);
    }

    let Some(template) = select_template(templates, ctx.amount, ctx.category) else {
        return RouteDecision::direct(
            ctx.submitter_role == UserRole::Admin,
            "no staged template matches, falling back to direct approval",
        );
    };

    let mut steps = plan_steps(template, ctx.amount, ctx.category, ctx.now);
    if settings.skip_lower_stages {
        for step in steps.iter_mut() {
            if step.status == StepStatus::Pending && step.required_role < ctx.submitter_role {
                step.status = StepStatus::Skipped;
                step.auto_approve_at = None;
                step.skip_reason = Some(format!(
                    "submitter {} outranks {}",
                    ctx.submitter_role, step.required_role
                ));
            }
        }
    }

    let pending = steps
        .iter()
        .filter(|s| s.status == StepStatus::Pending)
        .count();
    RouteDecision {
        mode: ApprovalMode::Staged,
        can_direct_approve: false,
        template_id: Some(template.id),
        template_name: Some(template.name.clone()),
        reasoning: format!(
            "template '{}' applies {} of {} steps to an order of {:.0}",
            template.name,
            pending,
            steps.len(),
            ctx.amount
        ),
        steps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn template(name: &str, min: Option<f64>, max: Option<f64>, filter: &[&str]) -> WorkflowTemplate {
        WorkflowTemplate {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            is_active: true,
            is_default: false,
            min_amount: min,
            max_amount: max,
            category_filter: filter.iter().map(|s| s.to_string()).collect(),
            steps: vec![
                WorkflowStep::new(1, UserRole::ProjectManager),
                WorkflowStep::new(2, UserRole::HqManagement),
            ],
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap()
    }

    #[test]
    fn selects_template_by_amount_range() {
        let templates = vec![
            template("small", None, Some(5_000_000.0), &[]),
            template("large", Some(5_000_000.01), None, &[]),
        ];
        let picked = select_template(&templates, 1_000_000.0, None).unwrap();
        assert_eq!(picked.name, "small");
        let picked = select_template(&templates, 9_000_000.0, Some("철근")).unwrap();
        assert_eq!(picked.name, "large");
    }

    #[test]
    fn category_specific_template_beats_generic() {
        let templates = vec![
            template("generic", None, None, &[]),
            template("steel", None, None, &["철근", "Rebar"]),
        ];
        let picked = select_template(&templates, 100.0, Some(" rebar ")).unwrap();
        assert_eq!(picked.name, "steel");
        let picked = select_template(&templates, 100.0, Some("전기")).unwrap();
        assert_eq!(picked.name, "generic");
    }

    #[test]
    fn higher_minimum_wins_when_bands_overlap() {
        let templates = vec![
            template("all", None, None, &[]),
            template("over-10m", Some(10_000_000.0), None, &[]),
        ];
        let picked = select_template(&templates, 20_000_000.0, None).unwrap();
        assert_eq!(picked.name, "over-10m");
    }

    #[test]
    fn falls_back_to_default_template() {
        let mut fallback = template("fallback", Some(1e12), None, &[]);
        fallback.is_default = true;
        let mut inactive = template("inactive", None, None, &[]);
        inactive.is_active = false;
        let templates = vec![inactive, fallback];
        let picked = select_template(&templates, 100.0, None).unwrap();
        assert_eq!(picked.name, "fallback");
    }

    #[test]
    fn amount_below_threshold_skips_step() {
        let mut t = template("t", None, None, &[]);
        t.steps[1].skip_condition = Some(SkipCondition::AmountBelow);
        t.steps[1].skip_threshold = Some(3_000_000.0);

        let plan = plan_steps(&t, 1_000_000.0, None, now());
        assert_eq!(plan[0].status, StepStatus::Pending);
        assert_eq!(plan[1].status, StepStatus::Skipped);
        assert!(plan[1].skip_reason.is_some());

        let plan = plan_steps(&t, 4_000_000.0, None, now());
        assert_eq!(plan[1].status, StepStatus::Pending);
    }

    #[test]
    fn category_match_skips_step() {
        let mut t = template("t", None, None, &[]);
        t.steps[0].skip_condition = Some(SkipCondition::CategoryMatch);
        t.steps[0].skip_categories = vec!["소모품".to_string()];
        let plan = plan_steps(&t, 10.0, Some("소모품"), now());
        assert_eq!(plan[0].status, StepStatus::Skipped);
        let plan = plan_steps(&t, 10.0, None, now());
        assert_eq!(plan[0].status, StepStatus::Pending);
    }

    #[test]
    fn auto_approve_sets_due_time() {
        let mut t = template("t", None, None, &[]);
        t.steps[0].auto_approve = true;
        t.steps[1].auto_approve = true;
        t.steps[1].auto_approve_delay_hours = Some(2);
        let plan = plan_steps(&t, 10.0, None, now());
        assert_eq!(plan[0].auto_approve_at, Some(now() + Duration::hours(24)));
        assert_eq!(plan[1].auto_approve_at, Some(now() + Duration::hours(2)));
    }

    #[test]
    fn steps_are_planned_in_step_order() {
        let mut t = template("t", None, None, &[]);
        t.steps.reverse();
        let plan = plan_steps(&t, 10.0, None, now());
        assert_eq!(plan[0].step_order, 1);
        assert_eq!(plan[1].step_order, 2);
    }

    #[test]
    fn validate_rejects_bad_templates() {
        let mut t = template("t", Some(10.0), Some(5.0), &[]);
        assert!(t.validate().is_err());
        t.max_amount = None;
        t.steps[1].step_order = 1;
        assert!(t.validate().is_err());
        t.steps[1].step_order = 2;
        t.steps[1].skip_condition = Some(SkipCondition::AmountBelow);
        assert!(t.validate().is_err());
        t.steps[1].skip_threshold = Some(1.0);
        assert!(t.validate().is_ok());
    }

    #[test]
    fn route_without_settings_is_direct_for_admin_only() {
        let ctx = RouteContext {
            amount: 10.0,
            category: None,
            submitter_role: UserRole::Admin,
            now: now(),
        };
        let decision = route(None, &[], &ctx);
        assert_eq!(decision.mode, ApprovalMode::Direct);
        assert!(decision.can_direct_approve);

        let ctx = RouteContext {
            submitter_role: UserRole::Executive,
            ..ctx
        };
        assert!(!route(None, &[], &ctx).can_direct_approve);
    }

    #[test]
    fn direct_mode_checks_role_list() {
        let settings = ApprovalSettings {
            mode: ApprovalMode::Direct,
            direct_approval_roles: vec![UserRole::Executive],
            require_all_stages: true,
            skip_lower_stages: false,
        };
        let ctx = RouteContext {
            amount: 10.0,
            category: None,
            submitter_role: UserRole::Executive,
            now: now(),
        };
        assert!(route(Some(&settings), &[], &ctx).can_direct_approve);
    }

    #[test]
    fn staged_route_skips_lower_stages_for_senior_submitter() {
        let settings = ApprovalSettings {
            mode: ApprovalMode::Staged,
            direct_approval_roles: vec![],
            require_all_stages: true,
            skip_lower_stages: true,
        };
        let templates = vec![template("t", None, None, &[])];
        let ctx = RouteContext {
            amount: 10.0,
            category: None,
            submitter_role: UserRole::HqManagement,
            now: now(),
        };
        let decision = route(Some(&settings), &templates, &ctx);
        assert_eq!(decision.mode, ApprovalMode::Staged);
        assert_eq!(decision.steps[0].status, StepStatus::Skipped);
        assert_eq!(decision.steps[1].status, StepStatus::Pending);
        assert_eq!(decision.pending_steps(), 1);
    }

    #[test]
    fn staged_route_without_template_falls_back() {
        let settings = ApprovalSettings {
            mode: ApprovalMode::Staged,
            direct_approval_roles: vec![],
            require_all_stages: true,
            skip_lower_stages: false,
        };
        let ctx = RouteContext {
            amount: 10.0,
            category: None,
            submitter_role: UserRole::FieldWorker,
            now: now(),
        };
        let decision = route(Some(&settings), &[], &ctx);
        assert_eq!(decision.mode, ApprovalMode::Direct);
        assert!(!decision.can_direct_approve);
    }

    #[test]
    fn step_json_uses_defaults() {
        let step: WorkflowStep =
            serde_json::from_str(r#"{"step_order": 1, "required_role": "executive"}"#).unwrap();
        assert!(step.notifications.on_pending);
        assert!(!step.auto_approve);
        assert!(step.skip_categories.is_empty());
    }
}
