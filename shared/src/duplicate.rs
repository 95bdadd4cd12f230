//! Duplicate detection over ingested order rows.
//!
//! Rows are compared with each other (a row only ever points back at an
//! earlier one) and with recently stored order items. Exact duplicates share a
//! fingerprint; similar rows score above a weighted similarity threshold.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::category::similarity;
use crate::excel::InputRow;
use crate::order::line_total;

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.85;
/// Stored items at or above this similarity count as exact.
const EXISTING_EXACT: f64 = 0.99;
const SKIP_PERCENT: u8 = 95;
const SIMILAR_PERCENT: u8 = 85;

const W_ITEM: f64 = 0.25;
const W_SPEC: f64 = 0.2;
const W_VENDOR: f64 = 0.2;
const W_PROJECT: f64 = 0.15;
const W_QUANTITY: f64 = 0.1;
const W_PRICE: f64 = 0.1;

string_enum! {
    pub enum DuplicateType {
        Exact => "exact",
        Similar => "similar",
        None => "none",
    }
}

string_enum! {
    pub enum MergeAction {
        Skip => "skip",
        Replace => "replace",
        Merge => "merge",
        CreateNew => "create_new",
    }
}

/// The fields duplicates are judged on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateCandidate {
    pub item_name: String,
    pub specification: Option<String>,
    pub vendor_name: String,
    pub project_name: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub request_date: Option<NaiveDate>,
}

impl From<&InputRow> for DuplicateCandidate {
    fn from(row: &InputRow) -> Self {
        Self {
            item_name: row.item_name.clone(),
            specification: row.specification.clone(),
            vendor_name: row.vendor_name.clone(),
            project_name: row.project_name.clone(),
            quantity: row.quantity,
            unit_price: row.unit_price,
            request_date: row.order_date,
        }
    }
}

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn text_similarity(a: &str, b: &str) -> f64 {
    let (a, b) = (normalize(a), normalize(b));
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    similarity(&a, &b)
}

fn number_similarity(a: f64, b: f64) -> f64 {
    if a == 0.0 || b == 0.0 {
        return 0.0;
    }
    1.0 - (a - b).abs() / a.max(b)
}

impl DuplicateCandidate {
    /// Stable key shared by rows that are exact duplicates.
    pub fn fingerprint(&self) -> String {
        [
            normalize(&self.item_name),
            normalize(self.specification.as_deref().unwrap_or_default()),
            normalize(&self.vendor_name),
            normalize(&self.project_name),
            self.quantity.to_string(),
            self.unit_price.to_string(),
            self.request_date.map(|d| d.to_string()).unwrap_or_default(),
        ]
        .join("\u{1f}")
    }

    pub fn similarity(&self, other: &DuplicateCandidate) -> f64 {
        W_ITEM * text_similarity(&self.item_name, &other.item_name)
            + W_SPEC
                * text_similarity(
                    self.specification.as_deref().unwrap_or_default(),
                    other.specification.as_deref().unwrap_or_default(),
                )
            + W_VENDOR * text_similarity(&self.vendor_name, &other.vendor_name)
            + W_PROJECT * text_similarity(&self.project_name, &other.project_name)
            + W_QUANTITY * number_similarity(self.quantity, other.quantity)
            + W_PRICE * number_similarity(self.unit_price, other.unit_price)
    }

    fn compare_fields(&self, other: &DuplicateCandidate) -> Vec<FieldMatch> {
        let text = |field, a: &str, b: &str| FieldMatch {
            field,
            original: a.to_string(),
            matched: b.to_string(),
            is_exact_match: normalize(a) == normalize(b),
        };
        let number = |field, a: f64, b: f64| FieldMatch {
            field,
            original: a.to_string(),
            matched: b.to_string(),
            is_exact_match: a == b,
        };
        vec![
            text("item_name", &self.item_name, &other.item_name),
            text(
                "specification",
                self.specification.as_deref().unwrap_or_default(),
                other.specification.as_deref().unwrap_or_default(),
            ),
            text("vendor_name", &self.vendor_name, &other.vendor_name),
            text("project_name", &self.project_name, &other.project_name),
            number("quantity", self.quantity, other.quantity),
            number("unit_price", self.unit_price, other.unit_price),
        ]
    }
}

/// A recently stored order item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExistingItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub candidate: DuplicateCandidate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionOptions {
    pub similarity_threshold: f64,
    pub check_existing: bool,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            check_existing: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldMatch {
    pub field: &'static str,
    pub original: String,
    pub matched: String,
    pub is_exact_match: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateMatch {
    /// Earlier row in the same batch.
    pub row_index: Option<usize>,
    /// Stored order item.
    pub existing_item_id: Option<Uuid>,
    pub match_type: DuplicateType,
    /// Percent, rounded.
    pub similarity: u8,
    pub fields: Vec<FieldMatch>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeStrategy {
    pub action: MergeAction,
    pub reason: String,
    /// Quantity after a merge.
    pub merged_quantity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateCheck {
    pub row_index: usize,
    pub is_duplicate: bool,
    pub duplicate_type: DuplicateType,
    pub confidence: u8,
    pub matches: Vec<DuplicateMatch>,
    pub merge_strategy: Option<MergeStrategy>,
}

impl DuplicateCheck {
    fn unique(row_index: usize) -> Self {
        Self {
            row_index,
            is_duplicate: false,
            duplicate_type: DuplicateType::None,
            confidence: 0,
            matches: Vec::new(),
            merge_strategy: None,
        }
    }

    pub fn action(&self) -> MergeAction {
        self.merge_strategy
            .as_ref()
            .map(|s| s.action)
            .unwrap_or(MergeAction::CreateNew)
    }
}

fn percent(score: f64) -> u8 {
    (score * 100.0).round().clamp(0.0, 100.0) as u8
}

fn suggest_strategy(row: &DuplicateCandidate, best: &DuplicateMatch) -> MergeStrategy {
    let target = best
        .row_index
        .map(|i| format!("row {}", i + 1))
        .unwrap_or_else(|| "a stored order".to_string());

    if best.similarity >= SKIP_PERCENT {
        return MergeStrategy {
            action: MergeAction::Skip,
            reason: format!("nearly identical to {} ({}%)", target, best.similarity),
            merged_quantity: None,
        };
    }
    if best.similarity >= SIMILAR_PERCENT {
        let differing: Vec<&FieldMatch> = best.fields.iter().filter(|f| !f.is_exact_match).collect();
        if let [only] = differing.as_slice() {
            if only.field == "quantity" {
                let other: f64 = only.matched.parse().unwrap_or(0.0);
                return MergeStrategy {
                    action: MergeAction::Merge,
                    reason: format!("only the quantity differs from {}", target),
                    merged_quantity: Some(row.quantity + other),
                };
            }
        }
        return MergeStrategy {
            action: MergeAction::Replace,
            reason: format!("similar to {} ({}%)", target, best.similarity),
            merged_quantity: None,
        };
    }
    MergeStrategy {
        action: MergeAction::CreateNew,
        reason: "similar but distinct item".to_string(),
        merged_quantity: None,
    }
}

pub fn detect_duplicates(
    rows: &[DuplicateCandidate],
    existing: &[ExistingItem],
    options: &DetectionOptions,
) -> Vec<DuplicateCheck> {
    let mut checks: Vec<DuplicateCheck> = (0..rows.len()).map(DuplicateCheck::unique).collect();

    let mut first_seen: HashMap<String, usize> = HashMap::new();
    for (i, row) in rows.iter().enumerate() {
        let Some(&original) = first_seen.get(&row.fingerprint()) else {
            first_seen.insert(row.fingerprint(), i);
            continue;
        };
        checks[i] = DuplicateCheck {
            row_index: i,
            is_duplicate: true,
            duplicate_type: DuplicateType::Exact,
            confidence: 100,
            matches: vec![DuplicateMatch {
                row_index: Some(original),
                existing_item_id: None,
                match_type: DuplicateType::Exact,
                similarity: 100,
                fields: row.compare_fields(&rows[original]),
            }],
            merge_strategy: Some(MergeStrategy {
                action: MergeAction::Skip,
                reason: format!("identical to row {}", original + 1),
                merged_quantity: None,
            }),
        };
    }

    for (i, row) in rows.iter().enumerate() {
        if checks[i].is_duplicate {
            continue;
        }
        let mut matches: Vec<DuplicateMatch> = rows[..i]
            .iter()
            .enumerate()
            .filter_map(|(j, earlier)| {
                let score = row.similarity(earlier);
                (score >= options.similarity_threshold).then(|| DuplicateMatch {
                    row_index: Some(j),
                    existing_item_id: None,
                    match_type: DuplicateType::Similar,
                    similarity: percent(score),
                    fields: row.compare_fields(earlier),
                })
            })
            .collect();
        if matches.is_empty() {
            continue;
        }
        matches.sort_by(|a, b| b.similarity.cmp(&a.similarity));
        let strategy = suggest_strategy(row, &matches[0]);
        checks[i] = DuplicateCheck {
            row_index: i,
            is_duplicate: true,
            duplicate_type: DuplicateType::Similar,
            confidence: matches[0].similarity,
            matches,
            merge_strategy: Some(strategy),
        };
    }

    if options.check_existing {
        for (i, row) in rows.iter().enumerate() {
            if checks[i].is_duplicate {
                continue;
            }
            let best = existing
                .iter()
                .map(|item| (item, row.similarity(&item.candidate)))
                .filter(|(_, score)| *score >= options.similarity_threshold)
                .max_by(|a, b| a.1.total_cmp(&b.1));
            let Some((item, score)) = best else {
                continue;
            };
            let exact = score >= EXISTING_EXACT;
            let match_type = if exact {
                DuplicateType::Exact
            } else {
                DuplicateType::Similar
            };
            checks[i] = DuplicateCheck {
                row_index: i,
                is_duplicate: true,
                duplicate_type: match_type,
                confidence: percent(score),
                matches: vec![DuplicateMatch {
                    row_index: None,
                    existing_item_id: Some(item.id),
                    match_type,
                    similarity: percent(score),
                    fields: row.compare_fields(&item.candidate),
                }],
                // Stored items are never rewritten from a sheet, so a
                // similar stored item only flags the row for review.
                merge_strategy: Some(MergeStrategy {
                    action: if exact {
                        MergeAction::Skip
                    } else {
                        MergeAction::CreateNew
                    },
                    reason: if exact {
                        "already ordered".to_string()
                    } else {
                        format!("similar to a stored order item ({}%)", percent(score))
                    },
                    merged_quantity: None,
                }),
            };
        }
    }

    checks
}

/// Applies the suggested (or overridden) action of every row and returns the
/// rows to keep, in sheet order.
///
/// `skip` drops the row. `merge` folds its quantity into the earlier row it
/// matched. `replace` puts the row in place of the earlier row it matched.
/// `create_new` keeps it.
pub fn resolve_rows(
    rows: &[InputRow],
    checks: &[DuplicateCheck],
    overrides: &HashMap<usize, MergeAction>,
) -> Vec<InputRow> {
    let mut slots: Vec<Option<InputRow>> = Vec::with_capacity(rows.len());

    for (i, row) in rows.iter().enumerate() {
        let check = checks.iter().find(|c| c.row_index == i);
        let action = overrides
            .get(&i)
            .copied()
            .or_else(|| check.map(DuplicateCheck::action))
            .unwrap_or(MergeAction::CreateNew);
        let target = check
            .and_then(|c| c.matches.first())
            .and_then(|m| m.row_index)
            .filter(|&t| t < i);

        match (action, target) {
            (MergeAction::Skip, _) => slots.push(None),
            (MergeAction::Merge, Some(t)) if slots[t].is_some() => {
                if let Some(kept) = slots[t].as_mut() {
                    kept.quantity += row.quantity;
                    kept.total_amount = line_total(kept.quantity, kept.unit_price);
                }
                slots.push(None);
            }
            (MergeAction::Replace, Some(t)) if slots[t].is_some() => {
                slots[t] = Some(row.clone());
                slots.push(None);
            }
            _ => slots.push(Some(row.clone())),
        }
    }

    slots.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(item: &str, qty: f64, price: f64) -> DuplicateCandidate {
        DuplicateCandidate {
            item_name: item.to_string(),
            specification: Some("SD400 D10".to_string()),
            vendor_name: "대한철강".to_string(),
            project_name: "송도 현장".to_string(),
            quantity: qty,
            unit_price: price,
            request_date: NaiveDate::from_ymd_opt(2025, 3, 1),
        }
    }

    fn input(c: &DuplicateCandidate, row_number: usize) -> InputRow {
        InputRow {
            row_number,
            order_date: c.request_date,
            delivery_date: None,
            vendor_name: c.vendor_name.clone(),
            vendor_email: None,
            delivery_name: None,
            delivery_email: None,
            project_name: c.project_name.clone(),
            major_category: None,
            middle_category: None,
            minor_category: None,
            item_name: c.item_name.clone(),
            specification: c.specification.clone(),
            quantity: c.quantity,
            unit_price: c.unit_price,
            total_amount: line_total(c.quantity, c.unit_price),
            notes: None,
        }
    }

    #[test]
    fn fingerprint_ignores_case_and_spacing() {
        let a = candidate("이형 철근", 10.0, 1000.0);
        let mut b = a.clone();
        b.item_name = "  이형   철근 ".to_string();
        assert_eq!(a.fingerprint(), b.fingerprint());
        b.quantity = 11.0;
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn later_exact_copy_is_skipped() {
        let rows = vec![
            candidate("철근", 10.0, 1000.0),
            candidate("전선", 3.0, 500.0),
            candidate("철근", 10.0, 1000.0),
        ];
        let checks = detect_duplicates(&rows, &[], &DetectionOptions::default());
        assert!(!checks[0].is_duplicate);
        assert_eq!(checks[2].duplicate_type, DuplicateType::Exact);
        assert_eq!(checks[2].matches[0].row_index, Some(0));
        assert_eq!(checks[2].action(), MergeAction::Skip);
    }

    #[test]
    fn quantity_only_difference_merges() {
        // 0.9 from identical text and price, 0.1 * (1 - 40/100) from quantity.
        let rows = vec![candidate("철근", 60.0, 1000.0), candidate("철근", 100.0, 1000.0)];
        let checks = detect_duplicates(&rows, &[], &DetectionOptions::default());
        let check = &checks[1];
        assert_eq!(check.confidence, 96);
        assert_eq!(check.action(), MergeAction::Skip);

        let rows = vec![candidate("철근", 10.0, 1000.0), candidate("철근", 100.0, 1000.0)];
        let checks = detect_duplicates(&rows, &[], &DetectionOptions::default());
        let strategy = checks[1].merge_strategy.clone().unwrap();
        assert_eq!(checks[1].confidence, 91);
        assert_eq!(strategy.action, MergeAction::Merge);
        assert_eq!(strategy.merged_quantity, Some(110.0));
    }

    #[test]
    fn similar_rows_with_other_differences_replace() {
        let rows = vec![candidate("철근", 10.0, 1000.0), candidate("철근", 10.0, 700.0)];
        let checks = detect_duplicates(&rows, &[], &DetectionOptions::default());
        // 0.9 + 0.1 * 0.7 is still above the skip line.
        assert_eq!(checks[1].action(), MergeAction::Skip);

        let rows = vec![candidate("철근", 10.0, 1000.0), candidate("철근", 10.0, 200.0)];
        let checks = detect_duplicates(&rows, &[], &DetectionOptions::default());
        assert_eq!(checks[1].confidence, 92);
        assert_eq!(checks[1].action(), MergeAction::Replace);
    }

    #[test]
    fn unrelated_rows_are_unique() {
        let mut other = candidate("안전모", 5.0, 20000.0);
        other.vendor_name = "한빛안전".to_string();
        other.specification = None;
        let rows = vec![candidate("철근", 10.0, 1000.0), other];
        let checks = detect_duplicates(&rows, &[], &DetectionOptions::default());
        assert!(checks.iter().all(|c| !c.is_duplicate));
    }

    #[test]
    fn stored_items_are_checked() {
        let stored = ExistingItem {
            id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            candidate: candidate("철근", 10.0, 1000.0),
        };
        let rows = vec![candidate("철근", 10.0, 1000.0)];
        let checks = detect_duplicates(&rows, &[stored.clone()], &DetectionOptions::default());
        assert_eq!(checks[0].duplicate_type, DuplicateType::Exact);
        assert_eq!(checks[0].matches[0].existing_item_id, Some(stored.id));
        assert_eq!(checks[0].action(), MergeAction::Skip);

        let options = DetectionOptions {
            check_existing: false,
            ..DetectionOptions::default()
        };
        assert!(!detect_duplicates(&rows, &[stored], &options)[0].is_duplicate);
    }

    #[test]
    fn resolve_applies_actions_and_overrides() {
        let a = candidate("철근", 10.0, 1000.0);
        let b = candidate("철근", 100.0, 1000.0);
        let c = candidate("철근", 10.0, 1000.0);
        let candidates = vec![a.clone(), b.clone(), c.clone()];
        let rows: Vec<InputRow> = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| input(c, i + 2))
            .collect();
        let checks = detect_duplicates(&candidates, &[], &DetectionOptions::default());
        assert_eq!(checks[1].action(), MergeAction::Merge);
        assert_eq!(checks[2].action(), MergeAction::Skip);

        let resolved = resolve_rows(&rows, &checks, &HashMap::new());
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].quantity, 110.0);
        assert_eq!(resolved[0].total_amount, 110_000.0);

        let overrides = HashMap::from([(1, MergeAction::CreateNew), (2, MergeAction::Replace)]);
        let resolved = resolve_rows(&rows, &checks, &overrides);
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].row_number, 4);
        assert_eq!(resolved[1].row_number, 3);
    }
}
