//! Field mapping for the "Input" order sheet.
//!
//! Clients read the workbook themselves and submit the sheet as a grid of
//! JSON cells, one inner array per sheet row. Row 1 is the header; columns A
//! through P carry the fields below.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::category::ResolvedCategory;
use crate::order::{line_total, round_won};

pub const INPUT_SHEET: &str = "Input";

const COL_ORDER_DATE: usize = 0;
const COL_DELIVERY_DATE: usize = 1;
const COL_VENDOR_NAME: usize = 2;
const COL_VENDOR_EMAIL: usize = 3;
const COL_DELIVERY_NAME: usize = 4;
const COL_DELIVERY_EMAIL: usize = 5;
const COL_PROJECT_NAME: usize = 6;
const COL_MAJOR: usize = 7;
const COL_MIDDLE: usize = 8;
const COL_MINOR: usize = 9;
const COL_ITEM_NAME: usize = 10;
const COL_SPECIFICATION: usize = 11;
const COL_QUANTITY: usize = 12;
const COL_UNIT_PRICE: usize = 13;
const COL_TOTAL_AMOUNT: usize = 14;
const COL_NOTES: usize = 15;

#[derive(Debug, Clone, Deserialize)]
pub struct SheetGrid {
    pub sheet_name: String,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRow {
    /// 1-based row number in the sheet, header included.
    pub row_number: usize,
    pub order_date: Option<NaiveDate>,
    pub delivery_date: Option<NaiveDate>,
    pub vendor_name: String,
    pub vendor_email: Option<String>,
    pub delivery_name: Option<String>,
    pub delivery_email: Option<String>,
    pub project_name: String,
    pub major_category: Option<String>,
    pub middle_category: Option<String>,
    pub minor_category: Option<String>,
    pub item_name: String,
    pub specification: Option<String>,
    pub quantity: f64,
    pub unit_price: f64,
    pub total_amount: f64,
    pub notes: Option<String>,
}

impl InputRow {
    pub fn apply_category(&mut self, resolved: &ResolvedCategory) {
        self.major_category = resolved.major.clone();
        self.middle_category = resolved.middle.clone();
        self.minor_category = resolved.minor.clone();
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowError {
    pub row_number: usize,
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ParsedSheet {
    /// Rows that passed validation.
    pub rows: Vec<InputRow>,
    pub errors: Vec<RowError>,
    /// Non-blank data rows seen, valid or not.
    pub total_rows: usize,
}

impl ParsedSheet {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

fn cell(row: &[Value], col: usize) -> &Value {
    row.get(col).unwrap_or(&Value::Null)
}

fn text(value: &Value) -> Option<String> {
    let s = match value {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        Value::Bool(b) => b.to_string(),
        other => other.to_string(),
    };
    (!s.is_empty()).then_some(s)
}

/// Numbers arrive as numeric cells or as text with thousands separators.
pub fn parse_number(value: &Value) -> Result<Option<f64>, String> {
    match value {
        Value::Number(n) => Ok(n.as_f64()),
        _ => {
            let Some(raw) = text(value) else {
                return Ok(None);
            };
            let cleaned: String = raw
                .chars()
                .filter(|c| !matches!(c, ',' | ' ' | '₩' | '원'))
                .collect();
            cleaned
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(Some)
                .ok_or_else(|| format!("'{}' is not a number", raw))
        }
    }
}

/// Dates arrive as Excel serial numbers or as `YYYY-MM-DD`, `YYYY.MM.DD` or
/// `YYYY/MM/DD` text.
pub fn parse_date(value: &Value) -> Result<Option<NaiveDate>, String> {
    if let Value::Number(n) = value {
        let serial = n.as_f64().ok_or_else(|| format!("'{}' is not a date", n))?;
        return excel_serial_date(serial)
            .map(Some)
            .ok_or_else(|| format!("'{}' is not a date", n));
    }
    let Some(raw) = text(value) else {
        return Ok(None);
    };
    let trimmed = raw.trim_end_matches('.');
    ["%Y-%m-%d", "%Y.%m.%d", "%Y/%m/%d", "%Y. %m. %d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(trimmed, fmt).ok())
        .map(Some)
        .ok_or_else(|| format!("'{}' is not a date", raw))
}

/// Serial 1 is 1900-01-01. Excel also counts a 1900-02-29 that never
/// existed (serial 60), so later serials are one day ahead.
fn excel_serial_date(serial: f64) -> Option<NaiveDate> {
    if !(1.0..2_958_466.0).contains(&serial) {
        return None;
    }
    let days = serial.trunc() as i64;
    let epoch = match days {
        ..=59 => NaiveDate::from_ymd_opt(1899, 12, 31)?,
        60 => return None,
        _ => NaiveDate::from_ymd_opt(1899, 12, 30)?,
    };
    epoch.checked_add_signed(Duration::days(days))
}

pub fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

fn is_blank(row: &[Value]) -> bool {
    row.iter().all(|v| text(v).is_none())
}

pub fn parse_input_sheet(sheet: &SheetGrid) -> Result<ParsedSheet, crate::DomainError> {
    if sheet.sheet_name.trim() != INPUT_SHEET {
        return Err(crate::DomainError::validation(format!(
            "expected a sheet named '{}', got '{}'",
            INPUT_SHEET, sheet.sheet_name
        )));
    }

    let mut parsed = ParsedSheet::default();
    for (index, row) in sheet.rows.iter().enumerate().skip(1) {
        if is_blank(row) {
            continue;
        }
        parsed.total_rows += 1;
        match parse_row(index + 1, row) {
            Ok(input) => parsed.rows.push(input),
            Err(mut errors) => parsed.errors.append(&mut errors),
        }
    }
    Ok(parsed)
}

fn parse_row(row_number: usize, row: &[Value]) -> Result<InputRow, Vec<RowError>> {
    let mut errors = Vec::new();
    let mut fail = |field: &'static str, message: String| {
        errors.push(RowError {
            row_number,
            field,
            message,
        })
    };

    let date = |col: usize, field: &'static str, fail: &mut dyn FnMut(&'static str, String)| {
        parse_date(cell(row, col)).unwrap_or_else(|e| {
            fail(field, e);
            None
        })
    };
    let order_date = date(COL_ORDER_DATE, "order_date", &mut fail);
    let delivery_date = date(COL_DELIVERY_DATE, "delivery_date", &mut fail);

    let mut required = |col: usize, field: &'static str| {
        text(cell(row, col)).unwrap_or_else(|| {
            fail(field, format!("{} is required", field));
            String::new()
        })
    };
    let vendor_name = required(COL_VENDOR_NAME, "vendor_name");
    let project_name = required(COL_PROJECT_NAME, "project_name");
    let item_name = required(COL_ITEM_NAME, "item_name");

    let mut email = |col: usize, field: &'static str| {
        let value = text(cell(row, col))?;
        if is_valid_email(&value) {
            Some(value)
        } else {
            fail(field, format!("'{}' is not a valid email address", value));
            None
        }
    };
    let vendor_email = email(COL_VENDOR_EMAIL, "vendor_email");
    let delivery_email = email(COL_DELIVERY_EMAIL, "delivery_email");

    let mut number = |col: usize, field: &'static str| {
        parse_number(cell(row, col)).unwrap_or_else(|e| {
            fail(field, e);
            None
        })
    };
    let quantity = number(COL_QUANTITY, "quantity");
    let unit_price = number(COL_UNIT_PRICE, "unit_price");
    let total_amount = number(COL_TOTAL_AMOUNT, "total_amount");

    let quantity = match quantity {
        Some(q) if q > 0.0 => q,
        Some(q) => {
            fail("quantity", format!("quantity must be positive, got {}", q));
            0.0
        }
        None => {
            fail("quantity", "quantity is required".to_string());
            0.0
        }
    };
    let unit_price = unit_price.unwrap_or(0.0);
    if unit_price < 0.0 {
        fail("unit_price", format!("unit price cannot be negative, got {}", unit_price));
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(InputRow {
        row_number,
        order_date,
        delivery_date,
        vendor_name,
        vendor_email,
        delivery_name: text(cell(row, COL_DELIVERY_NAME)),
        delivery_email,
        project_name,
        major_category: text(cell(row, COL_MAJOR)),
        middle_category: text(cell(row, COL_MIDDLE)),
        minor_category: text(cell(row, COL_MINOR)),
        item_name,
        specification: text(cell(row, COL_SPECIFICATION)),
        quantity,
        unit_price,
        total_amount: total_amount
            .map(round_won)
            .unwrap_or_else(|| line_total(quantity, unit_price)),
        notes: text(cell(row, COL_NOTES)),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftItem {
    pub row_number: usize,
    pub item_name: String,
    pub specification: Option<String>,
    pub major_category: Option<String>,
    pub middle_category: Option<String>,
    pub minor_category: Option<String>,
    pub quantity: f64,
    pub unit_price: f64,
    pub total_amount: f64,
    pub notes: Option<String>,
}

/// One purchase order assembled from sheet rows sharing project, vendor and
/// order date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDraft {
    pub project_name: String,
    pub vendor_name: String,
    pub vendor_email: Option<String>,
    pub delivery_name: Option<String>,
    pub delivery_email: Option<String>,
    pub order_date: Option<NaiveDate>,
    pub delivery_date: Option<NaiveDate>,
    pub items: Vec<DraftItem>,
    pub total_amount: f64,
    pub notes: Option<String>,
}

pub fn group_orders(rows: &[InputRow]) -> Vec<OrderDraft> {
    let mut drafts: Vec<OrderDraft> = Vec::new();

    for row in rows {
        let item = DraftItem {
            row_number: row.row_number,
            item_name: row.item_name.clone(),
            specification: row.specification.clone(),
            major_category: row.major_category.clone(),
            middle_category: row.middle_category.clone(),
            minor_category: row.minor_category.clone(),
            quantity: row.quantity,
            unit_price: row.unit_price,
            total_amount: row.total_amount,
            notes: row.notes.clone(),
        };

        let existing = drafts.iter_mut().find(|d| {
            d.project_name == row.project_name
                && d.vendor_name == row.vendor_name
                && d.order_date == row.order_date
        });
        match existing {
            Some(draft) => {
                draft.total_amount = round_won(draft.total_amount + item.total_amount);
                draft.vendor_email = draft.vendor_email.take().or_else(|| row.vendor_email.clone());
                draft.delivery_date = draft.delivery_date.or(row.delivery_date);
                draft.items.push(item);
            }
            None => drafts.push(OrderDraft {
                project_name: row.project_name.clone(),
                vendor_name: row.vendor_name.clone(),
                vendor_email: row.vendor_email.clone(),
                delivery_name: row.delivery_name.clone(),
                delivery_email: row.delivery_email.clone(),
                order_date: row.order_date,
                delivery_date: row.delivery_date,
                total_amount: item.total_amount,
                notes: row.notes.clone(),
                items: vec![item],
            }),
        }
    }

    drafts
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn header() -> Vec<Value> {
        (0..16).map(|i| json!(format!("col{}", i))).collect()
    }

    fn row(vendor: &str, project: &str, item: &str, qty: Value, price: Value) -> Vec<Value> {
        vec![
            json!("2025-03-01"),
            json!(45726),
            json!(vendor),
            json!("sales@vendor.co.kr"),
            json!("현장사무소"),
            json!(""),
            json!(project),
            json!("철강재"),
            json!("철근"),
            json!("D10"),
            json!(item),
            json!("SD400"),
            qty,
            price,
            Value::Null,
            json!("오전 납품"),
        ]
    }

    fn sheet(rows: Vec<Vec<Value>>) -> SheetGrid {
        let mut all = vec![header()];
        all.extend(rows);
        SheetGrid {
            sheet_name: "Input".to_string(),
            rows: all,
        }
    }

    #[test]
    fn parses_cells_into_rows() {
        let parsed = parse_input_sheet(&sheet(vec![row(
            "대한철강",
            "송도 현장",
            "이형철근",
            json!("1,200"),
            json!(850.5),
        )]))
        .unwrap();

        assert!(parsed.is_valid());
        let r = &parsed.rows[0];
        assert_eq!(r.row_number, 2);
        assert_eq!(r.order_date, NaiveDate::from_ymd_opt(2025, 3, 1));
        assert_eq!(r.delivery_date, NaiveDate::from_ymd_opt(2025, 3, 10));
        assert_eq!(r.quantity, 1200.0);
        assert_eq!(r.total_amount, 1_020_600.0);
        assert_eq!(r.delivery_email, None);
        assert_eq!(r.minor_category.as_deref(), Some("D10"));
    }

    #[test]
    fn rejects_other_sheet_names() {
        let mut grid = sheet(vec![]);
        grid.sheet_name = "Sheet1".to_string();
        assert!(parse_input_sheet(&grid).is_err());
    }

    #[test]
    fn collects_row_errors_and_skips_blank_rows() {
        let mut bad = row("", "송도 현장", "철근", json!(0), json!(100));
        bad[3] = json!("not-an-email");
        let parsed = parse_input_sheet(&sheet(vec![
            vec![Value::Null, json!("  ")],
            bad,
            row("v", "p", "i", json!(1), json!(-5)),
        ]))
        .unwrap();

        assert_eq!(parsed.total_rows, 2);
        assert!(parsed.rows.is_empty());
        let fields: Vec<(usize, &str)> = parsed.errors.iter().map(|e| (e.row_number, e.field)).collect();
        assert_eq!(
            fields,
            vec![
                (3, "vendor_name"),
                (3, "vendor_email"),
                (3, "quantity"),
                (4, "unit_price"),
            ]
        );
    }

    #[test]
    fn date_formats() {
        for raw in ["2025-03-01", "2025.03.01", "2025/03/01", "2025.03.01."] {
            assert_eq!(
                parse_date(&json!(raw)).unwrap(),
                NaiveDate::from_ymd_opt(2025, 3, 1),
                "{raw}"
            );
        }
        assert_eq!(parse_date(&json!(45717)).unwrap(), NaiveDate::from_ymd_opt(2025, 3, 1));
        assert!(parse_date(&json!("next week")).is_err());
        assert_eq!(parse_date(&Value::Null).unwrap(), None);
    }

    #[test]
    fn serials_around_the_phantom_leap_day() {
        assert_eq!(parse_date(&json!(1)).unwrap(), NaiveDate::from_ymd_opt(1900, 1, 1));
        assert_eq!(parse_date(&json!(59)).unwrap(), NaiveDate::from_ymd_opt(1900, 2, 28));
        assert!(parse_date(&json!(60)).is_err());
        assert_eq!(parse_date(&json!(61)).unwrap(), NaiveDate::from_ymd_opt(1900, 3, 1));
        assert!(parse_date(&json!(0)).is_err());
    }

    #[test]
    fn numbers_must_be_finite() {
        assert_eq!(parse_number(&json!("1,200,000")).unwrap(), Some(1_200_000.0));
        assert_eq!(parse_number(&json!(3.5)).unwrap(), Some(3.5));
        for raw in ["NaN", "inf", "-infinity"] {
            let err = parse_number(&json!(raw)).unwrap_err();
            assert!(err.contains("is not a number"), "{raw}: {err}");
        }
    }

    #[test]
    fn nan_unit_price_marks_the_row_invalid() {
        let parsed = parse_input_sheet(&sheet(vec![row("v", "p", "i", json!(1), json!("NaN"))])).unwrap();
        assert!(!parsed.is_valid());
        assert!(parsed.rows.is_empty());
        assert_eq!(parsed.errors[0].field, "unit_price");
    }

    #[test]
    fn email_check() {
        assert!(is_valid_email("a@b.co"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("@b.co"));
        assert!(!is_valid_email("a b@c.co"));
    }

    #[test]
    fn groups_by_project_vendor_and_date() {
        let parsed = parse_input_sheet(&sheet(vec![
            row("대한철강", "송도", "철근", json!(10), json!(1000)),
            row("한빛전기", "송도", "전선", json!(5), json!(200)),
            row("대한철강", "송도", "철선", json!(2), json!(500)),
        ]))
        .unwrap();

        let drafts = group_orders(&parsed.rows);
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].vendor_name, "대한철강");
        assert_eq!(drafts[0].items.len(), 2);
        assert_eq!(drafts[0].items[1].row_number, 4);
        assert_eq!(drafts[0].total_amount, 11_000.0);
        assert_eq!(drafts[1].total_amount, 1_000.0);
    }
}
