// src/loader.rs

use crate::attributes::{AttributeList, unit_in_name};
use crate::heuristics::{
    AttrValue, CODE_COLUMNS, EXPECTED_COLUMN, IS_CORRECT_COLUMN, SUGGESTED_COLUMN, UNDETERMINED,
};
use crate::table::Table;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{info, warn};

pub const LOADER_HEADERS: [&str; 6] = [
    "ASSETNUM",
    "SITEID",
    "HIERARCHYPATH",
    "ATTRIBUTE",
    "VALUE",
    "MEASUREUNIT",
];

const LOCATION_COLUMN: &str = "Location";
const PLANT_COLUMN: &str = "Plant";

static VALUE_UNIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?P<num>[-+]?\d{1,3}(?:[ ,]\d{3})+(?:\.\d+)?|[-+]?\d+(?:\.\d+)?)\s*(?P<unit>[^\d\s/,;][^/,;]*?)?\s*$")
        .expect("value/unit pattern")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderRow {
    pub asset_num: String,
    pub site_id: String,
    pub hierarchy_path: String,
    pub attribute: String,
    pub value: String,
    pub measure_unit: String,
}

/// `"22 kV"` → `("22", "kV")`; `"1,000 kVA"` → `("1000", "kVA")`. Text that
/// is not a single number with an optional unit comes back whole.
pub fn split_value_unit(value: &str) -> (String, String) {
    match VALUE_UNIT_RE.captures(value) {
        Some(caps) => {
            let num: String = caps["num"].chars().filter(|c| *c != ' ' && *c != ',').collect();
            let unit = caps.name("unit").map_or("", |m| m.as_str().trim());
            (num, unit.to_string())
        }
        None => (value.trim().to_string(), String::new()),
    }
}

/// First three characters of the plant code plus `0`, e.g. `BKK1` → `BKK0`.
pub fn site_id(plant: &str, default_site: &str) -> String {
    let plant = plant.trim();
    if plant.chars().count() < 3 {
        return default_site.to_string();
    }
    let mut site: String = plant.chars().take(3).collect::<String>().to_uppercase();
    site.push('0');
    site
}

pub fn hierarchy_path(code: &str) -> String {
    format!("POWTR \\ {code}")
}

/// Placeholders and values that merely repeat the attribute name are empty.
fn loadable_value<'a>(value: &'a str, attribute: &str) -> Option<&'a str> {
    let value = value.trim();
    if AttrValue::from_cell(value).is_missing() || value.eq_ignore_ascii_case(attribute.trim()) {
        None
    } else {
        Some(value)
    }
}

fn is_true(cell: &str) -> bool {
    matches!(
        cell.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "y"
    )
}

/// One loader row per attribute for every accepted report row. Attributes
/// come from `attributes` when given, else from the report's own columns.
pub fn build_loader_rows(
    report: &Table,
    attributes: Option<&AttributeList>,
    default_site: &str,
) -> Vec<LoaderRow> {
    let location_col = report.column_ignore_case(LOCATION_COLUMN);
    let plant_col = report.column_ignore_case(PLANT_COLUMN);
    let correct_col = report.column(IS_CORRECT_COLUMN);
    let expected_col = report.column(EXPECTED_COLUMN);
    let code_col = CODE_COLUMNS.iter().find_map(|c| report.column(c));

    let names: Vec<(String, Option<String>)> = match attributes {
        Some(list) => list
            .iter()
            .map(|s| (s.name.clone(), s.unit.clone()))
            .collect(),
        None => report
            .headers
            .iter()
            .enumerate()
            .filter(|(i, _)| {
                ![location_col, plant_col, correct_col, expected_col, code_col].contains(&Some(*i))
                    && report.headers[*i] != SUGGESTED_COLUMN
            })
            .map(|(_, h)| (h.clone(), None))
            .collect(),
    };

    let mut rows = Vec::new();
    let mut skipped = 0usize;

    for idx in 0..report.len() {
        if correct_col.is_some_and(|c| !is_true(report.cell(idx, c))) {
            skipped += 1;
            continue;
        }

        let asset = location_col.map_or("", |c| report.cell(idx, c)).trim();
        if asset.is_empty() {
            warn!(row = idx + 1, "Row has no Location; skipped");
            skipped += 1;
            continue;
        }

        let code = expected_col
            .map(|c| report.cell(idx, c).trim())
            .filter(|c| !c.is_empty())
            .or_else(|| code_col.map(|c| report.cell(idx, c).trim()))
            .unwrap_or("");
        if code.is_empty() || code == UNDETERMINED {
            warn!(row = idx + 1, asset, "Row has no usable code; skipped");
            skipped += 1;
            continue;
        }

        let site = site_id(plant_col.map_or("", |c| report.cell(idx, c)), default_site);
        let path = hierarchy_path(code);

        for (name, listed_unit) in &names {
            let raw = report.column(name).map_or("", |c| report.cell(idx, c));
            let (value, measure_unit) = match loadable_value(raw, name) {
                Some(v) => {
                    let (num, split_unit) = split_value_unit(v);
                    let unit = unit_in_name(name)
                        .map(str::to_string)
                        .or_else(|| listed_unit.clone())
                        .unwrap_or(split_unit);
                    (num, unit)
                }
                None => (
                    String::new(),
                    unit_in_name(name)
                        .map(str::to_string)
                        .or_else(|| listed_unit.clone())
                        .unwrap_or_default(),
                ),
            };
            rows.push(LoaderRow {
                asset_num: asset.to_string(),
                site_id: site.clone(),
                hierarchy_path: path.clone(),
                attribute: name.clone(),
                value,
                measure_unit,
            });
        }
    }

    info!(
        rows = rows.len(),
        assets = report.len() - skipped,
        skipped,
        "Loader rows built"
    );
    rows
}

pub fn loader_table(rows: &[LoaderRow]) -> Table {
    let mut table = Table::new(LOADER_HEADERS.iter().map(|h| h.to_string()).collect());
    for row in rows {
        table.push_row(vec![
            row.asset_num.clone(),
            row.site_id.clone(),
            row.hierarchy_path.clone(),
            row.attribute.clone(),
            row.value.clone(),
            row.measure_unit.clone(),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    fn pair(a: &str, b: &str) -> (String, String) {
        (a.to_string(), b.to_string())
    }

    #[test]
    fn test_split_value_unit() {
        assert_eq!(split_value_unit("22 kV"), pair("22", "kV"));
        assert_eq!(split_value_unit("1,000 kVA"), pair("1000", "kVA"));
        assert_eq!(split_value_unit("6.5%"), pair("6.5", "%"));
        assert_eq!(split_value_unit("3"), pair("3", ""));
        assert_eq!(split_value_unit("YNd1"), pair("YNd1", ""));
        assert_eq!(split_value_unit("22/0.4 kV"), pair("22/0.4 kV", ""));
        assert_eq!(split_value_unit(" ONAN "), pair("ONAN", ""));
    }

    #[test]
    fn test_site_id() {
        assert_eq!(site_id("bkk1", "SBK0"), "BKK0");
        assert_eq!(site_id(" CNX ", "SBK0"), "CNX0");
        assert_eq!(site_id("B1", "SBK0"), "SBK0");
        assert_eq!(site_id("", "SBK0"), "SBK0");
    }

    #[test]
    fn test_hierarchy_path() {
        assert_eq!(hierarchy_path("POWTR-3HOO"), "POWTR \\ POWTR-3HOO");
    }

    #[test]
    fn test_rows_from_validation_report() {
        let mut report = Table::new(strings(&[
            "Location",
            "Plant",
            "Classification",
            "Is_Correct",
            "Correct_POWTR_CODE",
            "HV RATED VOLTAGE (kV)",
            "RATED POWER",
            "VECTOR GROUP",
            "Suggested",
        ]));
        report.push_row(strings(&[
            "TR-01", "BKK1", "POWTR-3HOO", "True", "POWTR-3HOO", "115", "50,000 kVA", "-", "",
        ]));
        report.push_row(strings(&[
            "TR-02", "CNX2", "POWTR-3EOF", "False", "POWTR-3MOF", "22", "-", "Dyn11", "POWTR-3MOF",
        ]));
        report.push_row(strings(&["", "BKK1", "POWTR-3HOO", "True", "POWTR-3HOO", "", "", "", ""]));

        let list = AttributeList::from_names(["HV RATED VOLTAGE (kV)", "RATED POWER", "VECTOR GROUP"]);
        let rows = build_loader_rows(&report, Some(&list), "SBK0");

        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.asset_num == "TR-01"));
        assert!(rows.iter().all(|r| r.site_id == "BKK0"));
        assert!(rows.iter().all(|r| r.hierarchy_path == "POWTR \\ POWTR-3HOO"));

        assert_eq!((rows[0].value.as_str(), rows[0].measure_unit.as_str()), ("115", "kV"));
        assert_eq!((rows[1].value.as_str(), rows[1].measure_unit.as_str()), ("50000", "kVA"));
        assert_eq!((rows[2].value.as_str(), rows[2].measure_unit.as_str()), ("", ""));
    }

    #[test]
    fn test_rows_without_report_columns_use_table_columns() {
        let mut table = Table::new(strings(&["Location", "POWTR_CODE", "COOLING", "PHASE"]));
        table.push_row(strings(&["TR-09", "POWTR-1MOF", "COOLING", "1"]));

        let rows = build_loader_rows(&table, None, "SBK0");
        let attrs: Vec<&str> = rows.iter().map(|r| r.attribute.as_str()).collect();
        assert_eq!(attrs, ["COOLING", "PHASE"]);
        assert_eq!(rows[0].value, "");
        assert_eq!(rows[1].value, "1");
        assert_eq!(rows[1].site_id, "SBK0");
        assert_eq!(rows[1].hierarchy_path, "POWTR \\ POWTR-1MOF");

        let out = loader_table(&rows);
        assert_eq!(out.headers, LOADER_HEADERS);
        assert_eq!(out.rows[1], ["TR-09", "SBK0", "POWTR \\ POWTR-1MOF", "PHASE", "1", ""]);
    }
}
