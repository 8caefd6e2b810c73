use super::code::ClassificationCode;
use super::{AttrValue, AttributeMap, Classifier, UNDETERMINED};
use crate::table::Table;
use serde::Serialize;
use tracing::{info, warn};

/// Columns that may carry the previously assigned code, in lookup order.
pub const CODE_COLUMNS: [&str; 2] = ["POWTR_CODE", "Classification"];
pub const IS_CORRECT_COLUMN: &str = "Is_Correct";
pub const EXPECTED_COLUMN: &str = "Correct_POWTR_CODE";
pub const SUGGESTED_COLUMN: &str = "Suggested";

const REPORT_COLUMNS: [&str; 3] = [IS_CORRECT_COLUMN, EXPECTED_COLUMN, SUGGESTED_COLUMN];

/// One audited code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub existing: String,
    pub expected: String,
    pub is_correct: bool,
    /// Set only when the existing code is wrong.
    pub suggested: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ValidationSummary {
    pub total: usize,
    pub correct: usize,
    pub incorrect: usize,
}

impl Classifier {
    /// Recompute the code for `attributes` and compare it with `existing`.
    /// A code that does not fit the grammar is wrong without comparison.
    pub fn validate(&self, existing: &str, attributes: &AttributeMap) -> ValidationResult {
        let existing = existing.trim();
        let expected = self.code_string(attributes);
        let well_formed = existing.parse::<ClassificationCode>().is_ok();
        let is_correct = well_formed && expected != UNDETERMINED && existing == expected;
        ValidationResult {
            existing: existing.to_string(),
            suggested: (!is_correct).then(|| expected.clone()),
            expected,
            is_correct,
        }
    }
}

/// Validate with the stock classifier defaults.
pub fn validate(existing: &str, attributes: &AttributeMap) -> ValidationResult {
    Classifier::default().validate(existing, attributes)
}

fn is_code_or_report_column(header: &str) -> bool {
    CODE_COLUMNS.contains(&header) || REPORT_COLUMNS.contains(&header)
}

/// Attribute map of one flattened table row: every non-empty cell outside
/// the code and report columns.
pub fn row_attributes(headers: &[String], row: &[String]) -> AttributeMap {
    headers
        .iter()
        .zip(row)
        .filter(|(h, cell)| !is_code_or_report_column(h) && !cell.trim().is_empty())
        .map(|(h, cell)| (h.as_str(), AttrValue::from_cell(cell)))
        .collect()
}

/// Audit every row of `table`. The report keeps the input columns, puts
/// `Is_Correct` and `Correct_POWTR_CODE` right after the code column and
/// appends `Suggested`, filled only for incorrect rows.
pub fn validate_table(table: &Table, classifier: &Classifier) -> (Table, ValidationSummary) {
    let code_col = CODE_COLUMNS.iter().find_map(|c| table.column(c));
    if code_col.is_none() {
        warn!(
            columns = ?CODE_COLUMNS,
            "No code column found; every row will be reported incorrect"
        );
    }

    let kept: Vec<usize> = (0..table.headers.len())
        .filter(|&i| !REPORT_COLUMNS.contains(&table.headers[i].as_str()))
        .collect();
    let insert_at = code_col
        .and_then(|c| kept.iter().position(|&i| i == c))
        .map_or(kept.len(), |p| p + 1);

    let mut headers: Vec<String> = kept.iter().map(|&i| table.headers[i].clone()).collect();
    headers.splice(
        insert_at..insert_at,
        [IS_CORRECT_COLUMN.to_string(), EXPECTED_COLUMN.to_string()],
    );
    headers.push(SUGGESTED_COLUMN.to_string());

    let mut report = Table::new(headers);
    let mut summary = ValidationSummary::default();

    for (idx, row) in table.rows.iter().enumerate() {
        let attributes = row_attributes(&table.headers, row);
        let existing = code_col.map_or("", |c| table.cell(idx, c));
        let result = classifier.validate(existing, &attributes);

        summary.total += 1;
        if result.is_correct {
            summary.correct += 1;
        } else {
            summary.incorrect += 1;
        }

        let mut out: Vec<String> = kept.iter().map(|&i| table.cell(idx, i).to_string()).collect();
        out.splice(
            insert_at..insert_at,
            [
                if result.is_correct { "True" } else { "False" }.to_string(),
                result.expected.clone(),
            ],
        );
        out.push(result.suggested.unwrap_or_default());
        report.push_row(out);
    }

    info!(
        total = summary.total,
        correct = summary.correct,
        incorrect = summary.incorrect,
        "Validation summary"
    );
    (report, summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heuristics::derive_code;

    fn map(pairs: &[(&str, &str)]) -> AttributeMap {
        pairs
            .iter()
            .map(|(k, v)| (*k, AttrValue::from_cell(v)))
            .collect()
    }

    #[test]
    fn test_validation_is_idempotent() {
        let samples = [
            map(&[("HIGH_SIDE_VOLTAGE", "230 kV"), ("COOLING_TYPE", "ONAN"), ("TAP_CHANGER", "OLTC")]),
            map(&[("VOLTAGE", "800 kV")]),
            map(&[("HV", "400 V"), ("TYPE", "cast resin"), ("TAPPING", "no tap")]),
            AttributeMap::new(),
        ];
        for attrs in &samples {
            let code = derive_code(attrs).to_string();
            let result = validate(&code, attrs);
            assert!(result.is_correct, "{code} should validate");
            assert_eq!(result.expected, code);
            assert_eq!(result.suggested, None);
        }
    }

    #[test]
    fn test_wrong_code_gets_suggestion() {
        let attrs = map(&[("HV_RATED_VOLTAGE", "115 kV"), ("COOLING", "ONAN")]);
        let result = validate("POWTR-3MOF", &attrs);
        assert!(!result.is_correct);
        assert_eq!(result.expected, "POWTR-3HOF");
        assert_eq!(result.suggested.as_deref(), Some("POWTR-3HOF"));
    }

    #[test]
    fn test_malformed_code_fails_grammar() {
        let attrs = map(&[("HV_RATED_VOLTAGE", "115 kV")]);
        for bad in ["", "POWTR-3HX", "POWTR-9HOF", "3HOF", "POWTR-3HOFF"] {
            let result = validate(bad, &attrs);
            assert!(!result.is_correct);
            assert_eq!(result.suggested.as_deref(), Some("POWTR-3HOF"));
        }
        assert!(validate("  POWTR-3HOF ", &attrs).is_correct);
    }

    #[test]
    fn test_row_attributes_skip_code_and_blank_cells() {
        let headers: Vec<String> = ["Location", "Classification", "HV Voltage (kV)", "Is_Correct", "Cooling"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let row: Vec<String> = ["TR-01", "POWTR-3HOF", "115", "True", ""]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let attrs = row_attributes(&headers, &row);
        let keys: Vec<&str> = attrs.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["Location", "HV Voltage (kV)"]);
    }

    #[test]
    fn test_bulk_report_columns() {
        let mut table = Table::new(
            ["Location", "Classification", "HV Voltage (kV)", "Cooling", "OLTC"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        table.push_row(["TR-01", "POWTR-3HOO", "115", "ONAN", "OLTC"].iter().map(|s| s.to_string()).collect());
        table.push_row(["TR-02", "POWTR-3EOF", "22", "ONAN", "-"].iter().map(|s| s.to_string()).collect());
        table.push_row(["TR-03", "garbage", "", "", ""].iter().map(|s| s.to_string()).collect());

        let (report, summary) = validate_table(&table, &Classifier::default());
        assert_eq!(
            summary,
            ValidationSummary { total: 3, correct: 1, incorrect: 2 }
        );
        assert_eq!(
            report.headers,
            [
                "Location",
                "Classification",
                "Is_Correct",
                "Correct_POWTR_CODE",
                "HV Voltage (kV)",
                "Cooling",
                "OLTC",
                "Suggested"
            ]
        );
        assert_eq!(report.rows.len(), 3);
        assert_eq!(report.rows[0][2], "True");
        assert_eq!(report.rows[0][7], "");
        assert_eq!(report.rows[1][2], "False");
        assert_eq!(report.rows[1][3], "POWTR-3MOF");
        assert_eq!(report.rows[1][7], "POWTR-3MOF");
        assert_eq!(report.rows[2][7], "POWTR-3-OF");
    }

    #[test]
    fn test_bulk_replaces_previous_report_columns() {
        let mut table = Table::new(
            ["POWTR_CODE", "Is_Correct", "Correct_POWTR_CODE", "VOLTAGE"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        table.push_row(["POWTR-3MOF", "False", "POWTR-3HOF", "11 kV"].iter().map(|s| s.to_string()).collect());

        let (report, summary) = validate_table(&table, &Classifier::default());
        assert_eq!(summary.correct, 1);
        assert_eq!(
            report.headers,
            ["POWTR_CODE", "Is_Correct", "Correct_POWTR_CODE", "VOLTAGE", "Suggested"]
        );
        assert_eq!(report.rows[0], ["POWTR-3MOF", "True", "POWTR-3MOF", "11 kV", ""]);
    }
}
