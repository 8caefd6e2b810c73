// src/heuristics/mod.rs

mod classify;
mod code;
mod validate;
mod voltage;

pub use classify::{
    ClassifierDefaults, classify_insulation, classify_phase, classify_tap_changer,
};
pub use code::{
    ClassificationCode, CodeParseError, EXTRA_HIGH_CEILING_KV, Insulation, OVER_RANGE_CODE,
    Phase, TapChanger, VoltageBand, assemble_code,
};
pub use validate::{
    CODE_COLUMNS, IS_CORRECT_COLUMN, SUGGESTED_COLUMN, EXPECTED_COLUMN, ValidationResult,
    ValidationSummary, row_attributes, validate, validate_table,
};
pub use voltage::{
    VOLTAGE_KEY_TOKENS, VoltageCandidate, VoltageReading, VoltageSource, backfill_voltage,
    high_side_line, infer_high_side, is_voltage_key, scan_voltage_candidates, scan_voltage_kv,
    scan_voltage_kv_over_map,
};

use indexmap::IndexMap;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use tracing::error;

/// Key under which the derived code is merged back into an attribute map.
pub const CODE_KEY: &str = "POWTR_CODE";

/// Recorded instead of a code when derivation itself fails.
pub const UNDETERMINED: &str = "Cannot be determined";

/// A raw attribute value as read off a nameplate.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Number(f64),
    /// `null`, empty, or the `-` placeholder.
    Missing,
}

impl AttrValue {
    /// Interpret a cell or model string, folding placeholders into `Missing`.
    pub fn from_cell(raw: &str) -> Self {
        match raw.trim() {
            "" | "-" | "—" | "–" => AttrValue::Missing,
            _ => AttrValue::Text(raw.to_string()),
        }
    }

    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => AttrValue::Missing,
            Value::String(s) => Self::from_cell(s),
            Value::Number(n) => n.as_f64().map_or(AttrValue::Missing, AttrValue::Number),
            Value::Bool(b) => AttrValue::Text(b.to_string()),
            other => AttrValue::Text(other.to_string()),
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, AttrValue::Missing)
    }

    /// Text form of a present value; `None` for missing.
    pub fn text(&self) -> Option<Cow<'_, str>> {
        match self {
            AttrValue::Text(s) => Some(Cow::Borrowed(s.as_str())),
            AttrValue::Number(n) => Some(Cow::Owned(format_number(*n))),
            AttrValue::Missing => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            AttrValue::Text(s) => Value::String(s.clone()),
            AttrValue::Number(n) => serde_json::Number::from_f64(*n)
                .map_or_else(|| Value::String(format_number(*n)), Value::Number),
            AttrValue::Missing => Value::String("-".to_string()),
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Text(s) => f.write_str(s),
            AttrValue::Number(n) => f.write_str(&format_number(*n)),
            AttrValue::Missing => f.write_str("-"),
        }
    }
}

/// Whole numbers print without a trailing `.0` (a phase of `3.0` reads as `3`).
fn format_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Ordered attribute-name → value map for one nameplate or one table row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeMap {
    entries: IndexMap<String, AttrValue>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a model's JSON object. `resolve` maps numeric index keys
    /// to attribute labels; other keys pass through unchanged.
    pub fn from_json_object<F>(obj: &Map<String, Value>, resolve: F) -> Self
    where
        F: Fn(&str) -> String,
    {
        let mut map = Self::new();
        for (key, value) in obj {
            map.insert(resolve(key.trim()), AttrValue::from_json(value));
        }
        map
    }

    /// Insert a value. A missing value never replaces a present one, so an
    /// index key and its label arriving together keep the informative side.
    pub fn insert(&mut self, key: impl Into<String>, value: AttrValue) {
        let key = key.into();
        if value.is_missing() && self.entries.get(&key).is_some_and(|v| !v.is_missing()) {
            return;
        }
        self.entries.insert(key, value);
    }

    /// Overwrite a value unconditionally.
    pub fn set(&mut self, key: impl Into<String>, value: AttrValue) {
        self.entries.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Entries with a present value, as text.
    pub fn present(&self) -> impl Iterator<Item = (&str, Cow<'_, str>)> {
        self.entries
            .iter()
            .filter_map(|(k, v)| v.text().map(|t| (k.as_str(), t)))
    }

    /// The merged-in code, if one is present and non-empty.
    pub fn code(&self) -> Option<String> {
        self.get(CODE_KEY)
            .and_then(|v| v.text())
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    }

    /// Write `code` under `POWTR_CODE` unless a code is already there.
    /// Returns the code the map carries afterwards.
    pub fn ensure_code(&mut self, code: &str) -> String {
        match self.code() {
            Some(existing) => existing,
            None => {
                self.set(CODE_KEY, AttrValue::Text(code.to_string()));
                code.to_string()
            }
        }
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl<K: Into<String>> FromIterator<(K, AttrValue)> for AttributeMap {
    fn from_iter<I: IntoIterator<Item = (K, AttrValue)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/// Uppercase alphanumeric tokens of an attribute name (`HV_Rated Voltage` →
/// `HV`, `RATED`, `VOLTAGE`).
pub(crate) fn key_tokens(key: &str) -> Vec<String> {
    key.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_uppercase)
        .collect()
}

/// Everything one derivation produced, kept for logging and the store.
#[derive(Debug, Clone)]
pub struct Derivation {
    pub code: ClassificationCode,
    pub phase: Phase,
    pub band: VoltageBand,
    pub insulation: Insulation,
    pub tap: TapChanger,
    pub voltage: VoltageReading,
}

/// The code-derivation pipeline with its fallback defaults fixed.
#[derive(Debug, Clone, Copy, Default)]
pub struct Classifier {
    defaults: ClassifierDefaults,
}

impl Classifier {
    pub fn new(defaults: ClassifierDefaults) -> Self {
        Self { defaults }
    }

    pub fn derive(&self, map: &AttributeMap) -> Derivation {
        let voltage = infer_high_side(map);
        let phase = classify_phase(map);
        let band = VoltageBand::from_kv(voltage.kv);
        let insulation = classify_insulation(map, self.defaults.insulation);
        let tap = classify_tap_changer(map, self.defaults.tap);
        let code = assemble_code(phase, band, insulation, tap, voltage.kv);
        Derivation {
            code,
            phase,
            band,
            insulation,
            tap,
            voltage,
        }
    }

    pub fn code(&self, map: &AttributeMap) -> ClassificationCode {
        self.derive(map).code
    }

    /// The code as text, or [`UNDETERMINED`] if derivation panics.
    pub fn code_string(&self, map: &AttributeMap) -> String {
        match panic::catch_unwind(AssertUnwindSafe(|| self.code(map))) {
            Ok(code) => code.to_string(),
            Err(_) => {
                error!(attributes = map.len(), "Code derivation failed");
                UNDETERMINED.to_string()
            }
        }
    }
}

/// Derive the code for `map` with the stock defaults.
pub fn derive_code(map: &AttributeMap) -> ClassificationCode {
    Classifier::default().code(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> AttributeMap {
        pairs
            .iter()
            .map(|(k, v)| (*k, AttrValue::from_cell(v)))
            .collect()
    }

    #[test]
    fn test_high_side_scenario() {
        let attrs = map(&[
            ("HIGH_SIDE_VOLTAGE", "230 kV"),
            ("COOLING_TYPE", "ONAN"),
            ("TAP_CHANGER", "OLTC"),
        ]);
        assert_eq!(derive_code(&attrs).to_string(), "POWTR-3HOO");
    }

    #[test]
    fn test_volts_converted_and_dry_type() {
        let attrs = map(&[("VOLTAGE", "525000 V"), ("TYPE", "DRY")]);
        assert_eq!(derive_code(&attrs).to_string(), "POWTR-3EDF");
    }

    #[test]
    fn test_ratio_ratings_band_on_the_high_side() {
        let attrs = map(&[("RATED_VOLTAGE", "115/22 kV")]);
        assert_eq!(derive_code(&attrs).to_string(), "POWTR-3HOF");

        let attrs = map(&[("VOLTAGE RATIO", "22000/400 V")]);
        assert_eq!(derive_code(&attrs).to_string(), "POWTR-3MOF");
    }

    #[test]
    fn test_frequency_does_not_set_the_band() {
        let mut attrs = map(&[("VOLTAGE", "400 V"), ("TYPE", "DRY")]);
        attrs.insert("RATED_FREQUENCY", AttrValue::Number(50.0));
        assert_eq!(derive_code(&attrs).to_string(), "POWTR-3LDF");
    }

    #[test]
    fn test_over_range_override() {
        let attrs = map(&[("VOLTAGE", "800 kV")]);
        assert_eq!(derive_code(&attrs).to_string(), "POWTR-3-OO");
    }

    #[test]
    fn test_empty_map_uses_defaults() {
        assert_eq!(derive_code(&AttributeMap::new()).to_string(), "POWTR-3-OF");
        let placeholders = map(&[("HV_RATED_VOLTAGE", "-"), ("COOLING", "")]);
        assert_eq!(derive_code(&placeholders).to_string(), "POWTR-3-OF");
    }

    #[test]
    fn test_configured_defaults() {
        let classifier = Classifier::new(ClassifierDefaults {
            insulation: Insulation::Unknown,
            tap: TapChanger::NoTap,
        });
        assert_eq!(classifier.code(&AttributeMap::new()).to_string(), "POWTR-3--N");
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let attrs = map(&[
            ("1", "ABB"),
            ("HV_RATED_VOLTAGE", "115000 V"),
            ("LV_RATED_VOLTAGE", "22000 V"),
            ("RATED_POWER", "50000 kVA"),
            ("TYPE_OF_TRANSFORMER", "Oil immersed, on-load tap changer"),
        ]);
        let first = derive_code(&attrs).to_string();
        let second = derive_code(&attrs.clone()).to_string();
        assert_eq!(first, second);
        assert_eq!(first, "POWTR-3HOO");
    }

    #[test]
    fn test_single_phase_pole_mount() {
        let attrs = map(&[
            ("DESCRIPTION", "1-PH pole mounted"),
            ("PRIMARY VOLTAGE", "22 kV"),
            ("SECONDARY VOLTAGE", "230 V"),
            ("COOLING", "ONAN"),
        ]);
        assert_eq!(derive_code(&attrs).to_string(), "POWTR-1MOF");
    }

    #[test]
    fn test_ensure_code_preserves_existing() {
        let mut attrs = map(&[("VOLTAGE", "11 kV")]);
        assert_eq!(attrs.ensure_code("POWTR-3MOF"), "POWTR-3MOF");
        assert_eq!(attrs.ensure_code("POWTR-3HOO"), "POWTR-3MOF");
        assert_eq!(attrs.code().as_deref(), Some("POWTR-3MOF"));

        let mut placeholder = map(&[(CODE_KEY, "-")]);
        assert_eq!(placeholder.ensure_code("POWTR-3MOF"), "POWTR-3MOF");
    }

    #[test]
    fn test_json_values_and_index_resolution() {
        let raw: Value = serde_json::json!({
            "2": "230 kV",
            "PHASE": 3.0,
            "NOTES": null,
            "FLAGS": ["a", "b"],
        });
        let obj = raw.as_object().unwrap();
        let attrs = AttributeMap::from_json_object(obj, |k| {
            if k == "2" { "HV_RATED_VOLTAGE".to_string() } else { k.to_string() }
        });
        assert_eq!(
            attrs.get("HV_RATED_VOLTAGE"),
            Some(&AttrValue::Text("230 kV".to_string()))
        );
        assert_eq!(attrs.get("PHASE").unwrap().to_string(), "3");
        assert!(attrs.get("NOTES").unwrap().is_missing());
        assert_eq!(attrs.get("FLAGS").unwrap().to_string(), r#"["a","b"]"#);
        let keys: Vec<&str> = attrs.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["HV_RATED_VOLTAGE", "PHASE", "NOTES", "FLAGS"]);
    }

    #[test]
    fn test_missing_does_not_clobber_present() {
        let mut attrs = AttributeMap::new();
        attrs.insert("HV", AttrValue::from_cell("22 kV"));
        attrs.insert("HV", AttrValue::Missing);
        assert_eq!(attrs.get("HV").unwrap().to_string(), "22 kV");
    }

    #[test]
    fn test_code_string_matches_code() {
        let attrs = map(&[("HV", "33 kV"), ("TYPE", "dry")]);
        let classifier = Classifier::default();
        assert_eq!(classifier.code_string(&attrs), classifier.code(&attrs).to_string());
        assert_eq!(classifier.code_string(&attrs), "POWTR-3MDF");
    }

    #[test]
    fn test_key_tokens() {
        assert_eq!(key_tokens("HV_Rated Voltage (kV)"), ["HV", "RATED", "VOLTAGE", "KV"]);
    }
}
