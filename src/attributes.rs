// src/attributes.rs

use regex::Regex;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;
use tracing::info;

const ATTRIBUTE_HEADERS: [&str; 5] = ["attribute_name", "attribute", "attributes", "name", "field"];

static TRAILING_UNIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\(([^()]*)\)\s*$").expect("trailing unit pattern"));

/// Fixed part of the extraction instruction sent with every image.
const PROMPT_PREAMBLE: &str = r#"You read transformer nameplates.
Return ONLY one JSON object, no markdown fences, no commentary. Example:
{ "HIGH_SIDE_VOLTAGE_KV": 230, "PHASE": 3,
  "COOLING_TYPE": "ONAN / ONAF",
  "TAP_CHANGER": "OFF-CIRCUIT",
  "VECTOR_GROUP": "YNd1" }

Use "-" for any value that is not on the plate.
Never report BIL, lightning impulse or AC withstand figures as a voltage.

Also return the following attributes, keyed by their number:
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSpec {
    pub name: String,
    pub unit: Option<String>,
}

/// Ordered attribute list. Position `i` (0-based) answers to index key
/// `i + 1` in model responses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeList {
    specs: Vec<AttributeSpec>,
}

impl AttributeList {
    pub fn new(specs: Vec<AttributeSpec>) -> Self {
        Self { specs }
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            names
                .into_iter()
                .map(|n| AttributeSpec {
                    name: n.into(),
                    unit: None,
                })
                .collect(),
        )
    }

    /// Parse the attribute table. The first row is a header only if it
    /// names an attribute or unit column; otherwise the file is a bare
    /// list whose first column holds the names.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, csv::Error> {
        let mut csv = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut records = Vec::new();
        for record in csv.records() {
            let record = record?;
            records.push(
                record
                    .iter()
                    .map(|c| c.trim().trim_start_matches('\u{feff}').to_string())
                    .collect::<Vec<_>>(),
            );
        }

        let (name_col, unit_col, body) = match records.first() {
            Some(first) => {
                let lower: Vec<String> = first.iter().map(|c| c.to_lowercase()).collect();
                let name_col = ATTRIBUTE_HEADERS
                    .iter()
                    .find_map(|h| lower.iter().position(|c| c == h));
                let unit_col = lower
                    .iter()
                    .position(|c| c.contains("unit") || c.contains("uom"));
                if name_col.is_some() || unit_col.is_some() {
                    (name_col.unwrap_or(0), unit_col, &records[1..])
                } else {
                    (0, None, &records[..])
                }
            }
            None => (0, None, &records[..]),
        };

        let specs = body
            .iter()
            .filter_map(|row| {
                let name = row.get(name_col).filter(|n| !n.is_empty())?;
                let unit = unit_col
                    .and_then(|c| row.get(c))
                    .filter(|u| !u.is_empty())
                    .cloned();
                Some(AttributeSpec {
                    name: name.clone(),
                    unit,
                })
            })
            .collect();
        Ok(Self::new(specs))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| format!("Failed to open attribute list {}: {e}", path.display()))?;
        let list = Self::from_reader(file)?;
        info!(path = %path.display(), attributes = list.len(), "Attribute list loaded");
        Ok(list)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttributeSpec> {
        self.specs.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|s| s.name.as_str())
    }

    /// Label for a 1-based index.
    pub fn label_for(&self, index: usize) -> Option<&str> {
        index
            .checked_sub(1)
            .and_then(|i| self.specs.get(i))
            .map(|s| s.name.as_str())
    }

    /// Numeric keys within range map to their label; anything else is
    /// returned unchanged.
    pub fn resolve_key(&self, key: &str) -> String {
        key.trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| self.label_for(i))
            .unwrap_or(key)
            .to_string()
    }

    /// Unit of an attribute: the unit column if one was given, else a
    /// unit in trailing parentheses of the name.
    pub fn unit_of(&self, name: &str) -> Option<&str> {
        let spec = self.specs.iter().find(|s| s.name == name)?;
        spec.unit.as_deref().or_else(|| unit_in_name(&spec.name))
    }

    /// Instruction text for the vision model.
    pub fn build_prompt(&self) -> String {
        let mut prompt = PROMPT_PREAMBLE.to_string();
        for (i, spec) in self.specs.iter().enumerate() {
            prompt.push_str(&format!("{}: {}", i + 1, spec.name));
            if let Some(unit) = &spec.unit {
                prompt.push_str(&format!(" [{unit}]"));
            }
            prompt.push('\n');
        }
        prompt
    }
}

/// `Rated Power (kVA)` → `kVA`.
pub fn unit_in_name(name: &str) -> Option<&str> {
    TRAILING_UNIT_RE
        .captures(name)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .filter(|u| !u.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headerless_list() {
        let list = AttributeList::from_reader("MANUFACTURER\nHV RATED VOLTAGE (kV)\n\nVECTOR GROUP\n".as_bytes())
            .unwrap();
        assert_eq!(
            list.names().collect::<Vec<_>>(),
            ["MANUFACTURER", "HV RATED VOLTAGE (kV)", "VECTOR GROUP"]
        );
        assert_eq!(list.label_for(2), Some("HV RATED VOLTAGE (kV)"));
        assert_eq!(list.label_for(0), None);
        assert_eq!(list.label_for(4), None);
        assert_eq!(list.unit_of("HV RATED VOLTAGE (kV)"), Some("kV"));
        assert_eq!(list.unit_of("VECTOR GROUP"), None);
    }

    #[test]
    fn test_header_with_unit_column() {
        let data = "No,Attribute_Name,UOM\n1,RATED POWER,kVA\n2,PHASE,\n";
        let list = AttributeList::from_reader(data.as_bytes()).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.unit_of("RATED POWER"), Some("kVA"));
        assert_eq!(list.unit_of("PHASE"), None);
    }

    #[test]
    fn test_resolve_key() {
        let list = AttributeList::from_names(["MANUFACTURER", "PHASE"]);
        assert_eq!(list.resolve_key("2"), "PHASE");
        assert_eq!(list.resolve_key(" 1 "), "MANUFACTURER");
        assert_eq!(list.resolve_key("3"), "3");
        assert_eq!(list.resolve_key("COOLING_TYPE"), "COOLING_TYPE");
    }

    #[test]
    fn test_prompt_lists_indexed_attributes() {
        let list = AttributeList::new(vec![
            AttributeSpec {
                name: "MANUFACTURER".into(),
                unit: None,
            },
            AttributeSpec {
                name: "RATED POWER".into(),
                unit: Some("kVA".into()),
            },
        ]);
        let prompt = list.build_prompt();
        assert!(prompt.starts_with(PROMPT_PREAMBLE));
        assert!(prompt.ends_with("1: MANUFACTURER\n2: RATED POWER [kVA]\n"));
    }
}
