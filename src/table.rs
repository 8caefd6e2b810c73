// src/table.rs

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::info;

/// A header row plus string cells, as read from or written to CSV.
/// Rows may be shorter than the header; missing cells read as empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: Vec<String>) -> Self {
        Self {
            headers,
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    /// Index of the first column named `name`, compared after trimming.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.trim() == name)
    }

    /// Like [`Table::column`] but ignoring ASCII case.
    pub fn column_ignore_case(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|h| h.trim().eq_ignore_ascii_case(name))
    }

    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map_or("", String::as_str)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Parse CSV with a header row. Ragged rows are accepted.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, csv::Error> {
        let mut csv = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers = csv
            .headers()?
            .iter()
            .enumerate()
            .map(|(i, h)| {
                let h = if i == 0 { h.trim_start_matches('\u{feff}') } else { h };
                h.trim().to_string()
            })
            .collect();

        let mut table = Table::new(headers);
        for record in csv.records() {
            let record = record?;
            if record.iter().all(|c| c.trim().is_empty()) {
                continue;
            }
            table.push_row(record.iter().map(str::to_string).collect());
        }
        Ok(table)
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut csv = csv::WriterBuilder::new().flexible(true).from_writer(writer);
        csv.write_record(&self.headers)?;
        for row in &self.rows {
            csv.write_record(row)?;
        }
        csv.flush()?;
        Ok(())
    }

    pub fn read_csv(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| format!("Failed to open {}: {e}", path.display()))?;
        let table = Self::from_reader(file)
            .map_err(|e| format!("Failed to parse {}: {e}", path.display()))?;
        info!(path = %path.display(), rows = table.len(), columns = table.headers.len(), "Table loaded");
        Ok(table)
    }

    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        self.to_writer(File::create(path)?)?;
        info!(path = %path.display(), rows = self.len(), "Table written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_ragged_rows_and_bom() {
        let data = "\u{feff}Location, Plant ,Classification\nTR-01,BKK1,POWTR-3HOO\nTR-02,CNX2\n,,\n";
        let table = Table::from_reader(data.as_bytes()).unwrap();
        assert_eq!(table.headers, ["Location", "Plant", "Classification"]);
        assert_eq!(table.len(), 2);
        assert_eq!(table.cell(1, 1), "CNX2");
        assert_eq!(table.cell(1, 2), "");
        assert_eq!(table.cell(9, 0), "");
        assert_eq!(table.column("Plant"), Some(1));
        assert_eq!(table.column_ignore_case("classification"), Some(2));
        assert_eq!(table.column("classification"), None);
    }

    #[test]
    fn test_write_quotes_embedded_commas() {
        let mut table = Table::new(vec!["FILE".into(), "VALUE".into()]);
        table.push_row(vec!["a.jpg".into(), "11,000 V".into()]);
        let mut out = Vec::new();
        table.to_writer(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "FILE,VALUE\na.jpg,\"11,000 V\"\n");
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("report.csv");
        let mut table = Table::new(vec!["A".into(), "B".into()]);
        table.push_row(vec!["1".into(), "two words".into()]);
        table.write_csv(&path).unwrap();
        assert_eq!(Table::read_csv(&path).unwrap(), table);
    }
}
