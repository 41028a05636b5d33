use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::{Map, Value};

use crate::error::BrokerError;
use crate::nested::NestedObjectBuilder;

/// A named grid of optional cells. Row 0 is the header row for multi-row sheets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<Option<String>>>,
}

impl Sheet {
    pub fn new(name: impl Into<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }

    /// Convenience constructor used by callers holding plain strings; empty cells are absent.
    pub fn from_strings(name: impl Into<String>, rows: &[&[&str]]) -> Self {
        let rows = rows
            .iter()
            .map(|row| row.iter().map(|cell| normalize_cell(cell)).collect())
            .collect();
        Self::new(name, rows)
    }

    /// One record per data row, keyed by the dotted headers in row 0. Blank rows are skipped.
    pub fn records(
        &self,
        builder: &NestedObjectBuilder,
    ) -> Result<Vec<Map<String, Value>>, BrokerError> {
        let Some((header, data)) = self.rows.split_first() else {
            return Ok(Vec::new());
        };

        let mut records = Vec::new();
        for (row_index, row) in data.iter().enumerate() {
            if row.iter().all(Option::is_none) {
                continue;
            }
            let mut cells = Vec::with_capacity(row.len());
            for (column, cell) in row.iter().enumerate() {
                let Some(cell) = cell.as_deref() else {
                    continue;
                };
                let key = header
                    .get(column)
                    .and_then(|key| key.as_deref())
                    .ok_or_else(|| {
                        BrokerError::Validation(format!(
                            "sheet {} row {} column {} has a value but no header",
                            self.name,
                            row_index + 2,
                            column + 1
                        ))
                    })?;
                cells.push((key, Some(cell)));
            }
            let record = builder.build_row(cells)?;
            tracing::debug!(sheet = %self.name, fields = record.len(), "row read");
            records.push(record);
        }
        Ok(records)
    }

    /// A single record laid out vertically: property in column 0, value in column 1.
    pub fn vertical_record(
        &self,
        builder: &NestedObjectBuilder,
    ) -> Result<Map<String, Value>, BrokerError> {
        let mut record = Map::new();
        for row in &self.rows {
            let (Some(Some(key)), Some(Some(value))) = (row.first(), row.get(1)) else {
                continue;
            };
            record = builder.insert(record, key, Value::String(value.clone()))?;
        }
        Ok(record)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workbook {
    sheets: Vec<Sheet>,
}

impl Workbook {
    pub fn new(sheets: Vec<Sheet>) -> Self {
        Self { sheets }
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|sheet| sheet.name == name)
    }

    pub fn sheet_names(&self) -> impl Iterator<Item = &str> {
        self.sheets.iter().map(|sheet| sheet.name.as_str())
    }

    /// Reads every `*.tsv` file in `dir` as one sheet named after the file stem.
    pub fn from_tsv_dir(dir: &Utf8Path) -> Result<Self, BrokerError> {
        let entries = fs::read_dir(dir.as_std_path())
            .map_err(|err| BrokerError::Filesystem(format!("read {dir}: {err}")))?;
        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| BrokerError::Filesystem(err.to_string()))?;
            let path = Utf8PathBuf::from_path_buf(entry.path())
                .map_err(|_| BrokerError::Filesystem("non-utf8 sheet path".to_string()))?;
            if path.extension() == Some("tsv") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut sheets = Vec::with_capacity(paths.len());
        for path in paths {
            let Some(name) = path.file_stem() else {
                continue;
            };
            sheets.push(read_tsv_sheet(name, &path)?);
        }
        Ok(Self { sheets })
    }
}

fn read_tsv_sheet(name: &str, path: &Utf8Path) -> Result<Sheet, BrokerError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_path(path.as_std_path())
        .map_err(|err| BrokerError::Filesystem(format!("open {path}: {err}")))?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| BrokerError::Filesystem(format!("{path}: {err}")))?;
        rows.push(record.iter().map(normalize_cell).collect());
    }
    Ok(Sheet::new(name, rows))
}

fn normalize_cell(cell: &str) -> Option<String> {
    let trimmed = cell.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn multi_row_sheet_skips_blank_rows() {
        let sheet = Sheet::from_strings(
            "protocols",
            &[
                &["protocol_id", "protocol_type.text"],
                &["p1", "dissociation"],
                &["", ""],
                &["p2", ""],
            ],
        );
        let records = sheet.records(&NestedObjectBuilder::default()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(
            Value::Object(records[0].clone()),
            json!({ "protocol_id": "p1", "protocol_type": { "text": "dissociation" } })
        );
        assert_eq!(Value::Object(records[1].clone()), json!({ "protocol_id": "p2" }));
    }

    #[test]
    fn vertical_sheet_reads_key_value_pairs() {
        let sheet = Sheet::from_strings(
            "project",
            &[
                &["project_id", "E-MTAB-5061"],
                &["project_core.project_shortname", "pancreas"],
                &["empty", ""],
            ],
        );
        let record = sheet
            .vertical_record(&NestedObjectBuilder::default())
            .unwrap();
        assert_eq!(
            Value::Object(record),
            json!({
                "project_id": "E-MTAB-5061",
                "project_core": { "project_shortname": "pancreas" }
            })
        );
    }

    #[test]
    fn reads_tsv_directory() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("file.tsv"), "filename\tassay_id\nr1.fastq\ta1\n").unwrap();
        fs::write(temp.path().join("notes.txt"), "ignored").unwrap();
        let dir = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();

        let workbook = Workbook::from_tsv_dir(&dir).unwrap();
        assert_eq!(workbook.sheet_names().collect::<Vec<_>>(), vec!["file"]);
        let sheet = workbook.sheet("file").unwrap();
        assert_eq!(sheet.rows[1][0].as_deref(), Some("r1.fastq"));
    }
}
