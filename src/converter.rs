use serde_json::{Map, Value};
use tracing::info;

use crate::error::BrokerError;
use crate::nested::NestedObjectBuilder;
use crate::workbook::{Sheet, Workbook};

/// Sample sheets and the specific type their rows carry.
pub const SAMPLE_SHEETS: [(&str, &str); 6] = [
    ("sample.donor", "donor"),
    ("sample.specimen_from_organism", "specimen_from_organism"),
    ("sample.cell_suspension", "cell_suspension"),
    ("sample.organoid", "organoid"),
    ("sample.immortalized_cell_line", "immortalized_cell_line"),
    ("sample.primary_cell_line", "primary_cell_line"),
];

/// Sub-sheets that add fields to samples defined elsewhere: (sheet, parent object, field, append).
const SUPPLEMENT_SHEETS: [(&str, &str, &str, bool); 3] = [
    (
        "sample.specimen_from_organism.s",
        "specimen_from_organism",
        "state_of_specimen",
        false,
    ),
    ("sample.cell_suspension.enrichme", "cell_suspension", "enrichment", true),
    ("sample.cell_suspension.well", "cell_suspension", "well", false),
];

/// Assay part sheets: (sheet, key in the row, path on the assay).
const ASSAY_PART_SHEETS: [(&str, &str, &[&str]); 5] = [
    ("seq", "seq", &["seq"]),
    ("seq.barcode", "umi_barcode", &["seq", "umi_barcode"]),
    ("single_cell", "single_cell", &["single_cell"]),
    ("single_cell.barcode", "barcode", &["single_cell", "barcode"]),
    ("rna", "rna", &["rna"]),
];

#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    pub kind: String,
    pub fields: Map<String, Value>,
}

/// A row from a split sub-sheet that belongs to a sample defined on another sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleSupplement {
    pub sheet: String,
    pub sample_id: String,
    pub parent: String,
    pub field: String,
    pub value: Value,
    pub append: bool,
}

/// A fragment of assay metadata. Parts without an assay id apply to every assay.
#[derive(Debug, Clone, PartialEq)]
pub struct AssayPart {
    pub assay_id: Option<String>,
    pub path: Vec<String>,
    pub value: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetRecords {
    pub project: Map<String, Value>,
    pub protocols: Vec<Map<String, Value>>,
    pub samples: Vec<SampleRecord>,
    pub supplements: Vec<SampleSupplement>,
    pub assay_parts: Vec<AssayPart>,
    pub files: Vec<Map<String, Value>>,
}

pub struct SpreadsheetConverter {
    builder: NestedObjectBuilder,
}

impl SpreadsheetConverter {
    pub fn new(builder: NestedObjectBuilder) -> Self {
        Self { builder }
    }

    pub fn convert(&self, workbook: &Workbook) -> Result<SheetRecords, BrokerError> {
        let project_sheet = workbook
            .sheet("project")
            .ok_or_else(|| BrokerError::Validation("workbook has no project sheet".to_string()))?;

        let mut project = project_sheet.vertical_record(&self.builder)?;
        project.insert(
            "publications".to_string(),
            self.records_value(workbook, "project.publications")?,
        );
        project.insert(
            "submitters".to_string(),
            self.records_value(workbook, "contact.submitter")?,
        );
        project.insert(
            "contributors".to_string(),
            self.records_value(workbook, "contact.contributors")?,
        );

        let protocols = self.records(workbook, "protocols")?;

        let mut samples = Vec::new();
        for (sheet, kind) in SAMPLE_SHEETS {
            for fields in self.records(workbook, sheet)? {
                samples.push(SampleRecord {
                    kind: kind.to_string(),
                    fields,
                });
            }
        }

        let mut supplements = Vec::new();
        for (sheet, parent, field, append) in SUPPLEMENT_SHEETS {
            for mut row in self.records(workbook, sheet)? {
                let Some(sample_id) = take_id(&mut row, "sample_id")? else {
                    continue;
                };
                let Some(value) = row.remove(field) else {
                    continue;
                };
                supplements.push(SampleSupplement {
                    sheet: sheet.to_string(),
                    sample_id,
                    parent: parent.to_string(),
                    field: field.to_string(),
                    value,
                    append,
                });
            }
        }

        let mut assay_parts = Vec::new();
        for (sheet, key, path) in ASSAY_PART_SHEETS {
            for mut row in self.records(workbook, sheet)? {
                let assay_id = take_id(&mut row, "assay_id")?;
                let Some(value) = row.remove(key) else {
                    continue;
                };
                assay_parts.push(AssayPart {
                    assay_id,
                    path: path.iter().map(|part| part.to_string()).collect(),
                    value,
                });
            }
        }

        let files = self.records(workbook, "file")?;

        info!(
            protocols = protocols.len(),
            samples = samples.len(),
            files = files.len(),
            "spreadsheet converted"
        );

        Ok(SheetRecords {
            project,
            protocols,
            samples,
            supplements,
            assay_parts,
            files,
        })
    }

    fn records(
        &self,
        workbook: &Workbook,
        name: &str,
    ) -> Result<Vec<Map<String, Value>>, BrokerError> {
        workbook
            .sheet(name)
            .map(|sheet: &Sheet| sheet.records(&self.builder))
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    fn records_value(&self, workbook: &Workbook, name: &str) -> Result<Value, BrokerError> {
        Ok(Value::Array(
            self.records(workbook, name)?
                .into_iter()
                .map(Value::Object)
                .collect(),
        ))
    }
}

/// Reads one id cell. Scalars and single-element lists are accepted; several values are ambiguous.
pub fn single_id(row: &Map<String, Value>, key: &str) -> Result<Option<String>, BrokerError> {
    let Some(value) = row.get(key) else {
        return Ok(None);
    };
    let id = match value {
        Value::Array(items) if items.len() == 1 => scalar_id(&items[0]),
        Value::Array(items) if items.len() > 1 => {
            return Err(BrokerError::Validation(format!(
                "{key} must hold a single id, found {value}"
            )));
        }
        other => scalar_id(other),
    };
    id.map(Some)
        .ok_or_else(|| BrokerError::Validation(format!("{key} is not a valid id: {value}")))
}

/// Like [`single_id`], removing the column from the row.
pub fn take_id(row: &mut Map<String, Value>, key: &str) -> Result<Option<String>, BrokerError> {
    let id = single_id(row, key)?;
    row.remove(key);
    Ok(id)
}

fn scalar_id(value: &Value) -> Option<String> {
    match value {
        Value::String(id) => Some(id.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
