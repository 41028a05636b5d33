use std::collections::HashMap;

use camino::Utf8Path;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::converter::SpreadsheetConverter;
use crate::domain::Entity;
use crate::error::BrokerError;
use crate::graph::{ResolvedGraph, SheetGraphResolver, id_list};
use crate::ingest::SubmissionWriter;
use crate::nested::NestedObjectBuilder;
use crate::workbook::Workbook;

/// Reads a directory of sheets and resolves it into a validated entity graph.
pub fn resolve_sheet_dir(
    dir: &Utf8Path,
    list_keys: &[String],
) -> Result<ResolvedGraph, BrokerError> {
    let workbook = Workbook::from_tsv_dir(dir)?;
    let converter = SpreadsheetConverter::new(NestedObjectBuilder::new(list_keys.iter().cloned()));
    SheetGraphResolver::resolve(converter.convert(&workbook)?)
}

/// Counts of what a spreadsheet submission created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubmissionReceipt {
    pub submission_url: String,
    pub projects: usize,
    pub protocols: usize,
    pub biomaterials: usize,
    pub files: usize,
    pub processes: usize,
    pub links: usize,
}

/// Writes a resolved spreadsheet graph into a submission envelope.
pub struct SpreadsheetSubmitter<'a, W: SubmissionWriter + ?Sized> {
    writer: &'a W,
}

impl<'a, W: SubmissionWriter + ?Sized> SpreadsheetSubmitter<'a, W> {
    pub fn new(writer: &'a W) -> Self {
        Self { writer }
    }

    pub fn submit(
        &self,
        graph: &ResolvedGraph,
        token: &str,
    ) -> Result<SubmissionReceipt, BrokerError> {
        let submission_url = self.writer.create_submission(token)?;
        self.submit_to(&submission_url, graph)
    }

    pub fn submit_to(
        &self,
        submission_url: &str,
        graph: &ResolvedGraph,
    ) -> Result<SubmissionReceipt, BrokerError> {
        let mut receipt = SubmissionReceipt {
            submission_url: submission_url.to_string(),
            ..SubmissionReceipt::default()
        };

        let project = self.create(submission_url, &graph.project, &[], None)?;
        receipt.projects = 1;

        let mut protocols = HashMap::new();
        for protocol in graph.protocols.values() {
            let created = self.create(submission_url, protocol, &[], None)?;
            protocols.insert(protocol.id(), created);
            receipt.protocols += 1;
        }

        let mut biomaterials = HashMap::new();
        for sample in graph.biomaterials.values() {
            let created = self.create(submission_url, sample, &["protocol_ids"], None)?;
            self.link(&created, &project, "projects", &mut receipt)?;
            let protocol_ids = id_list(sample.content().and_then(|c| c.get("protocol_ids")));
            for protocol_id in protocol_ids {
                let target = protocols
                    .get(protocol_id.as_str())
                    .ok_or_else(|| BrokerError::referential(sample.id(), &protocol_id))?;
                self.link(&created, target, "protocols", &mut receipt)?;
            }
            biomaterials.insert(sample.id(), created);
            receipt.biomaterials += 1;
        }

        let mut files = HashMap::new();
        for file in graph.files.values() {
            let created = self.create(submission_url, file, &[], Some(file.id()))?;
            files.insert(file.id(), created);
            receipt.files += 1;
        }

        for assay in graph.processes.values() {
            let created = self.create(submission_url, assay, &["sample_id", "files"], None)?;
            self.link(&created, &project, "projects", &mut receipt)?;
            let content = assay.content();
            for sample_id in id_list(content.and_then(|c| c.get("sample_id"))) {
                if let Some(sample) = biomaterials.get(sample_id.as_str()) {
                    self.link(&created, sample, "inputBiomaterials", &mut receipt)?;
                }
            }
            for file_name in id_list(content.and_then(|c| c.get("files"))) {
                let target = files
                    .get(file_name.as_str())
                    .ok_or_else(|| BrokerError::referential(assay.id(), &file_name))?;
                self.link(&created, target, "derivedFiles", &mut receipt)?;
            }
            receipt.processes += 1;
        }

        info!(
            submission_url,
            biomaterials = receipt.biomaterials,
            files = receipt.files,
            processes = receipt.processes,
            "spreadsheet submitted"
        );
        Ok(receipt)
    }

    fn create(
        &self,
        submission_url: &str,
        entity: &Entity,
        drop_fields: &[&str],
        file_name: Option<&str>,
    ) -> Result<Value, BrokerError> {
        let mut content = entity.content().cloned().unwrap_or(Value::Null);
        if let Some(object) = content.as_object_mut() {
            for field in drop_fields {
                object.remove(*field);
            }
        }
        debug!(category = %entity.category(), id = entity.id(), "creating entity");
        self.writer
            .create_entity(submission_url, entity.category(), &content, file_name)
    }

    fn link(
        &self,
        from: &Value,
        to: &Value,
        relation: &str,
        receipt: &mut SubmissionReceipt,
    ) -> Result<(), BrokerError> {
        self.writer.link_entity(from, to, relation)?;
        receipt.links += 1;
        Ok(())
    }
}
