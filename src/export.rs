//! Stages bundle documents and registers the resulting bundle with the data store.

use std::collections::HashMap;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};

use crate::bundle::{
    AssembledBundles, BundleAssembler, BundleDocument, BundleKind, BundleManifest, bundle_entity,
};
use crate::domain::{Entity, EntityCategory};
use crate::dump::DumpDir;
use crate::error::BrokerError;
use crate::graph::ResolvedGraph;
use crate::ingest::EntityStore;
use crate::staging::{BundleValidator, DataStore, StagedFile, StagingStore};
use crate::traversal::BundleTraversal;
use crate::worker::{Job, JobHandler};

const ANALYSIS_FILE_NAME: &str = "analysis_0.json";

#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Validate and dump locally instead of writing to staging and the data store.
    pub dry_run: bool,
    pub output_dir: Option<Utf8PathBuf>,
}

/// Notification that an assay in a submission is ready for export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssayMessage {
    pub callback_link: String,
    pub document_uuid: String,
    pub envelope_uuid: String,
    pub assay_index: u64,
    pub total_assays: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportResult {
    pub bundle_uuid: String,
    pub envelope_uuid: String,
    pub dry_run: bool,
    pub files: Vec<StagedFile>,
    pub manifest: BundleManifest,
    pub exported_at: String,
}

pub struct Exporter<I, S, D, V>
where
    I: EntityStore,
    S: StagingStore,
    D: DataStore,
    V: BundleValidator,
{
    ingest: I,
    staging: S,
    dss: D,
    validator: V,
    assembler: BundleAssembler,
    ingest_url: String,
    options: ExportOptions,
    staged_projects: HashMap<(String, String), StagedFile>,
}

impl<I, S, D, V> Exporter<I, S, D, V>
where
    I: EntityStore,
    S: StagingStore,
    D: DataStore,
    V: BundleValidator,
{
    pub fn new(
        ingest: I,
        staging: S,
        dss: D,
        validator: V,
        assembler: BundleAssembler,
        ingest_url: impl Into<String>,
        options: ExportOptions,
    ) -> Self {
        Self {
            ingest,
            staging,
            dss,
            validator,
            assembler,
            ingest_url: ingest_url.into(),
            options,
            staged_projects: HashMap::new(),
        }
    }

    pub fn ingest(&self) -> &I {
        &self.ingest
    }

    pub fn staging(&self) -> &S {
        &self.staging
    }

    pub fn dss(&self) -> &D {
        &self.dss
    }

    /// Exports the assay named by `message`, returning the new bundle uuid.
    pub fn generate_assay_bundle(&mut self, message: &AssayMessage) -> Result<String, BrokerError> {
        info!(callback = %message.callback_link, "assay received");
        info!(
            index = message.assay_index,
            total = message.total_assays,
            "assay position in submission"
        );
        let assay_url = self.resolve_link(&message.callback_link);
        let result = self.export_assay(&message.envelope_uuid, &assay_url)?;
        Ok(result.bundle_uuid)
    }

    /// Fetches the assay at `assay_url` and runs a primary submission for it.
    pub fn export_assay(
        &mut self,
        envelope_uuid: &str,
        assay_url: &str,
    ) -> Result<ExportResult, BrokerError> {
        if !self.options.dry_run && !self.staging.has_staging_area(envelope_uuid)? {
            error!(envelope_uuid, "no staging area has been created");
            return Err(BrokerError::MissingStagingArea(envelope_uuid.to_string()));
        }
        let assay = self.ingest.get_entity(assay_url, EntityCategory::Process)?;
        info!(assay = assay.id(), "attempting to export primary assay bundle");
        self.primary_submission(envelope_uuid, &assay)
    }

    pub fn primary_submission(
        &mut self,
        envelope_uuid: &str,
        assay: &Entity,
    ) -> Result<ExportResult, BrokerError> {
        let graph = BundleTraversal::new(&self.ingest).resolve(assay)?;
        self.export_graph(envelope_uuid, &graph)
    }

    pub fn export_graph(
        &mut self,
        envelope_uuid: &str,
        graph: &ResolvedGraph,
    ) -> Result<ExportResult, BrokerError> {
        let bundles: AssembledBundles = self.assembler.assemble(graph)?;
        let mut manifest = BundleManifest::new(envelope_uuid);
        let mut transfers = Vec::new();
        let prefix = dump_prefix(&graph.project, &["project_core", "project_shortname"]);

        for kind in BundleKind::PRIMARY {
            let Some(document) = bundles.get(kind) else {
                continue;
            };
            let staged = match kind {
                BundleKind::Project => {
                    self.stage_project(envelope_uuid, graph.project.id(), document, &prefix)?
                }
                _ => self.stage_document(envelope_uuid, kind, document, &prefix)?,
            };
            let ids = match kind {
                BundleKind::Project => graph.ids(EntityCategory::Project),
                BundleKind::Biomaterial => graph.ids(EntityCategory::Biomaterial),
                BundleKind::Process => graph.ids(EntityCategory::Process),
                BundleKind::Protocol => graph.ids(EntityCategory::Protocol),
                BundleKind::File => graph.ids(EntityCategory::File),
                BundleKind::Links | BundleKind::Analysis => Vec::new(),
            };
            manifest.record(kind, staged.dss_uuid.clone(), ids);
            transfers.push(staged);

            if kind == BundleKind::File {
                for data in graph.data_files() {
                    manifest.data_files.push(data.uuid.clone());
                    transfers.push(StagedFile::data(&data.uuid, &data.name, &data.url));
                }
            }
        }
        info!(files = transfers.len(), "all files staged");

        if self.options.dry_run {
            self.dump(&prefix, "bundleManifest", &manifest)?;
        } else {
            self.dss.create_bundle(&manifest.bundle_uuid, &transfers)?;
            self.ingest.create_bundle_manifest(&manifest)?;
        }
        info!(bundle_uuid = %manifest.bundle_uuid, "bundle generated");

        Ok(ExportResult {
            bundle_uuid: manifest.bundle_uuid.clone(),
            envelope_uuid: envelope_uuid.to_string(),
            dry_run: self.options.dry_run,
            files: transfers,
            manifest,
            exported_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    /// Builds one bundle per analysis: the input bundle's manifest plus the analysis
    /// document and its output files.
    pub fn secondary_submission(
        &mut self,
        envelope_uuid: &str,
        analyses: &[Entity],
    ) -> Result<Vec<ExportResult>, BrokerError> {
        let mut results = Vec::with_capacity(analyses.len());
        for (index, analysis) in analyses.iter().enumerate() {
            let input = self.ingest.input_bundle_manifest(analysis)?;
            let input_bundle_uuid = input
                .get("bundleUuid")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let mut manifest = BundleManifest::copy_for_analysis(&input, envelope_uuid)?;
            let mut transfers = Vec::new();

            for file in self
                .ingest
                .related_entities("files", analysis, EntityCategory::File)?
            {
                let (Some(name), Some(url)) =
                    (file.field_str("fileName"), file.field_str("cloudUrl"))
                else {
                    return Err(BrokerError::MalformedResource(format!(
                        "analysis output file {} has no fileName or cloudUrl",
                        file.id()
                    )));
                };
                manifest.data_files.push(file.id().to_string());
                transfers.push(StagedFile::data(file.id(), name, url));
            }

            let schemas = self.assembler.schemas();
            let analysis_dss_uuid = uuid::Uuid::new_v4().to_string();
            let mut document = bundle_entity(analysis);
            if let Some(object) = document.as_object_mut() {
                object.insert(
                    "core".to_string(),
                    json!({
                        "type": BundleKind::Analysis.schema_type(),
                        "schema_url": schemas.described_by(BundleKind::Analysis),
                        "schema_version": schemas.version(BundleKind::Analysis),
                    }),
                );
            }
            let schema_version = schemas.version(BundleKind::Analysis).to_string();
            manifest.record(
                BundleKind::Analysis,
                analysis_dss_uuid.clone(),
                vec![analysis.id().to_string()],
            );

            if self.options.dry_run {
                self.log_validation(
                    BundleKind::Analysis,
                    &analysis_dss_uuid,
                    &document,
                    &schema_version,
                );
                let prefix = dump_prefix(analysis, &["analysis_id"]);
                self.dump(&prefix, &format!("analysis_bundle_{index}"), &document)?;
                self.dump(&prefix, &format!("bundleManifest_{index}"), &manifest)?;
            } else {
                let description = self.write_to_staging(
                    envelope_uuid,
                    ANALYSIS_FILE_NAME,
                    &document,
                    &BundleKind::Analysis.content_type(),
                )?;
                transfers.push(StagedFile {
                    name: ANALYSIS_FILE_NAME.to_string(),
                    submitted_name: BundleKind::Analysis.submitted_name(),
                    url: description,
                    dss_uuid: analysis_dss_uuid,
                    indexed: true,
                    content_type: "hca-analysis".to_string(),
                });
                self.dss.create_analysis_bundle(
                    &input_bundle_uuid,
                    &manifest.bundle_uuid,
                    &transfers,
                )?;
                self.ingest.create_bundle_manifest(&manifest)?;
            }
            info!(
                bundle_uuid = %manifest.bundle_uuid,
                analysis = analysis.id(),
                "analysis bundle generated"
            );

            results.push(ExportResult {
                bundle_uuid: manifest.bundle_uuid.clone(),
                envelope_uuid: envelope_uuid.to_string(),
                dry_run: self.options.dry_run,
                files: transfers,
                manifest,
                exported_at: chrono::Utc::now().to_rfc3339(),
            });
        }
        Ok(results)
    }

    pub fn process_submission(&self, submission_id: &str) -> Result<(), BrokerError> {
        self.ingest
            .update_submission_state(submission_id, "processing")
    }

    pub fn delete_staging_area(&self, submission_id: &str) -> Result<(), BrokerError> {
        self.staging.delete_staging_area(submission_id)
    }

    fn stage_project(
        &mut self,
        envelope_uuid: &str,
        project_id: &str,
        document: &BundleDocument,
        prefix: &str,
    ) -> Result<StagedFile, BrokerError> {
        let key = (envelope_uuid.to_string(), project_id.to_string());
        if let Some(staged) = self.staged_projects.get(&key) {
            debug!(project_id, "project already staged");
            return Ok(staged.clone());
        }
        let staged = self.stage_document(envelope_uuid, BundleKind::Project, document, prefix)?;
        self.staged_projects.insert(key, staged.clone());
        Ok(staged)
    }

    fn stage_document(
        &self,
        envelope_uuid: &str,
        kind: BundleKind,
        document: &BundleDocument,
        prefix: &str,
    ) -> Result<StagedFile, BrokerError> {
        let dss_uuid = uuid::Uuid::new_v4().to_string();
        let name = format!("{}_{dss_uuid}.json", kind.schema_type());
        let value = document.to_value()?;

        let url = if self.options.dry_run {
            self.log_validation(kind, &dss_uuid, &value, &document.schema_version);
            self.dump(prefix, kind.schema_type(), &value)?;
            String::new()
        } else {
            self.write_to_staging(envelope_uuid, &name, &value, &kind.content_type())?
        };

        Ok(StagedFile {
            name,
            submitted_name: kind.submitted_name(),
            url,
            dss_uuid,
            indexed: true,
            content_type: kind.content_type(),
        })
    }

    fn write_to_staging(
        &self,
        envelope_uuid: &str,
        file_name: &str,
        content: &Value,
        content_type: &str,
    ) -> Result<String, BrokerError> {
        let description = self
            .staging
            .stage_file(envelope_uuid, file_name, content, content_type)
            .inspect_err(|err| error!(file_name, %err, "staging write failed"))?;
        Ok(description.url)
    }

    fn log_validation(&self, kind: BundleKind, dss_uuid: &str, document: &Value, version: &str) {
        let report = self
            .validator
            .validate(document, kind.schema_name(), version);
        if report.is_valid() {
            info!(kind = kind.schema_name(), dss_uuid, "bundle document is valid");
        } else {
            warn!(
                kind = kind.schema_name(),
                dss_uuid,
                errors = ?report.errors,
                "bundle document is not valid"
            );
        }
    }

    fn dump<T: Serialize>(&self, prefix: &str, name: &str, value: &T) -> Result<(), BrokerError> {
        if let Some(dir) = &self.options.output_dir {
            DumpDir::new(dir.clone()).write_json(prefix, name, value)?;
        }
        Ok(())
    }

    fn resolve_link(&self, link: &str) -> String {
        if link.starts_with("http://") || link.starts_with("https://") {
            link.to_string()
        } else {
            format!(
                "{}/{}",
                self.ingest_url.trim_end_matches('/'),
                link.trim_start_matches('/')
            )
        }
    }
}

impl<I, S, D, V> JobHandler for Exporter<I, S, D, V>
where
    I: EntityStore + 'static,
    S: StagingStore + 'static,
    D: DataStore + 'static,
    V: BundleValidator + 'static,
{
    fn handle(&mut self, job: Job) -> Result<(), BrokerError> {
        match job {
            Job::ExportAssay(message) => self.generate_assay_bundle(&message).map(|_| ()),
            other => Err(BrokerError::Validation(format!(
                "exporter cannot run {}",
                other.label()
            ))),
        }
    }
}

/// Name prefix for dumped documents, read from the entity content with the id as fallback.
fn dump_prefix(entity: &Entity, path: &[&str]) -> String {
    let mut cursor = entity.content();
    for part in path {
        cursor = cursor.and_then(|value| value.get(*part));
    }
    cursor
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| entity.id().to_string())
}
