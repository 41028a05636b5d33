#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::{Value, json};

use ingest_broker::bundle::BundleManifest;
use ingest_broker::domain::{Entity, EntityCategory, EntityUuid, Submission};
use ingest_broker::error::BrokerError;
use ingest_broker::ingest::{EntityStore, EntityStream};
use ingest_broker::staging::{
    BundleValidator, DataStore, FileDescription, StagedFile, StagingStore, ValidationReport,
};

pub fn entity(category: EntityCategory, id: &str, specific_type: &str) -> Entity {
    Entity::from_resource(
        category,
        json!({
            "uuid": { "uuid": id },
            "content": {
                "describedBy": format!(
                    "https://schema.humancellatlas.org/type/{category}/5.1.0/{specific_type}"
                ),
                "name": id
            },
            "_links": {
                "self": { "href": format!("http://ingest/{}/{id}", category.collection()) }
            }
        }),
    )
    .unwrap()
}

pub fn data_file(id: &str, name: &str) -> Entity {
    Entity::from_resource(
        EntityCategory::File,
        json!({
            "uuid": { "uuid": id },
            "fileName": name,
            "cloudUrl": format!("s3://bucket/{name}"),
            "content": {
                "describedBy": "https://schema.humancellatlas.org/type/file/5.1.0/sequence_file",
                "file_core": { "file_name": name }
            },
            "_links": { "self": { "href": format!("http://ingest/files/{id}") } }
        }),
    )
    .unwrap()
}

pub fn submission(id: &str) -> Submission {
    Submission::from_resource(json!({
        "uuid": { "uuid": id },
        "submissionState": "Valid",
        "submissionDate": "2018-03-01T10:00:00Z",
        "updateDate": "2018-03-02T10:00:00Z",
        "_links": { "self": { "href": format!("http://ingest/submissionEnvelopes/{id}") } }
    }))
    .unwrap()
}

/// In-memory entity store. Relations are keyed by (entity id, relation name).
#[derive(Default)]
pub struct MockStore {
    pub entities: HashMap<String, Entity>,
    pub relations: HashMap<(String, String), Vec<Entity>>,
    pub listings: HashMap<(String, EntityCategory), Vec<Entity>>,
    pub submissions: HashMap<String, Submission>,
    pub project_submissions: HashMap<String, Vec<Submission>>,
    pub projects: HashMap<String, Entity>,
    pub input_manifests: HashMap<String, Value>,
    pub manifests: Mutex<Vec<BundleManifest>>,
    pub state_updates: Mutex<Vec<(String, String)>>,
    pub list_calls: Mutex<usize>,
    pub fail_listing: bool,
}

impl MockStore {
    pub fn relate(&mut self, from: &Entity, relation: &str, to: &[&Entity]) {
        self.relations
            .entry((from.id().to_string(), relation.to_string()))
            .or_default()
            .extend(to.iter().map(|entity| (*entity).clone()));
    }

    pub fn add(&mut self, entity: &Entity) {
        if let Some(href) = entity.link("self") {
            self.entities.insert(href.to_string(), entity.clone());
        }
    }

    pub fn list_in(
        &mut self,
        submission: &Submission,
        category: EntityCategory,
        entities: Vec<Entity>,
    ) {
        self.listings
            .insert((submission.cache_key().to_string(), category), entities);
    }
}

impl EntityStore for MockStore {
    fn list_entities(
        &self,
        submission: &Submission,
        category: EntityCategory,
        _page_size: usize,
    ) -> EntityStream<'_> {
        *self.list_calls.lock().unwrap() += 1;
        if self.fail_listing {
            return Box::new(std::iter::once(Err(BrokerError::IngestHttp(
                "connection refused".to_string(),
            ))));
        }
        let entities = self
            .listings
            .get(&(submission.cache_key().to_string(), category))
            .cloned()
            .unwrap_or_default();
        Box::new(entities.into_iter().map(Ok))
    }

    fn related_entities(
        &self,
        relation: &str,
        entity: &Entity,
        _target: EntityCategory,
    ) -> Result<Vec<Entity>, BrokerError> {
        Ok(self
            .relations
            .get(&(entity.id().to_string(), relation.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    fn get_entity(&self, url: &str, _category: EntityCategory) -> Result<Entity, BrokerError> {
        self.entities
            .get(url)
            .cloned()
            .ok_or_else(|| BrokerError::IngestStatus {
                status: 404,
                message: url.to_string(),
            })
    }

    fn get_submission(&self, uuid: &EntityUuid) -> Result<Submission, BrokerError> {
        self.submissions
            .get(uuid.as_str())
            .cloned()
            .ok_or_else(|| BrokerError::IngestStatus {
                status: 404,
                message: uuid.to_string(),
            })
    }

    fn get_project(&self, uuid: &EntityUuid) -> Result<Entity, BrokerError> {
        self.projects
            .get(uuid.as_str())
            .cloned()
            .ok_or_else(|| BrokerError::IngestStatus {
                status: 404,
                message: uuid.to_string(),
            })
    }

    fn submissions_in_project(&self, project: &Entity) -> Result<Vec<Submission>, BrokerError> {
        Ok(self
            .project_submissions
            .get(project.id())
            .cloned()
            .unwrap_or_default())
    }

    fn create_bundle_manifest(&self, manifest: &BundleManifest) -> Result<(), BrokerError> {
        self.manifests.lock().unwrap().push(manifest.clone());
        Ok(())
    }

    fn update_submission_state(&self, submission_id: &str, state: &str) -> Result<(), BrokerError> {
        self.state_updates
            .lock()
            .unwrap()
            .push((submission_id.to_string(), state.to_string()));
        Ok(())
    }

    fn input_bundle_manifest(&self, analysis: &Entity) -> Result<Value, BrokerError> {
        self.input_manifests
            .get(analysis.id())
            .cloned()
            .ok_or_else(|| BrokerError::MalformedResource(analysis.id().to_string()))
    }
}

#[derive(Default)]
pub struct MockStaging {
    pub has_area: bool,
    pub staged: Mutex<Vec<(String, Value, String)>>,
    /// Writes at or beyond this index are refused with a 503.
    pub fail_from: Option<usize>,
}

impl MockStaging {
    pub fn with_area() -> Self {
        Self {
            has_area: true,
            ..Self::default()
        }
    }

    pub fn failing_after(writes: usize) -> Self {
        Self {
            fail_from: Some(writes),
            ..Self::with_area()
        }
    }

    pub fn staged_names(&self) -> Vec<String> {
        self.staged
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _, _)| name.clone())
            .collect()
    }
}

impl StagingStore for MockStaging {
    fn stage_file(
        &self,
        submission_id: &str,
        file_name: &str,
        content: &Value,
        content_type: &str,
    ) -> Result<FileDescription, BrokerError> {
        let mut staged = self.staged.lock().unwrap();
        if self.fail_from.is_some_and(|limit| staged.len() >= limit) {
            return Err(BrokerError::StagingStatus {
                status: 503,
                message: format!("cannot write {file_name}"),
            });
        }
        staged.push((
            file_name.to_string(),
            content.clone(),
            content_type.to_string(),
        ));
        Ok(FileDescription {
            url: format!("s3://staging/{submission_id}/{file_name}"),
        })
    }

    fn has_staging_area(&self, _submission_id: &str) -> Result<bool, BrokerError> {
        Ok(self.has_area)
    }

    fn delete_staging_area(&self, _submission_id: &str) -> Result<(), BrokerError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct MockDataStore {
    pub bundles: Mutex<Vec<(String, Vec<StagedFile>)>>,
    pub analysis_bundles: Mutex<Vec<(String, String, Vec<StagedFile>)>>,
}

impl DataStore for MockDataStore {
    fn create_bundle(&self, bundle_uuid: &str, files: &[StagedFile]) -> Result<(), BrokerError> {
        self.bundles
            .lock()
            .unwrap()
            .push((bundle_uuid.to_string(), files.to_vec()));
        Ok(())
    }

    fn create_analysis_bundle(
        &self,
        input_bundle_uuid: &str,
        bundle_uuid: &str,
        files: &[StagedFile],
    ) -> Result<(), BrokerError> {
        self.analysis_bundles.lock().unwrap().push((
            input_bundle_uuid.to_string(),
            bundle_uuid.to_string(),
            files.to_vec(),
        ));
        Ok(())
    }
}

/// Rejects every document, for checking that validation never aborts a dry run.
pub struct RejectingValidator;

impl BundleValidator for RejectingValidator {
    fn validate(&self, _document: &Value, document_type: &str, _version: &str) -> ValidationReport {
        ValidationReport {
            errors: vec![format!("{document_type} rejected")],
        }
    }
}

/// A sequencing assay over a cell suspension produced by a chained
/// dissociation/enrichment process from two specimens of one donor.
pub fn assay_store() -> (MockStore, Entity) {
    let mut store = MockStore::default();
    let project = entity(EntityCategory::Project, "proj-1", "project");
    let assay = entity(EntityCategory::Process, "assay-1", "sequencing_process");
    let suspension = entity(EntityCategory::Biomaterial, "cs-1", "cell_suspension");
    let specimen = entity(EntityCategory::Biomaterial, "specimen-1", "specimen_from_organism");
    let specimen2 = entity(EntityCategory::Biomaterial, "specimen-2", "specimen_from_organism");
    let donor = entity(EntityCategory::Biomaterial, "donor-1", "donor_organism");
    let wrapper = entity(EntityCategory::Process, "wrap-1", "process");
    let dissociation = entity(EntityCategory::Process, "diss-1", "dissociation_process");
    let enrichment = entity(EntityCategory::Process, "enr-1", "enrichment_process");
    let collection = entity(EntityCategory::Process, "coll-1", "collection_process");
    let collection2 = entity(EntityCategory::Process, "coll-2", "collection_process");
    let library = entity(EntityCategory::Protocol, "prot-lib", "library_preparation_protocol");
    let diss_protocol = entity(EntityCategory::Protocol, "prot-diss", "dissociation_protocol");
    let enr_protocol = entity(EntityCategory::Protocol, "prot-enr", "enrichment_protocol");
    let read1 = data_file("file-1", "r1.fastq.gz");
    let read2 = data_file("file-2", "r2.fastq.gz");

    store.add(&assay);
    store.relate(&assay, "projects", &[&project]);
    store.relate(&assay, "inputBiomaterials", &[&suspension]);
    store.relate(&assay, "derivedFiles", &[&read1, &read2]);
    store.relate(&assay, "protocols", &[&library]);

    store.relate(&suspension, "derivedByProcesses", &[&wrapper]);
    store.relate(&wrapper, "chainedProcesses", &[&dissociation, &enrichment]);
    store.relate(&wrapper, "inputBiomaterials", &[&specimen, &specimen2]);
    store.relate(&dissociation, "protocols", &[&diss_protocol]);
    store.relate(&enrichment, "protocols", &[&enr_protocol]);

    store.relate(&specimen, "derivedByProcesses", &[&collection]);
    store.relate(&collection, "inputBiomaterials", &[&donor]);
    store.relate(&specimen2, "derivedByProcesses", &[&collection2]);
    store.relate(&collection2, "inputBiomaterials", &[&donor]);

    (store, assay)
}
