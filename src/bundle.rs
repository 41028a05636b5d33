//! Bundle documents and the manifest that ties staged files to entity ids.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::BrokerConfig;
use crate::domain::Entity;
use crate::error::BrokerError;
use crate::graph::{OrderedMap, ResolvedGraph};

/// Store bookkeeping that never belongs in an exported document.
const TRANSPORT_FIELDS: [&str; 6] = [
    "_links",
    "events",
    "validationState",
    "validationErrors",
    "user",
    "lastModifiedUser",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleKind {
    Project,
    Biomaterial,
    Process,
    File,
    Protocol,
    Links,
    Analysis,
}

impl BundleKind {
    /// Staging order for a primary bundle.
    pub const PRIMARY: [BundleKind; 6] = [
        BundleKind::Project,
        BundleKind::Biomaterial,
        BundleKind::File,
        BundleKind::Process,
        BundleKind::Protocol,
        BundleKind::Links,
    ];

    pub fn schema_name(&self) -> &'static str {
        match self {
            BundleKind::Project => "project",
            BundleKind::Biomaterial => "biomaterial",
            BundleKind::Process => "process",
            BundleKind::File => "file",
            BundleKind::Protocol => "protocol",
            BundleKind::Links => "links",
            BundleKind::Analysis => "analysis",
        }
    }

    pub fn schema_type(&self) -> &'static str {
        match self {
            BundleKind::Links => "link_bundle",
            BundleKind::Project => "project_bundle",
            BundleKind::Biomaterial => "biomaterial_bundle",
            BundleKind::Process => "process_bundle",
            BundleKind::File => "file_bundle",
            BundleKind::Protocol => "protocol_bundle",
            BundleKind::Analysis => "analysis_bundle",
        }
    }

    pub fn submitted_name(&self) -> String {
        format!("{}.json", self.schema_name())
    }

    pub fn content_type(&self) -> String {
        format!("metadata/{}", self.schema_name())
    }
}

/// Schema descriptor base URL and per-bundle versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleSchemas {
    base_url: String,
    versions: BTreeMap<BundleKind, String>,
}

impl BundleSchemas {
    pub fn from_config(config: &BrokerConfig) -> Self {
        let versions = BTreeMap::from([
            (BundleKind::Project, "5.1.0".to_string()),
            (BundleKind::Biomaterial, "5.1.0".to_string()),
            (BundleKind::Process, "5.2.1".to_string()),
            (BundleKind::Protocol, "5.1.0".to_string()),
            (BundleKind::File, "1.0.0".to_string()),
            (BundleKind::Links, "1.0.0".to_string()),
            (BundleKind::Analysis, config.schema_version.clone()),
        ]);
        Self {
            base_url: config.bundle_schema_base_url.clone(),
            versions,
        }
    }

    pub fn version(&self, kind: BundleKind) -> &str {
        self.versions.get(&kind).map(String::as_str).unwrap_or("1.0.0")
    }

    pub fn described_by(&self, kind: BundleKind) -> String {
        format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            self.version(kind),
            kind.schema_name()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleDocument {
    #[serde(rename = "describedBy")]
    pub described_by: String,
    pub schema_version: String,
    pub schema_type: String,
    pub content: Vec<Value>,
    #[serde(skip)]
    pub kind: Option<BundleKind>,
}

impl BundleDocument {
    pub fn new(schemas: &BundleSchemas, kind: BundleKind, content: Vec<Value>) -> Self {
        Self {
            described_by: schemas.described_by(kind),
            schema_version: schemas.version(kind).to_string(),
            schema_type: kind.schema_type().to_string(),
            content,
            kind: Some(kind),
        }
    }

    pub fn to_value(&self) -> Result<Value, BrokerError> {
        serde_json::to_value(self).map_err(|err| BrokerError::Serialization(err.to_string()))
    }
}

/// Converts a store resource into its exported form: domain fields under `content`,
/// remaining bookkeeping under `hca_ingest` with the uuid renamed to `document_id`.
pub fn bundle_entity(entity: &Entity) -> Value {
    let mut ingest = entity.resource().clone();
    for field in TRANSPORT_FIELDS {
        ingest.remove(field);
    }
    let content = ingest.remove("content").unwrap_or(Value::Null);
    ingest.remove("uuid");
    ingest.insert(
        "document_id".to_string(),
        Value::String(entity.id().to_string()),
    );
    match ingest.get("accession") {
        Some(Value::String(_)) => {}
        _ => {
            ingest.insert("accession".to_string(), Value::String(String::new()));
        }
    }

    let mut bundled = Map::new();
    bundled.insert("content".to_string(), content);
    bundled.insert("hca_ingest".to_string(), Value::Object(ingest));
    Value::Object(bundled)
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssembledBundles {
    pub project: BundleDocument,
    pub biomaterial: BundleDocument,
    pub process: BundleDocument,
    pub file: BundleDocument,
    pub protocol: BundleDocument,
    pub links: BundleDocument,
}

impl AssembledBundles {
    pub fn get(&self, kind: BundleKind) -> Option<&BundleDocument> {
        match kind {
            BundleKind::Project => Some(&self.project),
            BundleKind::Biomaterial => Some(&self.biomaterial),
            BundleKind::Process => Some(&self.process),
            BundleKind::File => Some(&self.file),
            BundleKind::Protocol => Some(&self.protocol),
            BundleKind::Links => Some(&self.links),
            BundleKind::Analysis => None,
        }
    }
}

pub struct BundleAssembler {
    schemas: BundleSchemas,
}

impl BundleAssembler {
    pub fn new(schemas: BundleSchemas) -> Self {
        Self { schemas }
    }

    pub fn schemas(&self) -> &BundleSchemas {
        &self.schemas
    }

    pub fn assemble(&self, graph: &ResolvedGraph) -> Result<AssembledBundles, BrokerError> {
        let documents = |kind, entities: &OrderedMap<Entity>| {
            BundleDocument::new(
                &self.schemas,
                kind,
                entities.values().map(bundle_entity).collect(),
            )
        };
        let links = graph
            .links
            .as_slice()
            .iter()
            .map(|link| {
                serde_json::to_value(link)
                    .map_err(|err| BrokerError::Serialization(err.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(AssembledBundles {
            project: BundleDocument::new(
                &self.schemas,
                BundleKind::Project,
                vec![bundle_entity(&graph.project)],
            ),
            biomaterial: documents(BundleKind::Biomaterial, &graph.biomaterials),
            process: documents(BundleKind::Process, &graph.processes),
            file: documents(BundleKind::File, &graph.files),
            protocol: documents(BundleKind::Protocol, &graph.protocols),
            links: BundleDocument::new(&self.schemas, BundleKind::Links, links),
        })
    }
}

pub type FileMap = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleManifest {
    pub bundle_uuid: String,
    pub envelope_uuid: String,
    #[serde(default)]
    pub data_files: Vec<String>,
    #[serde(default)]
    pub file_project_map: FileMap,
    #[serde(default)]
    pub file_biomaterial_map: FileMap,
    #[serde(default)]
    pub file_process_map: FileMap,
    #[serde(default)]
    pub file_protocol_map: FileMap,
    #[serde(default)]
    pub file_files_map: FileMap,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub file_analysis_map: FileMap,
}

impl BundleManifest {
    pub fn new(envelope_uuid: impl Into<String>) -> Self {
        Self {
            bundle_uuid: uuid::Uuid::new_v4().to_string(),
            envelope_uuid: envelope_uuid.into(),
            ..Self::default()
        }
    }

    /// Records which entity ids the staged document `staged_id` carries.
    pub fn record(&mut self, kind: BundleKind, staged_id: impl Into<String>, ids: Vec<String>) {
        let map = match kind {
            BundleKind::Project => &mut self.file_project_map,
            BundleKind::Biomaterial => &mut self.file_biomaterial_map,
            BundleKind::Process => &mut self.file_process_map,
            BundleKind::Protocol => &mut self.file_protocol_map,
            BundleKind::File => &mut self.file_files_map,
            BundleKind::Analysis => &mut self.file_analysis_map,
            BundleKind::Links => return,
        };
        map.insert(staged_id.into(), ids);
    }

    /// Every entity id the manifest accounts for, across all maps.
    pub fn entity_ids(&self) -> impl Iterator<Item = &str> {
        [
            &self.file_project_map,
            &self.file_biomaterial_map,
            &self.file_process_map,
            &self.file_protocol_map,
            &self.file_files_map,
            &self.file_analysis_map,
        ]
        .into_iter()
        .flat_map(|map| map.values())
        .flatten()
        .map(String::as_str)
    }

    /// Copies an input bundle's manifest under a fresh bundle uuid. Accepts both the
    /// current field names and the older `files`/`fileSampleMap`/`fileAssayMap` ones.
    pub fn copy_for_analysis(
        input: &Value,
        envelope_uuid: impl Into<String>,
    ) -> Result<Self, BrokerError> {
        let object = input.as_object().ok_or_else(|| {
            BrokerError::MalformedResource("input bundle manifest is not an object".to_string())
        })?;
        let field = |names: &[&str]| names.iter().find_map(|name| object.get(*name).cloned());
        let map = |names: &[&str]| -> Result<FileMap, BrokerError> {
            match field(names) {
                Some(value) => serde_json::from_value(value)
                    .map_err(|err| BrokerError::MalformedResource(err.to_string())),
                None => Ok(FileMap::new()),
            }
        };
        let data_files = match field(&["dataFiles", "files"]) {
            Some(value) => serde_json::from_value(value)
                .map_err(|err| BrokerError::MalformedResource(err.to_string()))?,
            None => Vec::new(),
        };

        let mut manifest = Self::new(envelope_uuid);
        manifest.data_files = data_files;
        manifest.file_project_map = map(&["fileProjectMap"])?;
        manifest.file_biomaterial_map = map(&["fileBiomaterialMap", "fileSampleMap"])?;
        manifest.file_process_map = map(&["fileProcessMap", "fileAssayMap"])?;
        manifest.file_protocol_map = map(&["fileProtocolMap"])?;
        manifest.file_files_map = map(&["fileFilesMap"])?;
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::domain::EntityCategory;

    fn schemas() -> BundleSchemas {
        BundleSchemas::from_config(&BrokerConfig::default())
    }

    #[test]
    fn bundle_entity_strips_transport_fields() {
        let entity = Entity::from_resource(
            EntityCategory::Biomaterial,
            json!({
                "content": { "biomaterial_id": "donor_1" },
                "uuid": { "uuid": "b-1" },
                "_links": { "self": { "href": "http://x/b-1" } },
                "events": [],
                "validationState": "Valid",
                "validationErrors": [],
                "user": "u",
                "lastModifiedUser": "u",
                "accession": null,
                "submissionDate": "2018-01-01"
            }),
        )
        .unwrap();
        assert_eq!(
            bundle_entity(&entity),
            json!({
                "content": { "biomaterial_id": "donor_1" },
                "hca_ingest": {
                    "document_id": "b-1",
                    "accession": "",
                    "submissionDate": "2018-01-01"
                }
            })
        );
    }

    #[test]
    fn described_by_uses_per_bundle_versions() {
        let schemas = schemas();
        assert_eq!(
            schemas.described_by(BundleKind::Process),
            "https://schema.humancellatlas.org/bundle/5.2.1/process"
        );
        assert_eq!(schemas.version(BundleKind::Links), "1.0.0");
        assert_eq!(BundleKind::Links.schema_type(), "link_bundle");
    }

    #[test]
    fn manifest_serializes_camel_case() {
        let mut manifest = BundleManifest::new("env-1");
        manifest.record(BundleKind::Biomaterial, "staged-1", vec!["b-1".to_string()]);
        let value = serde_json::to_value(&manifest).unwrap();
        assert_eq!(value["envelopeUuid"], "env-1");
        assert_eq!(value["fileBiomaterialMap"]["staged-1"], json!(["b-1"]));
        assert!(value.get("fileAnalysisMap").is_none());
    }

    #[test]
    fn analysis_copy_reads_legacy_names() {
        let input = json!({
            "bundleUuid": "old",
            "files": ["f-1"],
            "fileSampleMap": { "s": ["b-1"] },
            "fileAssayMap": { "a": ["p-1"] },
            "fileProjectMap": { "pr": ["proj"] },
            "fileProtocolMap": {}
        });
        let manifest = BundleManifest::copy_for_analysis(&input, "env-2").unwrap();
        assert_ne!(manifest.bundle_uuid, "old");
        assert_eq!(manifest.data_files, vec!["f-1"]);
        assert_eq!(manifest.file_biomaterial_map["s"], vec!["b-1"]);
        assert_eq!(manifest.file_process_map["a"], vec!["p-1"]);
    }
}
