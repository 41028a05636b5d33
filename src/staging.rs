use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::bundle::BundleKind;
use crate::error::BrokerError;

/// Where a staged file ended up.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileDescription {
    pub url: String,
}

/// One entry in the transfer list handed to the data store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedFile {
    pub name: String,
    #[serde(rename = "submittedName")]
    pub submitted_name: String,
    pub url: String,
    pub dss_uuid: String,
    pub indexed: bool,
    #[serde(rename = "content-type")]
    pub content_type: String,
}

impl StagedFile {
    /// A data file moved by reference from its cloud location.
    pub fn data(uuid: &str, name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            submitted_name: name.to_string(),
            url: url.to_string(),
            dss_uuid: uuid.to_string(),
            indexed: false,
            content_type: "data".to_string(),
        }
    }
}

pub trait StagingStore: Send + Sync {
    fn stage_file(
        &self,
        submission_id: &str,
        file_name: &str,
        content: &Value,
        content_type: &str,
    ) -> Result<FileDescription, BrokerError>;

    fn has_staging_area(&self, submission_id: &str) -> Result<bool, BrokerError>;

    fn delete_staging_area(&self, submission_id: &str) -> Result<(), BrokerError>;
}

pub trait DataStore: Send + Sync {
    fn create_bundle(&self, bundle_uuid: &str, files: &[StagedFile]) -> Result<(), BrokerError>;

    /// Creates a bundle holding every file of `input_bundle_uuid` plus `files`.
    fn create_analysis_bundle(
        &self,
        input_bundle_uuid: &str,
        bundle_uuid: &str,
        files: &[StagedFile],
    ) -> Result<(), BrokerError>;
}

/// Outcome of checking one bundle document against its schema.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationReport {
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

pub trait BundleValidator: Send + Sync {
    fn validate(&self, document: &Value, document_type: &str, schema_version: &str)
    -> ValidationReport;
}

/// Checks the envelope fields every bundle document must carry.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuralValidator;

impl BundleValidator for StructuralValidator {
    fn validate(
        &self,
        document: &Value,
        document_type: &str,
        schema_version: &str,
    ) -> ValidationReport {
        let mut errors = Vec::new();
        let Some(object) = document.as_object() else {
            return ValidationReport {
                errors: vec![format!("{document_type} bundle is not a JSON object")],
            };
        };
        for field in ["describedBy", "schema_type", "schema_version"] {
            if !object.get(field).is_some_and(Value::is_string) {
                errors.push(format!("{document_type} bundle is missing {field}"));
            }
        }
        if let Some(version) = object.get("schema_version").and_then(Value::as_str) {
            if version != schema_version {
                errors.push(format!(
                    "{document_type} bundle has schema version {version}, expected {schema_version}"
                ));
            }
        }
        match object.get("content") {
            Some(Value::Array(items)) => {
                for (index, item) in items.iter().enumerate() {
                    if document_type == BundleKind::Links.schema_name() {
                        continue;
                    }
                    let has_id = item
                        .get("hca_ingest")
                        .and_then(|ingest| ingest.get("document_id"))
                        .is_some_and(Value::is_string);
                    if !has_id {
                        errors.push(format!(
                            "{document_type} bundle entry {index} has no document_id"
                        ));
                    }
                }
            }
            Some(Value::Object(_)) if document_type == BundleKind::Analysis.schema_name() => {}
            _ => errors.push(format!("{document_type} bundle has no content")),
        }
        ValidationReport { errors }
    }
}

fn http_client() -> Result<Client, String> {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("ingest-broker/{}", env!("CARGO_PKG_VERSION")))
            .map_err(|err| err.to_string())?,
    );
    Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(60))
        .build()
        .map_err(|err| err.to_string())
}

#[derive(Clone)]
pub struct StagingHttpClient {
    client: Client,
    base_url: String,
}

impl StagingHttpClient {
    pub fn new(base_url: &str) -> Result<Self, BrokerError> {
        Ok(Self {
            client: http_client().map_err(BrokerError::StagingHttp)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn area_url(&self, submission_id: &str) -> String {
        format!("{}/v1/area/{submission_id}", self.base_url)
    }

    fn send(&self, request: RequestBuilder) -> Result<Response, BrokerError> {
        let response = request
            .send()
            .map_err(|err| BrokerError::StagingHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "staging request failed".to_string());
            return Err(BrokerError::StagingStatus { status, message });
        }
        Ok(response)
    }
}

impl StagingStore for StagingHttpClient {
    fn stage_file(
        &self,
        submission_id: &str,
        file_name: &str,
        content: &Value,
        content_type: &str,
    ) -> Result<FileDescription, BrokerError> {
        info!(file_name, "writing to staging area");
        let url = format!("{}/{file_name}", self.area_url(submission_id));
        let description = self
            .send(
                self.client
                    .put(&url)
                    .header(
                        reqwest::header::CONTENT_TYPE,
                        format!("application/json; dcp-type=\"{content_type}\""),
                    )
                    .json(content),
            )?
            .json::<FileDescription>()
            .map_err(|err| BrokerError::StagingHttp(err.to_string()))?;
        info!(url = %description.url, "file staged");
        Ok(description)
    }

    fn has_staging_area(&self, submission_id: &str) -> Result<bool, BrokerError> {
        let response = self
            .client
            .head(self.area_url(submission_id))
            .send()
            .map_err(|err| BrokerError::StagingHttp(err.to_string()))?;
        debug!(submission_id, status = response.status().as_u16(), "staging area checked");
        Ok(response.status().is_success())
    }

    fn delete_staging_area(&self, submission_id: &str) -> Result<(), BrokerError> {
        info!(submission_id, "deleting staging area");
        self.send(self.client.delete(self.area_url(submission_id)))?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct DataStoreHttpClient {
    client: Client,
    base_url: String,
}

impl DataStoreHttpClient {
    pub fn new(base_url: &str) -> Result<Self, BrokerError> {
        Ok(Self {
            client: http_client().map_err(BrokerError::DataStoreHttp)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl DataStoreHttpClient {
    fn bundle_url(&self, bundle_uuid: &str) -> String {
        format!("{}/v1/bundles/{bundle_uuid}", self.base_url)
    }

    fn send(&self, request: RequestBuilder) -> Result<Response, BrokerError> {
        let response = request
            .query(&[("replica", "aws")])
            .send()
            .map_err(|err| BrokerError::DataStoreHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "data store request failed".to_string());
            return Err(BrokerError::DataStoreStatus { status, message });
        }
        Ok(response)
    }

    fn put_bundle(&self, bundle_uuid: &str, files: Vec<Value>) -> Result<(), BrokerError> {
        let count = files.len();
        let body = serde_json::json!({
            "creator_uid": 0,
            "files": files,
        });
        self.send(self.client.put(self.bundle_url(bundle_uuid)).json(&body))?;
        info!(bundle_uuid, files = count, "bundle created in data store");
        Ok(())
    }
}

fn staged_values(files: &[StagedFile]) -> Result<Vec<Value>, BrokerError> {
    files
        .iter()
        .map(|file| {
            serde_json::to_value(file).map_err(|err| BrokerError::Serialization(err.to_string()))
        })
        .collect()
}

impl DataStore for DataStoreHttpClient {
    fn create_bundle(&self, bundle_uuid: &str, files: &[StagedFile]) -> Result<(), BrokerError> {
        self.put_bundle(bundle_uuid, staged_values(files)?)
    }

    fn create_analysis_bundle(
        &self,
        input_bundle_uuid: &str,
        bundle_uuid: &str,
        files: &[StagedFile],
    ) -> Result<(), BrokerError> {
        let input = self
            .send(self.client.get(self.bundle_url(input_bundle_uuid)))?
            .json::<Value>()
            .map_err(|err| BrokerError::DataStoreHttp(err.to_string()))?;
        let mut all_files = input
            .get("bundle")
            .and_then(|bundle| bundle.get("files"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        debug!(input_bundle_uuid, inherited = all_files.len(), "input bundle read");
        all_files.extend(staged_values(files)?);
        self.put_bundle(bundle_uuid, all_files)
    }
}
