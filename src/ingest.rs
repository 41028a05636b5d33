use std::collections::VecDeque;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;
use tracing::{debug, info};

use crate::bundle::BundleManifest;
use crate::domain::{Entity, EntityCategory, EntityUuid, Submission, link_href};
use crate::error::BrokerError;

/// Lazily paged entity listing. Each page is fetched when the previous one is drained.
pub type EntityStream<'a> = Box<dyn Iterator<Item = Result<Entity, BrokerError>> + 'a>;

/// Read side of the remote metadata repository.
pub trait EntityStore: Send + Sync {
    fn list_entities(
        &self,
        submission: &Submission,
        category: EntityCategory,
        page_size: usize,
    ) -> EntityStream<'_>;

    /// Follows `relation` from `entity`; a missing relation yields no entities.
    fn related_entities(
        &self,
        relation: &str,
        entity: &Entity,
        target: EntityCategory,
    ) -> Result<Vec<Entity>, BrokerError>;

    fn get_entity(&self, url: &str, category: EntityCategory) -> Result<Entity, BrokerError>;
    fn get_submission(&self, uuid: &EntityUuid) -> Result<Submission, BrokerError>;
    fn get_project(&self, uuid: &EntityUuid) -> Result<Entity, BrokerError>;
    fn submissions_in_project(&self, project: &Entity) -> Result<Vec<Submission>, BrokerError>;
    fn create_bundle_manifest(&self, manifest: &BundleManifest) -> Result<(), BrokerError>;
    fn update_submission_state(&self, submission_id: &str, state: &str)
    -> Result<(), BrokerError>;

    /// The manifest of the bundle an analysis was computed from.
    fn input_bundle_manifest(&self, analysis: &Entity) -> Result<Value, BrokerError>;
}

/// Write side used when submitting a converted spreadsheet.
pub trait SubmissionWriter: Send + Sync {
    /// Opens a new submission envelope and returns its URL.
    fn create_submission(&self, token: &str) -> Result<String, BrokerError>;

    fn create_entity(
        &self,
        submission_url: &str,
        category: EntityCategory,
        content: &Value,
        file_name: Option<&str>,
    ) -> Result<Value, BrokerError>;

    fn link_entity(&self, from: &Value, to: &Value, relation: &str) -> Result<(), BrokerError>;
}

#[derive(Clone)]
pub struct IngestHttpClient {
    client: Client,
    base_url: String,
}

impl IngestHttpClient {
    pub fn new(base_url: &str) -> Result<Self, BrokerError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("ingest-broker/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| BrokerError::IngestHttp(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/hal+json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| BrokerError::IngestHttp(err.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn send(&self, request: RequestBuilder) -> Result<Response, BrokerError> {
        let response = request
            .send()
            .map_err(|err| BrokerError::IngestHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "ingest request failed".to_string());
            return Err(BrokerError::IngestStatus { status, message });
        }
        Ok(response)
    }

    fn get_json(&self, url: &str) -> Result<Value, BrokerError> {
        debug!(%url, "GET");
        self.send(self.client.get(url))?
            .json::<Value>()
            .map_err(|err| BrokerError::IngestHttp(err.to_string()))
    }

    fn pages(&self, url: String, collection: &'static str) -> PagedResources<'_> {
        PagedResources {
            client: self,
            collection,
            next: Some(url),
            buffer: VecDeque::new(),
        }
    }

    fn find_by_uuid(&self, collection: &str, uuid: &EntityUuid) -> Result<Value, BrokerError> {
        self.get_json(&format!(
            "{}/{collection}/search/findByUuid?uuid={uuid}",
            self.base_url
        ))
    }
}

/// Walks `_embedded.<collection>` pages following `_links.next`.
struct PagedResources<'a> {
    client: &'a IngestHttpClient,
    collection: &'static str,
    next: Option<String>,
    buffer: VecDeque<Value>,
}

impl Iterator for PagedResources<'_> {
    type Item = Result<Value, BrokerError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.buffer.is_empty() {
            let url = self.next.take()?;
            let page = match self.client.get_json(&url) {
                Ok(page) => page,
                Err(err) => return Some(Err(err)),
            };
            if let Some(items) = page
                .get("_embedded")
                .and_then(|embedded| embedded.get(self.collection))
                .and_then(Value::as_array)
            {
                self.buffer.extend(items.iter().cloned());
            }
            self.next = page
                .as_object()
                .and_then(|page| link_href(page, "next"))
                .map(str::to_string);
        }
        self.buffer.pop_front().map(Ok)
    }
}

fn with_page_size(url: &str, page_size: usize) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}size={page_size}")
}

impl EntityStore for IngestHttpClient {
    fn list_entities(
        &self,
        submission: &Submission,
        category: EntityCategory,
        page_size: usize,
    ) -> EntityStream<'_> {
        let url = submission
            .link(category.collection())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}/{}", submission.self_href, category.collection()));
        Box::new(
            self.pages(with_page_size(&url, page_size), category.collection())
                .map(move |resource| Entity::from_resource(category, resource?)),
        )
    }

    fn related_entities(
        &self,
        relation: &str,
        entity: &Entity,
        target: EntityCategory,
    ) -> Result<Vec<Entity>, BrokerError> {
        let Some(url) = entity.link(relation) else {
            return Ok(Vec::new());
        };
        self.pages(url.to_string(), target.collection())
            .map(|resource| Entity::from_resource(target, resource?))
            .collect()
    }

    fn get_entity(&self, url: &str, category: EntityCategory) -> Result<Entity, BrokerError> {
        Entity::from_resource(category, self.get_json(url)?)
    }

    fn get_submission(&self, uuid: &EntityUuid) -> Result<Submission, BrokerError> {
        Submission::from_resource(self.find_by_uuid("submissionEnvelopes", uuid)?)
    }

    fn get_project(&self, uuid: &EntityUuid) -> Result<Entity, BrokerError> {
        Entity::from_resource(
            EntityCategory::Project,
            self.find_by_uuid(EntityCategory::Project.collection(), uuid)?,
        )
    }

    fn submissions_in_project(&self, project: &Entity) -> Result<Vec<Submission>, BrokerError> {
        let Some(url) = project.link("submissionEnvelopes") else {
            return Ok(Vec::new());
        };
        self.pages(url.to_string(), "submissionEnvelopes")
            .map(|resource| Submission::from_resource(resource?))
            .collect()
    }

    fn create_bundle_manifest(&self, manifest: &BundleManifest) -> Result<(), BrokerError> {
        let url = format!("{}/bundleManifests", self.base_url);
        self.send(self.client.post(&url).json(manifest))?;
        info!(bundle_uuid = %manifest.bundle_uuid, "bundle manifest created");
        Ok(())
    }

    fn update_submission_state(
        &self,
        submission_id: &str,
        state: &str,
    ) -> Result<(), BrokerError> {
        let url = format!(
            "{}/submissionEnvelopes/{submission_id}/{state}Event",
            self.base_url
        );
        self.send(self.client.put(&url))?;
        info!(submission_id, state, "submission state updated");
        Ok(())
    }

    fn input_bundle_manifest(&self, analysis: &Entity) -> Result<Value, BrokerError> {
        let url = analysis.link("inputBundleManifests").ok_or_else(|| {
            BrokerError::MalformedResource(format!(
                "analysis {} has no input bundle manifests",
                analysis.id()
            ))
        })?;
        self.pages(url.to_string(), "bundleManifests")
            .next()
            .unwrap_or_else(|| {
                Err(BrokerError::MalformedResource(format!(
                    "analysis {} has no input bundle manifests",
                    analysis.id()
                )))
            })
    }
}

impl SubmissionWriter for IngestHttpClient {
    fn create_submission(&self, token: &str) -> Result<String, BrokerError> {
        let url = format!("{}/submissionEnvelopes", self.base_url);
        let created = self
            .send(
                self.client
                    .post(&url)
                    .header(AUTHORIZATION, token)
                    .json(&serde_json::json!({})),
            )?
            .json::<Value>()
            .map_err(|err| BrokerError::IngestHttp(err.to_string()))?;
        created
            .as_object()
            .and_then(|resource| link_href(resource, "self"))
            .map(str::to_string)
            .ok_or_else(|| {
                BrokerError::MalformedResource("created submission has no self link".to_string())
            })
    }

    fn create_entity(
        &self,
        submission_url: &str,
        category: EntityCategory,
        content: &Value,
        file_name: Option<&str>,
    ) -> Result<Value, BrokerError> {
        let url = match (category, file_name) {
            (EntityCategory::File, Some(name)) => format!("{submission_url}/files/{name}"),
            _ => format!("{submission_url}/{}", category.collection()),
        };
        debug!(%url, "POST");
        self.send(self.client.post(&url).json(&serde_json::json!({ "content": content })))?
            .json::<Value>()
            .map_err(|err| BrokerError::IngestHttp(err.to_string()))
    }

    fn link_entity(&self, from: &Value, to: &Value, relation: &str) -> Result<(), BrokerError> {
        let href = |resource: &Value, relation: &str| {
            resource
                .as_object()
                .and_then(|resource| link_href(resource, relation))
                .map(str::to_string)
                .ok_or_else(|| {
                    BrokerError::MalformedResource(format!("resource has no {relation} link"))
                })
        };
        let url = href(from, relation)?;
        let target = href(to, "self")?;
        self.send(
            self.client
                .put(&url)
                .header(CONTENT_TYPE, "text/uri-list")
                .body(target),
        )?;
        Ok(())
    }
}
