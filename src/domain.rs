use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::BrokerError;

/// Coarse category every entity in a submission belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityCategory {
    Project,
    Biomaterial,
    Protocol,
    Process,
    File,
}

impl EntityCategory {
    pub const ALL: [EntityCategory; 5] = [
        EntityCategory::Biomaterial,
        EntityCategory::Project,
        EntityCategory::Protocol,
        EntityCategory::File,
        EntityCategory::Process,
    ];

    /// Collection name used by the entity store for listings and embedded pages.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityCategory::Project => "projects",
            EntityCategory::Biomaterial => "biomaterials",
            EntityCategory::Protocol => "protocols",
            EntityCategory::Process => "processes",
            EntityCategory::File => "files",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EntityCategory::Project => "project",
            EntityCategory::Biomaterial => "biomaterial",
            EntityCategory::Protocol => "protocol",
            EntityCategory::Process => "process",
            EntityCategory::File => "file",
        }
    }
}

impl fmt::Display for EntityCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Schema-derived type of an entity, e.g. `donor_organism` or `sequencing_process`.
///
/// Resolved once when an entity is read, from the last path segment of its
/// `describedBy` schema URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SpecificType {
    Named(String),
    Unknown,
}

impl SpecificType {
    pub fn from_schema_url(url: &str) -> Self {
        let segment = url.rsplit('/').next().unwrap_or_default().trim();
        if segment.is_empty() {
            SpecificType::Unknown
        } else {
            SpecificType::Named(segment.to_string())
        }
    }

    pub fn classify(resource: &Value) -> Self {
        resource
            .get("content")
            .and_then(|content| content.get("describedBy"))
            .and_then(Value::as_str)
            .map(Self::from_schema_url)
            .unwrap_or(SpecificType::Unknown)
    }

    pub fn as_str(&self) -> &str {
        match self {
            SpecificType::Named(name) => name,
            SpecificType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SpecificType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A typed record read from the entity store or built from a spreadsheet.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    category: EntityCategory,
    id: String,
    specific_type: SpecificType,
    resource: Map<String, Value>,
}

impl Entity {
    pub fn from_resource(category: EntityCategory, resource: Value) -> Result<Self, BrokerError> {
        let specific_type = SpecificType::classify(&resource);
        let Value::Object(resource) = resource else {
            return Err(BrokerError::MalformedResource(format!(
                "{category} resource is not a JSON object"
            )));
        };
        let id = resource
            .get("uuid")
            .and_then(|uuid| uuid.get("uuid"))
            .and_then(Value::as_str)
            .or_else(|| link_href(&resource, "self"))
            .map(str::to_string)
            .ok_or_else(|| {
                BrokerError::MalformedResource(format!("{category} resource has no uuid"))
            })?;
        Ok(Self {
            category,
            id,
            specific_type,
            resource,
        })
    }

    /// Builds an entity that only exists locally, keyed by its declared spreadsheet id.
    pub fn local(
        category: EntityCategory,
        id: impl Into<String>,
        specific_type: SpecificType,
        content: Map<String, Value>,
    ) -> Self {
        let id = id.into();
        let mut resource = Map::new();
        resource.insert("content".to_string(), Value::Object(content));
        resource.insert("uuid".to_string(), serde_json::json!({ "uuid": id }));
        Self {
            category,
            id,
            specific_type,
            resource,
        }
    }

    pub fn category(&self) -> EntityCategory {
        self.category
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn specific_type(&self) -> &SpecificType {
        &self.specific_type
    }

    pub fn resource(&self) -> &Map<String, Value> {
        &self.resource
    }

    pub fn content(&self) -> Option<&Value> {
        self.resource.get("content")
    }

    pub fn content_mut(&mut self) -> Option<&mut Map<String, Value>> {
        self.resource.get_mut("content").and_then(Value::as_object_mut)
    }

    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.resource.get(name).and_then(Value::as_str)
    }

    pub fn link(&self, relation: &str) -> Option<&str> {
        link_href(&self.resource, relation)
    }
}

/// A submission envelope as returned by the entity store.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub uuid: Option<String>,
    pub self_href: String,
    pub status: Option<String>,
    pub submission_date: Option<String>,
    pub update_date: Option<String>,
    resource: Map<String, Value>,
}

impl Submission {
    pub fn from_resource(resource: Value) -> Result<Self, BrokerError> {
        let Value::Object(resource) = resource else {
            return Err(BrokerError::MalformedResource(
                "submission resource is not a JSON object".to_string(),
            ));
        };
        let self_href = link_href(&resource, "self")
            .map(str::to_string)
            .ok_or_else(|| {
                BrokerError::MalformedResource("submission resource has no self link".to_string())
            })?;
        let text = |key: &str| resource.get(key).and_then(Value::as_str).map(str::to_string);
        Ok(Self {
            uuid: resource
                .get("uuid")
                .and_then(|uuid| uuid.get("uuid"))
                .and_then(Value::as_str)
                .map(str::to_string),
            status: text("submissionState"),
            submission_date: text("submissionDate"),
            update_date: text("updateDate"),
            self_href,
            resource,
        })
    }

    /// Store-side id, the last segment of the self link.
    pub fn id(&self) -> &str {
        self.self_href.rsplit('/').next().unwrap_or(&self.self_href)
    }

    /// Cache key: the uuid when present, otherwise the self link.
    pub fn cache_key(&self) -> &str {
        self.uuid.as_deref().unwrap_or(&self.self_href)
    }

    pub fn link(&self, relation: &str) -> Option<&str> {
        link_href(&self.resource, relation)
    }
}

pub fn link_href<'a>(resource: &'a Map<String, Value>, relation: &str) -> Option<&'a str> {
    resource
        .get("_links")
        .and_then(|links| links.get(relation))
        .and_then(|link| link.get("href"))
        .and_then(Value::as_str)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityUuid(String);

impl EntityUuid {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityUuid {
    type Err = BrokerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parsed = uuid::Uuid::parse_str(value.trim())
            .map_err(|_| BrokerError::InvalidUuid(value.to_string()))?;
        Ok(Self(parsed.hyphenated().to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SummaryKind {
    Project,
    Submission,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Json,
    Tsv,
}
