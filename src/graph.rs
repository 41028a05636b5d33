//! Entity graph primitives and the resolver for spreadsheet records.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::converter::{SheetRecords, single_id, take_id};
use crate::domain::{Entity, EntityCategory, SpecificType};
use crate::error::BrokerError;
use crate::nested::overlay;

/// Insertion-ordered map keyed by entity id. The first insert of an id fixes its position.
#[derive(Debug, Clone)]
pub struct OrderedMap<V> {
    index: HashMap<String, usize>,
    entries: Vec<(String, V)>,
}

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self {
            index: HashMap::new(),
            entries: Vec::new(),
        }
    }
}

impl<V> OrderedMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&V> {
        self.index.get(id).map(|&slot| &self.entries[slot].1)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut V> {
        let slot = *self.index.get(id)?;
        Some(&mut self.entries[slot].1)
    }

    /// Inserts unless the id is already present. Returns whether the value was inserted.
    pub fn insert(&mut self, id: impl Into<String>, value: V) -> bool {
        self.insert_with(id, value, |_, _| {})
    }

    /// Inserts a new id, or hands the existing value and the duplicate to `merge`.
    pub fn insert_with<F>(&mut self, id: impl Into<String>, value: V, merge: F) -> bool
    where
        F: FnOnce(&mut V, V),
    {
        let id = id.into();
        if let Some(&slot) = self.index.get(&id) {
            merge(&mut self.entries[slot].1, value);
            return false;
        }
        self.index.insert(id.clone(), self.entries.len());
        self.entries.push((id, value));
        true
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(id, _)| id.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.iter().map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(id, value)| (id.as_str(), value))
    }
}

/// Ids already expanded during a traversal.
#[derive(Debug, Clone, Default)]
pub struct VisitedSet {
    seen: HashSet<String>,
}

impl VisitedSet {
    /// Marks `id` visited; false when it had been seen before.
    pub fn first_visit(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        self.seen.insert(id.to_string())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    pub source_type: String,
    pub source_id: String,
    pub destination_type: String,
    pub destination_id: String,
}

impl Link {
    pub fn new(
        source_type: impl Into<String>,
        source_id: impl Into<String>,
        destination_type: impl Into<String>,
        destination_id: impl Into<String>,
    ) -> Self {
        Self {
            source_type: source_type.into(),
            source_id: source_id.into(),
            destination_type: destination_type.into(),
            destination_id: destination_id.into(),
        }
    }
}

/// Links in emission order, each edge recorded once.
#[derive(Debug, Clone, Default)]
pub struct LinkList {
    links: Vec<Link>,
    seen: HashSet<Link>,
}

impl LinkList {
    pub fn push(&mut self, link: Link) -> bool {
        if self.seen.contains(&link) {
            return false;
        }
        self.seen.insert(link.clone());
        self.links.push(link);
        true
    }

    pub fn as_slice(&self) -> &[Link] {
        &self.links
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn contains(&self, link: &Link) -> bool {
        self.seen.contains(link)
    }
}

/// A data file that must be transferred alongside the metadata bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFile {
    pub uuid: String,
    pub name: String,
    pub url: String,
}

/// Deduplicated entities for one bundle plus every structural edge between them.
#[derive(Debug, Clone)]
pub struct ResolvedGraph {
    pub project: Entity,
    pub biomaterials: OrderedMap<Entity>,
    pub processes: OrderedMap<Entity>,
    pub protocols: OrderedMap<Entity>,
    pub files: OrderedMap<Entity>,
    pub links: LinkList,
}

impl ResolvedGraph {
    pub fn new(project: Entity) -> Self {
        Self {
            project,
            biomaterials: OrderedMap::new(),
            processes: OrderedMap::new(),
            protocols: OrderedMap::new(),
            files: OrderedMap::new(),
            links: LinkList::default(),
        }
    }

    pub fn entities(&self, category: EntityCategory) -> Vec<&Entity> {
        match category {
            EntityCategory::Project => vec![&self.project],
            EntityCategory::Biomaterial => self.biomaterials.values().collect(),
            EntityCategory::Process => self.processes.values().collect(),
            EntityCategory::Protocol => self.protocols.values().collect(),
            EntityCategory::File => self.files.values().collect(),
        }
    }

    pub fn ids(&self, category: EntityCategory) -> Vec<String> {
        self.entities(category)
            .into_iter()
            .map(|entity| entity.id().to_string())
            .collect()
    }

    /// Files carrying a name and cloud location, in bundle order.
    pub fn data_files(&self) -> Vec<DataFile> {
        self.files
            .values()
            .filter_map(|file| {
                Some(DataFile {
                    uuid: file.id().to_string(),
                    name: file.field_str("fileName")?.to_string(),
                    url: file.field_str("cloudUrl")?.to_string(),
                })
            })
            .collect()
    }

    pub fn to_json(&self) -> Value {
        let contents = |map: &OrderedMap<Entity>| {
            map.values()
                .map(|entity| entity.content().cloned().unwrap_or(Value::Null))
                .collect::<Vec<_>>()
        };
        json!({
            "project": self.project.content().cloned().unwrap_or(Value::Null),
            "protocols": contents(&self.protocols),
            "biomaterials": contents(&self.biomaterials),
            "processes": contents(&self.processes),
            "files": contents(&self.files),
            "links": self.links.as_slice(),
        })
    }
}

#[derive(Debug, Default)]
struct AssayDraft {
    sample_id: Option<String>,
    files: Vec<String>,
    lanes: Vec<Map<String, Value>>,
    seq_extras: Map<String, Value>,
}

pub struct SheetGraphResolver;

impl SheetGraphResolver {
    pub fn resolve(records: SheetRecords) -> Result<ResolvedGraph, BrokerError> {
        let SheetRecords {
            mut project,
            protocols,
            samples,
            supplements,
            assay_parts,
            files,
        } = records;

        let project_id = take_id(&mut project, "project_id")?.ok_or_else(|| {
            BrokerError::Validation("project must have a project_id attribute".to_string())
        })?;
        project.insert("project_id".to_string(), Value::String(project_id.clone()));
        project.insert("core".to_string(), json!({ "type": "project" }));
        let mut graph = ResolvedGraph::new(Entity::local(
            EntityCategory::Project,
            project_id.clone(),
            SpecificType::Named("project".to_string()),
            project,
        ));

        for mut protocol in protocols {
            let id = required_id(&protocol, "protocol_id", "protocol")?;
            protocol.insert("core".to_string(), json!({ "type": "protocol" }));
            let entity = Entity::local(
                EntityCategory::Protocol,
                id.clone(),
                SpecificType::Named("protocol".to_string()),
                protocol,
            );
            graph.protocols.insert_with(id.clone(), entity, merge_entities);
            graph
                .links
                .push(Link::new("protocol", id, "project", project_id.clone()));
        }

        for sample in samples {
            let mut fields = sample.fields;
            let id = required_id(&fields, "sample_id", "sample")?;
            fields.insert("core".to_string(), json!({ "type": "sample" }));
            let entity = Entity::local(
                EntityCategory::Biomaterial,
                id.clone(),
                SpecificType::Named(sample.kind),
                fields,
            );
            if !graph.biomaterials.insert_with(id.clone(), entity, merge_entities) {
                debug!(sample_id = %id, "merged duplicate sample rows");
            }
        }

        for supplement in supplements {
            let sample = graph
                .biomaterials
                .get_mut(&supplement.sample_id)
                .ok_or_else(|| {
                    BrokerError::referential(&supplement.sheet, &supplement.sample_id)
                })?;
            apply_supplement(
                sample,
                &supplement.parent,
                &supplement.field,
                supplement.value,
                supplement.append,
            );
        }

        Self::link_samples(&mut graph)?;
        Self::resolve_files_and_assays(&mut graph, &project_id, assay_parts, files)?;

        Ok(graph)
    }

    fn link_samples(graph: &mut ResolvedGraph) -> Result<(), BrokerError> {
        let mut links = Vec::new();
        for (sample_id, sample) in graph.biomaterials.iter() {
            let content = sample.content();
            for parent in id_list(content.and_then(|c| c.get("derived_from"))) {
                if !graph.biomaterials.contains(&parent) {
                    return Err(BrokerError::referential(sample_id, parent));
                }
                links.push(Link::new("biomaterial", parent, "biomaterial", sample_id));
            }
            for protocol in id_list(content.and_then(|c| c.get("protocol_ids"))) {
                if !graph.protocols.contains(&protocol) {
                    return Err(BrokerError::referential(sample_id, protocol));
                }
                links.push(Link::new("biomaterial", sample_id, "protocol", protocol));
            }
        }
        for link in links {
            graph.links.push(link);
        }
        Ok(())
    }

    fn resolve_files_and_assays(
        graph: &mut ResolvedGraph,
        project_id: &str,
        assay_parts: Vec<crate::converter::AssayPart>,
        files: Vec<Map<String, Value>>,
    ) -> Result<(), BrokerError> {
        let mut drafts: OrderedMap<AssayDraft> = OrderedMap::new();

        for mut file in files {
            let filename = take_id(&mut file, "filename")?
                .ok_or_else(|| BrokerError::Validation("files must have a filename".to_string()))?;
            let assay_id = take_id(&mut file, "assay_id")?.ok_or_else(|| {
                BrokerError::Validation(format!("file {filename} must be linked to an assay"))
            })?;
            let sample_id = take_id(&mut file, "sample_id")?;
            let seq = file.remove("seq");

            if let Some(sample_id) = &sample_id {
                if !graph.biomaterials.contains(sample_id) {
                    return Err(BrokerError::referential(&filename, sample_id));
                }
                graph
                    .links
                    .push(Link::new("file", filename.clone(), "biomaterial", sample_id.clone()));
            }

            drafts.insert(assay_id.clone(), AssayDraft::default());
            if let Some(draft) = drafts.get_mut(&assay_id) {
                if draft.sample_id.is_none() {
                    draft.sample_id = sample_id;
                }
                draft.files.push(filename.clone());
                if let Some(Value::Object(seq)) = seq {
                    record_lane(draft, &filename, &seq);
                }
            }

            file.insert("filename".to_string(), Value::String(filename.clone()));
            file.insert("core".to_string(), json!({ "type": "file" }));
            let entity = Entity::local(
                EntityCategory::File,
                filename.clone(),
                SpecificType::Named("file".to_string()),
                file,
            );
            graph.files.insert_with(filename, entity, merge_entities);
        }

        let mut defaults = Map::new();
        let mut specific: HashMap<String, Map<String, Value>> = HashMap::new();
        for part in assay_parts {
            let patch = nest_path(&part.path, part.value);
            match part.assay_id {
                None => overlay(&mut defaults, patch),
                Some(assay_id) => {
                    if !drafts.contains(&assay_id) {
                        return Err(BrokerError::referential(
                            format!("assay {} sheet", part.path.join(".")),
                            assay_id,
                        ));
                    }
                    overlay(specific.entry(assay_id).or_default(), patch);
                }
            }
        }

        for (assay_id, draft) in drafts.iter() {
            let sample_id = draft.sample_id.as_deref().ok_or_else(|| {
                BrokerError::Validation(format!(
                    "assay {assay_id} must reference a sample using the sample_id attribute"
                ))
            })?;
            if !graph.biomaterials.contains(sample_id) {
                return Err(BrokerError::referential(assay_id, sample_id));
            }

            let mut content = defaults.clone();
            if let Some(patch) = specific.remove(assay_id) {
                overlay(&mut content, patch);
            }
            if !draft.lanes.is_empty() || !draft.seq_extras.is_empty() {
                let mut seq = draft.seq_extras.clone();
                seq.insert(
                    "lanes".to_string(),
                    Value::Array(draft.lanes.iter().cloned().map(Value::Object).collect()),
                );
                overlay(&mut content, nest_path(&["seq".to_string()], Value::Object(seq)));
            }
            content.insert("assay_id".to_string(), Value::String(assay_id.to_string()));
            content.insert("sample_id".to_string(), Value::String(sample_id.to_string()));
            content.insert(
                "files".to_string(),
                Value::Array(draft.files.iter().cloned().map(Value::String).collect()),
            );
            content.insert("core".to_string(), json!({ "type": "assay" }));

            let entity = Entity::local(
                EntityCategory::Process,
                assay_id,
                SpecificType::Named("assay".to_string()),
                content,
            );
            let label = entity.specific_type().as_str().to_string();
            graph.processes.insert(assay_id, entity);

            graph
                .links
                .push(Link::new("biomaterial", sample_id, label.clone(), assay_id));
            for file in &draft.files {
                graph
                    .links
                    .push(Link::new(label.clone(), assay_id, "file", file.clone()));
            }
            graph
                .links
                .push(Link::new(label, assay_id, "project", project_id));
        }
        Ok(())
    }
}

/// Split-sheet rows merge into the first-seen entity; the later row wins on conflicting fields.
fn merge_entities(existing: &mut Entity, duplicate: Entity) {
    let Some(Value::Object(patch)) = duplicate.content().cloned() else {
        return;
    };
    if let Some(content) = existing.content_mut() {
        overlay(content, patch);
    }
}

fn apply_supplement(sample: &mut Entity, parent: &str, field: &str, value: Value, append: bool) {
    let Some(content) = sample.content_mut() else {
        return;
    };
    let holder = content
        .entry(parent.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !holder.is_object() {
        *holder = Value::Object(Map::new());
    }
    let Some(holder) = holder.as_object_mut() else {
        return;
    };
    if append {
        match holder
            .entry(field.to_string())
            .or_insert_with(|| Value::Array(Vec::new()))
        {
            Value::Array(items) => items.push(value),
            other => {
                let previous = other.take();
                *other = Value::Array(vec![previous, value]);
            }
        }
    } else {
        let mut patch = Map::new();
        patch.insert(field.to_string(), value);
        overlay(holder, patch);
    }
}

fn record_lane(draft: &mut AssayDraft, filename: &str, seq: &Map<String, Value>) {
    for key in ["insdc_experiment", "insdc_run"] {
        if let Some(value) = seq.get(key) {
            draft.seq_extras.insert(key.to_string(), value.clone());
        }
    }
    let Some(Value::Object(lane)) = seq.get("lanes") else {
        return;
    };
    let Some(run) = lane.get("run").and_then(Value::as_str) else {
        return;
    };
    let file_value = Value::String(filename.to_string());
    match lane.get("number") {
        Some(number) => {
            if let Some(existing) = draft
                .lanes
                .iter_mut()
                .find(|candidate| candidate.get("number") == Some(number))
            {
                existing.insert(run.to_string(), file_value);
            } else {
                let mut entry = Map::new();
                entry.insert("number".to_string(), number.clone());
                entry.insert(run.to_string(), file_value);
                draft.lanes.push(entry);
            }
        }
        None => {
            let mut entry = Map::new();
            entry.insert(run.to_string(), file_value);
            draft.lanes.push(entry);
        }
    }
}

fn nest_path(path: &[String], value: Value) -> Map<String, Value> {
    let mut nested = value;
    for part in path.iter().skip(1).rev() {
        let mut wrapper = Map::new();
        wrapper.insert(part.clone(), nested);
        nested = Value::Object(wrapper);
    }
    let mut root = Map::new();
    if let Some(head) = path.first() {
        root.insert(head.clone(), nested);
    }
    root
}

fn required_id(
    record: &Map<String, Value>,
    key: &str,
    kind: &str,
) -> Result<String, BrokerError> {
    single_id(record, key)?
        .ok_or_else(|| BrokerError::Validation(format!("{kind} must have a {key} attribute")))
}

/// Reads an id reference that may be a single value or a list of values.
pub fn id_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(id)) => vec![id.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(id) => Some(id.clone()),
                Value::Number(number) => Some(number.to_string()),
                _ => None,
            })
            .collect(),
        Some(Value::Number(number)) => vec![number.to_string()],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_map_first_seen_wins() {
        let mut map = OrderedMap::new();
        assert!(map.insert("b", 1));
        assert!(map.insert("a", 2));
        assert!(!map.insert("b", 3));
        assert_eq!(map.ids().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(map.get("b"), Some(&1));
    }

    #[test]
    fn ordered_map_merges_duplicates_in_place() {
        let mut map = OrderedMap::new();
        map.insert("x", vec![1]);
        map.insert_with("x", vec![2], |existing, extra| existing.extend(extra));
        assert_eq!(map.get("x"), Some(&vec![1, 2]));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn visited_set_drops_revisits() {
        let mut visited = VisitedSet::default();
        assert!(visited.first_visit("donor"));
        assert!(!visited.first_visit("donor"));
        assert_eq!(visited.len(), 1);
    }

    #[test]
    fn link_list_records_each_edge_once() {
        let mut links = LinkList::default();
        assert!(links.push(Link::new("biomaterial", "b1", "assay", "a1")));
        assert!(!links.push(Link::new("biomaterial", "b1", "assay", "a1")));
        assert_eq!(links.len(), 1);
    }

    #[test]
    fn id_list_accepts_scalars_and_lists() {
        assert_eq!(id_list(Some(&json!("p1"))), vec!["p1"]);
        assert_eq!(id_list(Some(&json!(["p1", "p2"]))), vec!["p1", "p2"]);
        assert!(id_list(None).is_empty());
    }
}
