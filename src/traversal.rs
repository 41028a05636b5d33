//! Reconstructs the derivation graph behind one assay from the remote entity store.
//!
//! The walk is breadth-first over biomaterials, starting from the assay's direct inputs.
//! A producing process that declares `chainedProcesses` is replaced by its chain members;
//! the chain's inputs are still read from the wrapper process.

use std::collections::VecDeque;

use tracing::{debug, info};

use crate::domain::{Entity, EntityCategory};
use crate::error::BrokerError;
use crate::graph::{Link, ResolvedGraph, VisitedSet};
use crate::ingest::EntityStore;

pub struct BundleTraversal<'a, S: EntityStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: EntityStore + ?Sized> BundleTraversal<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub fn resolve(&self, assay: &Entity) -> Result<ResolvedGraph, BrokerError> {
        let mut projects =
            self.store
                .related_entities("projects", assay, EntityCategory::Project)?;
        if projects.len() != 1 {
            return Err(BrokerError::ProjectCardinality {
                assay: assay.id().to_string(),
                found: projects.len(),
            });
        }
        let project = projects.remove(0);
        let project_id = project.id().to_string();
        let mut graph = ResolvedGraph::new(project);

        let direct_inputs =
            self.store
                .related_entities("inputBiomaterials", assay, EntityCategory::Biomaterial)?;

        let mut visited = VisitedSet::default();
        let mut queue = VecDeque::new();
        for input in &direct_inputs {
            graph.biomaterials.insert(input.id(), input.clone());
            queue.push_back(input.clone());
        }

        while let Some(biomaterial) = queue.pop_front() {
            if !visited.first_visit(biomaterial.id()) {
                continue;
            }
            for producer in self.store.related_entities(
                "derivedByProcesses",
                &biomaterial,
                EntityCategory::Process,
            )? {
                let inputs = self.store.related_entities(
                    "inputBiomaterials",
                    &producer,
                    EntityCategory::Biomaterial,
                )?;
                for effective in self.effective_processes(producer)? {
                    let label = effective.specific_type().as_str().to_string();
                    graph.links.push(Link::new(
                        label.clone(),
                        effective.id(),
                        "biomaterial",
                        biomaterial.id(),
                    ));
                    for input in &inputs {
                        graph.links.push(Link::new(
                            "biomaterial",
                            input.id(),
                            label.clone(),
                            effective.id(),
                        ));
                    }
                    self.add_protocols(&mut graph, &effective, &label)?;
                    graph.processes.insert(effective.id().to_string(), effective);
                }
                for input in inputs {
                    if !visited.contains(input.id()) {
                        graph.biomaterials.insert(input.id(), input.clone());
                        queue.push_back(input);
                    }
                }
            }
        }
        debug!(visited = visited.len(), "biomaterial traversal finished");

        let files = self
            .store
            .related_entities("derivedFiles", assay, EntityCategory::File)?;
        for effective in self.effective_processes(assay.clone())? {
            let label = effective.specific_type().as_str().to_string();
            for input in &direct_inputs {
                graph.links.push(Link::new(
                    "biomaterial",
                    input.id(),
                    label.clone(),
                    effective.id(),
                ));
            }
            for file in &files {
                graph.files.insert(file.id(), file.clone());
                graph
                    .links
                    .push(Link::new(label.clone(), effective.id(), "file", file.id()));
            }
            self.add_protocols(&mut graph, &effective, &label)?;
            graph.links.push(Link::new(
                label,
                effective.id(),
                "project",
                project_id.clone(),
            ));
            graph.processes.insert(effective.id().to_string(), effective);
        }

        info!(
            assay = assay.id(),
            biomaterials = graph.biomaterials.len(),
            processes = graph.processes.len(),
            protocols = graph.protocols.len(),
            files = graph.files.len(),
            links = graph.links.len(),
            "assay graph resolved"
        );
        Ok(graph)
    }

    /// A process with chain members stands for those members; otherwise for itself.
    fn effective_processes(&self, process: Entity) -> Result<Vec<Entity>, BrokerError> {
        let chained =
            self.store
                .related_entities("chainedProcesses", &process, EntityCategory::Process)?;
        if chained.is_empty() {
            Ok(vec![process])
        } else {
            Ok(chained)
        }
    }

    fn add_protocols(
        &self,
        graph: &mut ResolvedGraph,
        process: &Entity,
        label: &str,
    ) -> Result<(), BrokerError> {
        for protocol in
            self.store
                .related_entities("protocols", process, EntityCategory::Protocol)?
        {
            graph
                .links
                .push(Link::new(label, process.id(), "protocol", protocol.id()));
            graph.protocols.insert(protocol.id().to_string(), protocol);
        }
        Ok(())
    }
}
