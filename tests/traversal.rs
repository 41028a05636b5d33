mod common;

use std::collections::HashSet;

use assert_matches::assert_matches;

use common::{MockStore, assay_store, entity};
use ingest_broker::domain::EntityCategory;
use ingest_broker::error::BrokerError;
use ingest_broker::graph::Link;
use ingest_broker::traversal::BundleTraversal;

#[test]
fn collects_every_ancestor_once() {
    let (store, assay) = assay_store();
    let graph = BundleTraversal::new(&store).resolve(&assay).unwrap();

    assert_eq!(graph.project.id(), "proj-1");
    assert_eq!(
        graph.biomaterials.ids().collect::<Vec<_>>(),
        vec!["cs-1", "specimen-1", "specimen-2", "donor-1"]
    );
    assert_eq!(graph.files.len(), 2);
    assert_eq!(graph.protocols.len(), 3);

    let processes: HashSet<&str> = graph.processes.ids().collect();
    assert_eq!(
        processes,
        HashSet::from(["assay-1", "diss-1", "enr-1", "coll-1", "coll-2"])
    );
}

#[test]
fn chained_process_is_replaced_by_its_members() {
    let (store, assay) = assay_store();
    let graph = BundleTraversal::new(&store).resolve(&assay).unwrap();

    assert!(!graph.processes.contains("wrap-1"));
    assert!(graph.links.as_slice().iter().all(|link| {
        link.source_id != "wrap-1" && link.destination_id != "wrap-1"
    }));
    for (label, id) in [("dissociation_process", "diss-1"), ("enrichment_process", "enr-1")] {
        assert!(graph.links.contains(&Link::new(label, id, "biomaterial", "cs-1")));
        assert!(graph.links.contains(&Link::new("biomaterial", "specimen-1", label, id)));
        assert!(graph.links.contains(&Link::new("biomaterial", "specimen-2", label, id)));
    }
    assert!(graph.links.contains(&Link::new(
        "dissociation_process",
        "diss-1",
        "protocol",
        "prot-diss"
    )));
}

#[test]
fn assay_links_cover_inputs_files_protocols_and_project() {
    let (store, assay) = assay_store();
    let graph = BundleTraversal::new(&store).resolve(&assay).unwrap();
    let label = "sequencing_process";

    assert!(graph.links.contains(&Link::new("biomaterial", "cs-1", label, "assay-1")));
    assert!(graph.links.contains(&Link::new(label, "assay-1", "file", "file-1")));
    assert!(graph.links.contains(&Link::new(label, "assay-1", "file", "file-2")));
    assert!(graph.links.contains(&Link::new(label, "assay-1", "protocol", "prot-lib")));
    assert!(graph.links.contains(&Link::new(label, "assay-1", "project", "proj-1")));
}

#[test]
fn shared_donor_yields_no_duplicate_links() {
    let (store, assay) = assay_store();
    let graph = BundleTraversal::new(&store).resolve(&assay).unwrap();

    let unique: HashSet<&Link> = graph.links.as_slice().iter().collect();
    assert_eq!(unique.len(), graph.links.len());
    let donor_edges = graph
        .links
        .as_slice()
        .iter()
        .filter(|link| link.source_id == "donor-1")
        .count();
    assert_eq!(donor_edges, 2);
}

#[test]
fn assay_without_project_is_rejected() {
    let mut store = MockStore::default();
    let assay = entity(EntityCategory::Process, "assay-9", "sequencing_process");
    store.add(&assay);

    let result = BundleTraversal::new(&store).resolve(&assay);
    assert_matches!(
        result,
        Err(BrokerError::ProjectCardinality { assay, found: 0 }) if assay == "assay-9"
    );
}

#[test]
fn assay_with_two_projects_is_rejected() {
    let mut store = MockStore::default();
    let assay = entity(EntityCategory::Process, "assay-9", "sequencing_process");
    let first = entity(EntityCategory::Project, "p-1", "project");
    let second = entity(EntityCategory::Project, "p-2", "project");
    store.relate(&assay, "projects", &[&first, &second]);

    let result = BundleTraversal::new(&store).resolve(&assay);
    assert_matches!(result, Err(BrokerError::ProjectCardinality { found: 2, .. }));
}
