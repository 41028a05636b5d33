use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use serde_json::{Map, Value, json};

use ingest_broker::config::default_list_keys;
use ingest_broker::converter::{SampleRecord, SheetRecords};
use ingest_broker::error::BrokerError;
use ingest_broker::graph::{Link, SheetGraphResolver};
use ingest_broker::uploader::resolve_sheet_dir;

fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

fn write_sheets(dir: &tempfile::TempDir, sheets: &[(&str, &str)]) -> Utf8PathBuf {
    for (name, content) in sheets {
        fs::write(dir.path().join(format!("{name}.tsv")), content).unwrap();
    }
    Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap()
}

fn base_records() -> SheetRecords {
    SheetRecords {
        project: object(json!({ "project_id": "pancreas" })),
        protocols: vec![object(json!({ "protocol_id": "dissociation" }))],
        samples: vec![
            SampleRecord {
                kind: "donor".to_string(),
                fields: object(json!({ "sample_id": "d1" })),
            },
            SampleRecord {
                kind: "cell_suspension".to_string(),
                fields: object(json!({
                    "sample_id": "cs1",
                    "derived_from": "d1",
                    "protocol_ids": ["dissociation"]
                })),
            },
        ],
        ..SheetRecords::default()
    }
}

#[test]
fn converts_sheet_directory_into_linked_graph() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_sheets(
        &dir,
        &[
            (
                "project",
                "project_id\tpancreas\nproject_core.project_shortname\tPancreas atlas\n",
            ),
            ("project.publications", "title\tdoi\nIslets\t10.1/abc\n"),
            ("protocols", "protocol_id\tprotocol_type\ndissociation\tenzymatic\n"),
            ("sample.donor", "sample_id\tdonor.is_living\nd1\tno\n"),
            (
                "sample.specimen_from_organism",
                "sample_id\tderived_from\tspecimen_from_organism.organ\ns1\td1\tpancreas\n",
            ),
            (
                "sample.specimen_from_organism.s",
                "sample_id\tstate_of_specimen.ischemic_time\ns1\t100\n",
            ),
            (
                "sample.cell_suspension",
                "sample_id\tderived_from\tprotocol_ids\ncs1\ts1\tdissociation\n",
            ),
            (
                "file",
                "filename\tassay_id\tsample_id\tseq.lanes.number\tseq.lanes.run\n\
                 r1.fastq\ta1\tcs1\t1\tread1\n\
                 r2.fastq\ta1\tcs1\t1\tread2\n",
            ),
            ("seq", "seq.instrument_platform\nIllumina\n"),
        ],
    );

    let graph = resolve_sheet_dir(&path, &default_list_keys()).unwrap();
    assert_eq!(graph.project.id(), "pancreas");
    assert_eq!(
        graph.project.content().unwrap()["publications"][0]["doi"],
        "10.1/abc"
    );
    assert_eq!(
        graph.biomaterials.ids().collect::<Vec<_>>(),
        vec!["d1", "s1", "cs1"]
    );
    let specimen = graph.biomaterials.get("s1").unwrap();
    assert_eq!(
        specimen.content().unwrap()["specimen_from_organism"]["state_of_specimen"]["ischemic_time"],
        "100"
    );

    let assay = graph.processes.get("a1").unwrap().content().unwrap();
    assert_eq!(assay["seq"]["instrument_platform"], "Illumina");
    assert_eq!(
        assay["seq"]["lanes"],
        json!([{ "number": "1", "read1": "r1.fastq", "read2": "r2.fastq" }])
    );
    assert_eq!(assay["files"], json!(["r1.fastq", "r2.fastq"]));

    for link in [
        Link::new("biomaterial", "d1", "biomaterial", "s1"),
        Link::new("biomaterial", "s1", "biomaterial", "cs1"),
        Link::new("biomaterial", "cs1", "protocol", "dissociation"),
        Link::new("protocol", "dissociation", "project", "pancreas"),
        Link::new("file", "r1.fastq", "biomaterial", "cs1"),
        Link::new("biomaterial", "cs1", "assay", "a1"),
        Link::new("assay", "a1", "file", "r2.fastq"),
        Link::new("assay", "a1", "project", "pancreas"),
    ] {
        assert!(graph.links.contains(&link), "missing {link:?}");
    }
}

#[test]
fn missing_project_sheet_is_a_validation_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_sheets(&dir, &[("protocols", "protocol_id\np1\n")]);
    assert_matches!(
        resolve_sheet_dir(&path, &default_list_keys()),
        Err(BrokerError::Validation(_))
    );
}

#[test]
fn duplicate_sample_rows_become_one_biomaterial() {
    let mut records = base_records();
    records.samples.push(SampleRecord {
        kind: "donor".to_string(),
        fields: object(json!({ "sample_id": "d1", "donor": { "sex": "female" } })),
    });

    let graph = SheetGraphResolver::resolve(records).unwrap();
    assert_eq!(graph.biomaterials.len(), 2);
    assert_eq!(
        graph.biomaterials.get("d1").unwrap().content().unwrap()["donor"]["sex"],
        "female"
    );
    let derived = graph
        .links
        .as_slice()
        .iter()
        .filter(|link| link.source_id == "d1")
        .count();
    assert_eq!(derived, 1);
}

#[test]
fn assay_referencing_unknown_biomaterial_names_it() {
    let mut records = base_records();
    records
        .files
        .push(object(json!({ "filename": "r1.fastq", "assay_id": "a1", "sample_id": "ghost" })));

    let err = SheetGraphResolver::resolve(records).unwrap_err();
    assert!(err.to_string().contains("ghost"));
    assert_matches!(err, BrokerError::ReferentialIntegrity { missing, .. } if missing == "ghost");
}

#[test]
fn unknown_parent_sample_is_rejected() {
    let mut records = base_records();
    records.samples.push(SampleRecord {
        kind: "specimen_from_organism".to_string(),
        fields: object(json!({ "sample_id": "s9", "derived_from": "d9" })),
    });
    assert_matches!(
        SheetGraphResolver::resolve(records),
        Err(BrokerError::ReferentialIntegrity { referencing, missing })
            if referencing == "s9" && missing == "d9"
    );
}

#[test]
fn file_without_assay_is_rejected() {
    let mut records = base_records();
    records.files.push(object(json!({ "filename": "r1.fastq" })));
    assert_matches!(
        SheetGraphResolver::resolve(records),
        Err(BrokerError::Validation(message)) if message.contains("r1.fastq")
    );
}

#[test]
fn sample_without_id_is_rejected() {
    let mut records = base_records();
    records.samples.push(SampleRecord {
        kind: "donor".to_string(),
        fields: object(json!({ "donor": { "is_living": "yes" } })),
    });
    assert_matches!(
        SheetGraphResolver::resolve(records),
        Err(BrokerError::Validation(_))
    );
}

#[test]
fn file_linked_to_several_assays_is_rejected() {
    let mut records = base_records();
    records.files.push(object(json!({
        "filename": "r1.fastq",
        "assay_id": ["a1", "a2"],
        "sample_id": "cs1"
    })));
    assert_matches!(
        SheetGraphResolver::resolve(records),
        Err(BrokerError::Validation(message)) if message.contains("assay_id")
    );
}
