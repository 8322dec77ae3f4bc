use std::fs;
use std::path::Path;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use kira_unify::app::{App, ProgressEvent, ProgressSink, QueryRequest, SterilizeOptions};
use kira_unify::config::ResolvedConfig;
use kira_unify::domain::GeneId;
use kira_unify::normalize::ArtifactStatus;
use kira_unify::output::JsonOutput;
use kira_unify::resolver::TableResolver;

#[derive(Default)]
struct RecordingSink {
    messages: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.messages.lock().unwrap().push(event.message);
    }
}

fn write_dataset(root: &Path, name: &str, patients: &str, mrna: &str) {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("md_config.json"),
        r#"{
            "sex": {"MAP": "STR_MAP", "HEADER": "gender", "DATA": {"female": "F", "male": "M"}},
            "age": {"MAP": "NUM", "HEADER": "age"}
        }"#,
    )
    .unwrap();
    fs::write(dir.join("patients.csv"), patients).unwrap();
    fs::write(dir.join("mrna.csv"), mrna).unwrap();
}

fn app_for(root: &Path) -> App<TableResolver> {
    let root = Utf8PathBuf::from_path_buf(root.to_path_buf()).unwrap();
    let config = ResolvedConfig::for_root(root, vec!["sex".to_string(), "age".to_string()]);
    let resolver = TableResolver::from_pairs([
        ("TP53".to_string(), GeneId::new(7157)),
        ("BRCA1".to_string(), GeneId::new(672)),
    ]);
    App::new(config, resolver)
}

fn corpus(root: &Path) {
    write_dataset(
        root,
        "A",
        "id,gender,age\n1,female,30\n2,male,40\n",
        "symbol,1,2\nTP53,1,2\nBRCA1,3,4\n",
    );
    write_dataset(
        root,
        "B",
        "id,gender,age\n1,female,40\n2,female,50\n",
        "symbol,1,2\nTP53,5,6\n",
    );
}

#[test]
fn sterilize_then_query_end_to_end() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("DataSets");
    corpus(&root);
    let app = app_for(&root);
    let sink = RecordingSink::default();

    let report = app
        .sterilize(None, SterilizeOptions { force: false }, &sink)
        .unwrap();
    assert_eq!(report.datasets.len(), 2);
    assert_eq!(report.failures(), 0);
    assert!(
        report
            .datasets
            .iter()
            .all(|entry| entry.metadata.is_written() && entry.expression.is_written())
    );
    assert!(!sink.messages.lock().unwrap().is_empty());

    let out = Utf8PathBuf::from_path_buf(temp.path().join("out")).unwrap();
    let result = app
        .query(
            QueryRequest {
                sex: Some("F".to_string()),
                max_age: Some(45.0),
                symbols: vec!["TP53".to_string()],
                output_dir: out.clone(),
                ..QueryRequest::default()
            },
            &JsonOutput,
        )
        .unwrap();

    assert_eq!(result.datasets, vec!["A", "B"]);
    assert_eq!(result.patients, 2);
    assert_eq!(result.genes_in_pool, 1);
    assert_eq!((result.expression_rows, result.expression_columns), (1, 2));
    assert_eq!(
        fs::read_to_string(out.join("mrna.csv")).unwrap(),
        "gene_id,A#1,B#1\n7157,1,5\n"
    );
    assert_eq!(
        fs::read_to_string(out.join("metadata.csv")).unwrap(),
        "patient_id,sex,age\nA#1,F,30\nB#1,F,40\n"
    );
}

#[test]
fn query_excludes_datasets() {
    let temp = tempfile::tempdir().unwrap();
    corpus(temp.path());
    let app = app_for(temp.path());
    app.sterilize(None, SterilizeOptions::default(), &JsonOutput)
        .unwrap();

    let out = Utf8PathBuf::from_path_buf(temp.path().join("out")).unwrap();
    let result = app
        .query(
            QueryRequest {
                exclude: vec!["B".to_string()],
                gene_ids: vec![GeneId::new(672)],
                output_dir: out,
                ..QueryRequest::default()
            },
            &JsonOutput,
        )
        .unwrap();

    assert_eq!(result.datasets, vec!["A"]);
    assert_eq!(result.patients, 2);
    assert_eq!((result.expression_rows, result.expression_columns), (1, 2));
}

#[test]
fn sterilize_named_targets_and_list() {
    let temp = tempfile::tempdir().unwrap();
    corpus(temp.path());
    let app = app_for(temp.path());

    let report = app
        .sterilize(
            Some(vec!["A".to_string(), "MISSING".to_string()]),
            SterilizeOptions::default(),
            &JsonOutput,
        )
        .unwrap();
    assert_eq!(report.datasets.len(), 2);
    assert!(matches!(
        report.dataset("MISSING").unwrap().metadata,
        ArtifactStatus::Skipped { .. }
    ));

    let listed = app.list(&JsonOutput).unwrap();
    let states: Vec<(String, bool)> = listed
        .datasets
        .iter()
        .map(|status| (status.dataset.clone(), status.is_normalized()))
        .collect();
    assert_eq!(
        states,
        vec![("A".to_string(), true), ("B".to_string(), false)]
    );
    assert!(listed.datasets.iter().all(|status| status.mapping_config));
}

#[test]
fn invalid_target_name_is_skipped_and_siblings_still_run() {
    let temp = tempfile::tempdir().unwrap();
    corpus(temp.path());
    let app = app_for(temp.path());

    let report = app
        .sterilize(
            Some(vec!["A".to_string(), "bad#name".to_string(), "../escape".to_string()]),
            SterilizeOptions::default(),
            &JsonOutput,
        )
        .unwrap();

    assert_eq!(report.datasets.len(), 3);
    let valid = report.dataset("A").unwrap();
    assert!(valid.metadata.is_written());
    assert!(valid.expression.is_written());
    assert!(temp.path().join("A").join("UD_mrna.csv").is_file());

    for name in ["bad#name", "../escape"] {
        let entry = report.dataset(name).unwrap();
        assert_matches!(&entry.metadata, ArtifactStatus::Skipped { reason } if reason == "invalid dataset name");
        assert_matches!(&entry.expression, ArtifactStatus::Skipped { .. });
    }
    assert_eq!(report.failures(), 0);
}
