use std::fs;
use std::path::Path;

use camino::Utf8PathBuf;

use kira_unify::domain::GeneId;
use kira_unify::explorer::Explorer;
use kira_unify::store::Store;

fn write_file(root: &Path, dataset: &str, file: &str, content: &str) {
    let dir = root.join(dataset);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(file), content).unwrap();
}

fn explorer_for(root: &Path) -> Explorer {
    let root = Utf8PathBuf::from_path_buf(root.to_path_buf()).unwrap();
    Explorer::new(Store::new(root), 2).unwrap()
}

fn names(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

fn two_datasets(root: &Path) {
    write_file(root, "A", "UD_metadata.csv", "patient_id,sex,age\nA#1,F,30\nA#2,M,40\n");
    write_file(root, "A", "UD_mrna.csv", "gene_id,A#1,A#2\n100,1,2\n");
    write_file(root, "B", "UD_metadata.csv", "patient_id,sex,stage\nB#1,F,II\n");
    write_file(root, "B", "UD_mrna.csv", "gene_id,B#1\n100,3\n200,4\n");
}

#[test]
fn expression_is_outer_joined_across_datasets() {
    let temp = tempfile::tempdir().unwrap();
    two_datasets(temp.path());
    let explorer = explorer_for(temp.path());
    let pool = explorer.create_data_pool(&names(&["A", "B"])).unwrap();

    let expression = pool.get_expression();
    assert_eq!(expression.rows(), [GeneId::new(100), GeneId::new(200)]);
    assert_eq!(expression.columns(), ["A#1", "A#2", "B#1"]);
    assert_eq!(expression.row_values(0), [Some(1.0), Some(2.0), Some(3.0)]);
    assert_eq!(expression.row_values(1), [None, None, Some(4.0)]);
}

#[test]
fn gene_pool_limits_rows_and_patient_pool_limits_columns() {
    let temp = tempfile::tempdir().unwrap();
    two_datasets(temp.path());
    let explorer = explorer_for(temp.path());
    let pool = explorer
        .create_data_pool(&names(&["A", "B"]))
        .unwrap()
        .restrict_by_sex("F")
        .restrict_genes_by_ids(&[GeneId::new(200)]);

    let expression = pool.get_expression();
    assert_eq!(expression.rows(), [GeneId::new(200)]);
    assert_eq!(expression.columns(), ["A#1", "B#1"]);
    assert_eq!(expression.row_values(0), [None, Some(4.0)]);
}

#[test]
fn metadata_is_concatenated_for_pooled_patients() {
    let temp = tempfile::tempdir().unwrap();
    two_datasets(temp.path());
    let explorer = explorer_for(temp.path());
    let pool = explorer
        .create_data_pool(&names(&["A", "B"]))
        .unwrap()
        .restrict_by_sex("F");

    let metadata = pool.get_metadata();
    assert_eq!(metadata.index(), ["A#1", "B#1"]);
    assert_eq!(metadata.columns(), ["sex", "age", "stage"]);
    let written = String::from_utf8(metadata.to_csv_bytes().unwrap()).unwrap();
    assert_eq!(written, "patient_id,sex,age,stage\nA#1,F,30,\nB#1,F,,II\n");
}

#[test]
fn absent_or_unreadable_files_contribute_nothing() {
    let temp = tempfile::tempdir().unwrap();
    two_datasets(temp.path());
    write_file(temp.path(), "C", "UD_metadata.csv", "patient_id,sex\nC#1,F\n");
    write_file(temp.path(), "D", "UD_metadata.csv", "patient_id,sex\nD#1,F,extra\n");
    write_file(temp.path(), "D", "UD_mrna.csv", "gene_id,D#1\nnot-a-gene,1\n");
    let explorer = explorer_for(temp.path());
    let pool = explorer
        .create_data_pool(&names(&["A", "B", "C", "D"]))
        .unwrap();

    assert_eq!(pool.datasets().len(), 4);
    assert_eq!(pool.patients().len(), 4);
    let expression = pool.get_expression();
    assert_eq!(expression.columns(), ["A#1", "A#2", "B#1"]);
    assert_eq!(expression.rows().len(), 2);
}

#[test]
fn empty_pool_yields_empty_tables() {
    let temp = tempfile::tempdir().unwrap();
    let explorer = explorer_for(temp.path());
    let pool = explorer.create_data_pool(&names(&["A"])).unwrap();

    assert!(pool.datasets().is_empty());
    assert!(pool.get_metadata().is_empty());
    assert!(pool.get_expression().is_empty());
}

#[test]
fn unrestricted_genes_keep_every_row_but_only_pooled_columns() {
    let temp = tempfile::tempdir().unwrap();
    two_datasets(temp.path());
    write_file(temp.path(), "A", "UD_mrna.csv", "gene_id,A#1,A#2\n100,1,2\n200,3,4\n");
    let explorer = explorer_for(temp.path());
    let pool = explorer
        .create_data_pool(&names(&["A"]))
        .unwrap()
        .restrict_by_sex("F");

    assert!(pool.genes().is_unrestricted());
    let expression = pool.get_expression();
    assert_eq!(expression.rows(), [GeneId::new(100), GeneId::new(200)]);
    assert_eq!(expression.columns(), ["A#1"]);
    assert_eq!(expression.row_values(1), [Some(3.0)]);
}
