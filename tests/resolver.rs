use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use serde_json::json;

use kira_unify::config::ResolverSettings;
use kira_unify::domain::GeneId;
use kira_unify::error::UnifyError;
use kira_unify::resolver::{GeneResolver, MyGeneHttpClient, TableResolver, parse_query_response};

fn symbols(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[test]
fn query_response_accepts_string_and_number_ids() {
    let raw = json!([
        {"query": "TP53", "_id": "7157", "entrezgene": "7157"},
        {"query": "BRCA1", "_id": "672", "entrezgene": 672},
        {"query": "NOPE", "notfound": true},
        {"query": "ODD", "entrezgene": ["1"]}
    ]);
    let pairs = parse_query_response(&raw).unwrap();
    assert_eq!(
        pairs,
        vec![
            ("TP53".to_string(), Some(GeneId::new(7157))),
            ("BRCA1".to_string(), Some(GeneId::new(672))),
            ("NOPE".to_string(), None),
            ("ODD".to_string(), None),
        ]
    );

    assert_matches!(
        parse_query_response(&json!({"error": "bad"})),
        Err(UnifyError::ResolverResponse(_))
    );
}

#[test]
fn table_resolver_answers_every_symbol() {
    let resolver = TableResolver::from_pairs([
        ("TP53".to_string(), GeneId::new(7157)),
        ("TP53".to_string(), GeneId::new(1)),
    ]);
    assert_eq!(resolver.len(), 1);

    let resolved = resolver.resolve(&symbols(&["TP53", "MISSING"])).unwrap();
    assert_eq!(resolved.len(), 2);
    assert_eq!(resolved["TP53"], Some(GeneId::new(7157)));
    assert_eq!(resolved["MISSING"], None);
}

#[test]
fn table_resolver_loads_csv() {
    let temp = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(temp.path().join("genes.csv")).unwrap();
    std::fs::write(
        path.as_std_path(),
        "symbol,gene_id\nTP53,7157\nBRCA1,672.0\nEMPTY,\n",
    )
    .unwrap();

    let resolver = TableResolver::load(&path).unwrap();
    assert_eq!(resolver.len(), 2);
    let resolved = resolver.resolve(&symbols(&["BRCA1"])).unwrap();
    assert_eq!(resolved["BRCA1"], Some(GeneId::new(672)));

    std::fs::write(path.as_std_path(), "symbol,gene_id\nTP53,p53\n").unwrap();
    assert_matches!(
        TableResolver::load(&path),
        Err(UnifyError::MalformedTable { .. })
    );
}

#[test]
fn unreachable_service_is_a_resolver_error() {
    let settings = ResolverSettings {
        base_url: "http://127.0.0.1:9".to_string(),
        timeout: Duration::from_secs(1),
        ..ResolverSettings::default()
    };
    let client = MyGeneHttpClient::new(&settings).unwrap();
    let err = client.resolve(&symbols(&["TP53"])).unwrap_err();
    assert!(err.is_resolver());
}

#[test]
fn empty_symbol_list_needs_no_request() {
    let settings = ResolverSettings {
        base_url: "http://127.0.0.1:9".to_string(),
        ..ResolverSettings::default()
    };
    let client = MyGeneHttpClient::new(&settings).unwrap();
    assert!(client.resolve(&[]).unwrap().is_empty());
}

#[test]
fn silent_service_times_out() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();
    let settings = ResolverSettings {
        base_url: format!("http://{address}"),
        timeout: Duration::from_millis(300),
        ..ResolverSettings::default()
    };
    let client = MyGeneHttpClient::new(&settings).unwrap();

    let err = client.resolve(&symbols(&["TP53"])).unwrap_err();
    assert_matches!(err, UnifyError::ResolverTimeout(_));
    assert!(err.is_resolver());
    drop(listener);
}
