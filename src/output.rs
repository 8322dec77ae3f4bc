use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::app::{ListResult, ProgressEvent, ProgressSink, QueryResult};
use crate::normalize::{ArtifactStatus, SterilizeReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_sterilize(report: &SterilizeReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_list(result: &ListResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_query(result: &QueryResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

pub fn print_sterilize_summary(report: &SterilizeReport) {
    println!("{CYAN}KIRA-UNIFY sterilize: {}{RESET}", report.root);
    let written = report
        .datasets
        .iter()
        .flat_map(|dataset| [&dataset.metadata, &dataset.expression])
        .filter(|status| status.is_written())
        .count();
    println!("{GREEN}Artifacts written: {written}{RESET}");
    let failures = report.failures();
    let color = if failures > 0 { RED } else { YELLOW };
    println!("{color}Failures: {failures}{RESET}");

    for dataset in &report.datasets {
        println!("  {}", dataset.dataset);
        for (label, status) in [
            ("metadata", &dataset.metadata),
            ("expression", &dataset.expression),
        ] {
            let line = match status {
                ArtifactStatus::Written { rows, columns } => {
                    format!("{GREEN}    {label}: written {rows} x {columns}{RESET}")
                }
                ArtifactStatus::UpToDate => format!("{GREEN}    {label}: up to date{RESET}"),
                ArtifactStatus::Skipped { reason } => {
                    format!("{YELLOW}    {label}: skipped ({reason}){RESET}")
                }
                ArtifactStatus::Failed { error, .. } => {
                    format!("{RED}    {label}: failed ({error}){RESET}")
                }
            };
            println!("{line}");
        }
    }

    if report.resolver_outage {
        println!("{RED}Gene resolver unavailable for the whole batch{RESET}");
    }
}

pub fn print_list_summary(result: &ListResult) {
    println!("{CYAN}KIRA-UNIFY datasets in {}{RESET}", result.root);
    if result.datasets.is_empty() {
        println!("{YELLOW}No datasets found{RESET}");
        return;
    }
    for status in &result.datasets {
        let (color, state) = if status.is_normalized() {
            (GREEN, "normalized")
        } else {
            (YELLOW, "raw")
        };
        println!(
            "{color}  {} ({state}) metadata={} mrna={} config={}{RESET}",
            status.dataset,
            mark(status.raw_metadata),
            mark(status.raw_expression),
            mark(status.mapping_config),
        );
    }
}

pub fn print_query_summary(result: &QueryResult) {
    println!("{CYAN}KIRA-UNIFY query{RESET}");
    println!("{GREEN}Datasets: {}{RESET}", result.datasets.join(", "));
    println!("{GREEN}Patients: {}{RESET}", result.patients);
    if result.genes_in_pool > 0 {
        println!("{GREEN}Genes in pool: {}{RESET}", result.genes_in_pool);
    }
    println!(
        "{GREEN}Expression: {} genes x {} patients{RESET}",
        result.expression_rows, result.expression_columns
    );
    println!("{CYAN}  metadata: {}{RESET}", result.metadata_path);
    println!("{CYAN}  mrna: {}{RESET}", result.expression_path);
}

fn mark(present: bool) -> &'static str {
    if present { "yes" } else { "no" }
}
