//! Report rendering: table to stdout, JSON / YAML / CSV to a writer. Rows
//! are always sorted by (cluster, namespace, kind, name, container); the
//! runner itself guarantees no ordering.

use crate::model::{ResourceAllocations, ScanReport, ScanResult};
use crate::utils::resource_quantity::{format_cpu_millis, format_memory_bytes};
use anyhow::Result;
use std::io::Write;

fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn fmt_cpu(v: Option<i64>) -> String {
    v.map(format_cpu_millis).unwrap_or_else(|| "-".to_string())
}

fn fmt_mem(v: Option<i64>) -> String {
    v.map(format_memory_bytes).unwrap_or_else(|| "-".to_string())
}

fn fmt_current(a: &ResourceAllocations) -> String {
    format!(
        "{}/{} {}/{}",
        fmt_cpu(a.cpu_request_millis),
        fmt_cpu(a.cpu_limit_millis),
        fmt_mem(a.memory_request_bytes),
        fmt_mem(a.memory_limit_bytes)
    )
}

fn info_text(result: &ScanResult) -> String {
    let mut keys: Vec<&String> = result.info.keys().collect();
    keys.sort();
    keys.iter()
        .map(|k| format!("{}: {}", k, result.info[*k]))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Render the report as an aligned text table.
pub fn write_table<W: Write>(report: &ScanReport, out: &mut W) -> Result<()> {
    const HEADERS: [&str; 9] = [
        "CLUSTER", "NAMESPACE", "KIND", "NAME", "CONTAINER", "STATE", "CPU REQ/LIM",
        "MEM REQ/LIM", "CURRENT",
    ];
    let rows: Vec<[String; 9]> = report
        .sorted_results()
        .iter()
        .map(|r| {
            [
                r.workload.cluster.clone(),
                r.workload.namespace.clone(),
                r.workload.kind.to_string(),
                r.workload.name.clone(),
                r.container.clone(),
                r.state.to_string(),
                format!(
                    "{}/{}",
                    fmt_cpu(r.recommendation.cpu_request_millis),
                    fmt_cpu(r.recommendation.cpu_limit_millis)
                ),
                format!(
                    "{}/{}",
                    fmt_mem(r.recommendation.memory_request_bytes),
                    fmt_mem(r.recommendation.memory_limit_bytes)
                ),
                fmt_current(&r.current),
            ]
        })
        .collect();

    let mut widths: [usize; 9] = HEADERS.map(str::len);
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let render = |cells: &[String; 9]| -> String {
        cells
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{:<width$}", c, width = widths[i]))
            .collect::<Vec<_>>()
            .join("  ")
    };

    writeln!(out, "{}", render(&HEADERS.map(str::to_string)))?;
    for row in &rows {
        writeln!(out, "{}", render(row))?;
    }
    writeln!(out)?;
    writeln!(
        out,
        "{} container(s) across {} scanned cluster(s), run {}",
        report.results.len(),
        report.clusters_scanned,
        report.run_id
    )?;
    for failure in &report.cluster_failures {
        writeln!(out, "cluster {} failed: {}", failure.cluster, failure.error)?;
    }
    Ok(())
}

pub fn write_json<W: Write>(report: &ScanReport, out: &mut W) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, report)?;
    writeln!(out)?;
    Ok(())
}

pub fn write_yaml<W: Write>(report: &ScanReport, out: &mut W) -> Result<()> {
    serde_yaml::to_writer(out, report)?;
    Ok(())
}

/// One row per container slot, recommendation columns in raw integers so
/// spreadsheets can aggregate.
pub fn write_csv<W: Write>(report: &ScanReport, out: &mut W) -> Result<()> {
    writeln!(
        out,
        "cluster,namespace,kind,name,container,state,cpu_request_millis,cpu_limit_millis,memory_request_bytes,memory_limit_bytes,info"
    )?;
    for r in report.sorted_results() {
        let num = |v: Option<i64>| v.map(|n| n.to_string()).unwrap_or_default();
        writeln!(
            out,
            "{},{},{},{},{},{},{},{},{},{},{}",
            escape_csv(&r.workload.cluster),
            escape_csv(&r.workload.namespace),
            r.workload.kind,
            escape_csv(&r.workload.name),
            escape_csv(&r.container),
            r.state,
            num(r.recommendation.cpu_request_millis),
            num(r.recommendation.cpu_limit_millis),
            num(r.recommendation.memory_request_bytes),
            num(r.recommendation.memory_limit_bytes),
            escape_csv(&info_text(r))
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RowState, WorkloadId, WorkloadKind};
    use chrono::Utc;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn sample_report() -> ScanReport {
        let mk = |ns: &str, name: &str, container: &str| ScanResult {
            workload: WorkloadId {
                cluster: "prod".to_string(),
                namespace: ns.to_string(),
                kind: WorkloadKind::Deployment,
                name: name.to_string(),
            },
            container: container.to_string(),
            current: ResourceAllocations::default(),
            recommendation: ResourceAllocations {
                cpu_request_millis: Some(185),
                cpu_limit_millis: None,
                memory_request_bytes: Some(805 * 1024 * 1024),
                memory_limit_bytes: Some(805 * 1024 * 1024),
            },
            state: RowState::Ok,
            info: HashMap::new(),
        };
        ScanReport {
            run_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            results: vec![mk("shop", "web", "app"), mk("shop", "api", "app")],
            cluster_failures: vec![],
            clusters_scanned: 1,
            cancelled: false,
        }
    }

    #[test]
    fn test_table_sorted_and_formatted() {
        let mut buf = Vec::new();
        write_table(&sample_report(), &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let api_pos = text.find(" api ").unwrap();
        let web_pos = text.find(" web ").unwrap();
        assert!(api_pos < web_pos, "rows must sort by workload name");
        assert!(text.contains("185m"));
        assert!(text.contains("805Mi"));
    }

    #[test]
    fn test_csv_escapes_and_counts_rows() {
        let mut report = sample_report();
        report.results[0]
            .info
            .insert("general".to_string(), "a, quoted \"note\"".to_string());
        let mut buf = Vec::new();
        write_csv(&report, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert!(text.contains("\"general: a, quoted \"\"note\"\"\""));
    }

    #[test]
    fn test_json_round_trips() {
        let report = sample_report();
        let mut buf = Vec::new();
        write_json(&report, &mut buf).unwrap();
        let parsed: ScanReport = serde_json::from_slice(&buf).unwrap();
        assert_eq!(parsed.results.len(), report.results.len());
        assert_eq!(parsed.run_id, report.run_id);
    }
}
