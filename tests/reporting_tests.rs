//! Report writer output checks.

use chrono::Utc;
use kuberight::model::{
    ResourceAllocations, RowState, ScanReport, ScanResult, WorkloadId, WorkloadKind,
};
use kuberight::reporting;
use std::collections::HashMap;
use std::io::Read;
use uuid::Uuid;

fn result(cluster: &str, ns: &str, kind: WorkloadKind, name: &str, container: &str) -> ScanResult {
    ScanResult {
        workload: WorkloadId {
            cluster: cluster.to_string(),
            namespace: ns.to_string(),
            kind,
            name: name.to_string(),
        },
        container: container.to_string(),
        current: ResourceAllocations {
            cpu_request_millis: Some(500),
            cpu_limit_millis: None,
            memory_request_bytes: Some(1024 * 1024 * 1024),
            memory_limit_bytes: Some(1024 * 1024 * 1024),
        },
        recommendation: ResourceAllocations {
            cpu_request_millis: Some(185),
            cpu_limit_millis: None,
            memory_request_bytes: Some(805 * 1024 * 1024),
            memory_limit_bytes: Some(805 * 1024 * 1024),
        },
        state: RowState::Ok,
        info: HashMap::new(),
    }
}

fn report() -> ScanReport {
    ScanReport {
        run_id: Uuid::new_v4(),
        timestamp: Utc::now(),
        results: vec![
            result("prod", "shop", WorkloadKind::StatefulSet, "db", "postgres"),
            result("prod", "shop", WorkloadKind::Deployment, "web", "app"),
            result("dev", "tools", WorkloadKind::DaemonSet, "agent", "agent"),
        ],
        cluster_failures: vec![],
        clusters_scanned: 2,
        cancelled: false,
    }
}

#[test]
fn table_rows_sort_by_cluster_then_workload() {
    let mut buf = Vec::new();
    reporting::write_table(&report(), &mut buf).unwrap();
    let text = String::from_utf8(buf).unwrap();
    let dev = text.find("dev").unwrap();
    let deployment = text.find("Deployment").unwrap();
    let statefulset = text.find("StatefulSet").unwrap();
    assert!(dev < deployment, "dev cluster sorts before prod");
    assert!(deployment < statefulset, "Deployment sorts before StatefulSet");
}

#[test]
fn csv_written_to_file_has_header_and_rows() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    reporting::write_csv(&report(), file.as_file_mut()).unwrap();

    let mut text = String::new();
    file.reopen().unwrap().read_to_string(&mut text).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("cluster,namespace,kind,name,container,state"));
    assert!(lines[1].starts_with("dev,tools,DaemonSet,agent,agent,ok,"));
}

#[test]
fn yaml_round_trips_through_serde() {
    let original = report();
    let mut buf = Vec::new();
    reporting::write_yaml(&original, &mut buf).unwrap();
    let parsed: ScanReport = serde_yaml::from_slice(&buf).unwrap();
    assert_eq!(parsed.results.len(), original.results.len());
    assert_eq!(parsed.clusters_scanned, 2);
    assert!(!parsed.cancelled);
}
