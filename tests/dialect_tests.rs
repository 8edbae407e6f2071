//! Query-builder properties across every dialect and metric kind.

use kuberight::model::MetricKind;
use kuberight::prom::dialect::{PromDialect, Selector};
use std::time::Duration;

const HISTORY: Duration = Duration::from_secs(336 * 3600);
const STEP: Duration = Duration::from_secs(75);

const ALL_KINDS: [MetricKind; 7] = [
    MetricKind::CpuUsage,
    MetricKind::PercentileCpu(95),
    MetricKind::CpuPoints,
    MetricKind::Memory,
    MetricKind::MaxMemory,
    MetricKind::MemoryPoints,
    MetricKind::OomKilledMemory,
];

const ALL_DIALECTS: [PromDialect; 3] = [
    PromDialect::Standard,
    PromDialect::GcpManaged,
    PromDialect::Anthos,
];

fn selector<'a>(cluster_label: Option<(&'a str, &'a str)>) -> Selector<'a> {
    Selector {
        namespace: "shop",
        pod_regex: "db-0|db-1",
        container: "db",
        cluster_label,
    }
}

/// Cheap structural validity: balanced parens, brackets and braces, an even
/// number of quotes, and no empty matcher artifacts.
fn assert_well_formed(promql: &str) {
    let mut parens = 0i32;
    let mut brackets = 0i32;
    let mut braces = 0i32;
    let mut quotes = 0usize;
    for c in promql.chars() {
        match c {
            '(' => parens += 1,
            ')' => parens -= 1,
            '[' => brackets += 1,
            ']' => brackets -= 1,
            '{' => braces += 1,
            '}' => braces -= 1,
            '"' => quotes += 1,
            _ => {}
        }
        assert!(parens >= 0 && brackets >= 0 && braces >= 0, "unbalanced: {promql}");
    }
    assert_eq!(parens, 0, "unbalanced parens: {promql}");
    assert_eq!(brackets, 0, "unbalanced brackets: {promql}");
    assert_eq!(braces, 0, "unbalanced braces: {promql}");
    assert_eq!(quotes % 2, 0, "unbalanced quotes: {promql}");
    assert!(!promql.contains(",,"), "double comma: {promql}");
    assert!(!promql.contains("{,"), "leading comma in matcher: {promql}");
    assert!(!promql.contains(",}"), "trailing comma in matcher: {promql}");
}

#[test]
fn every_dialect_builds_every_kind() {
    for dialect in ALL_DIALECTS {
        for kind in ALL_KINDS {
            let q = dialect
                .query(kind, &selector(None), HISTORY, STEP)
                .unwrap_or_else(|| panic!("{dialect:?} cannot build {kind}"));
            assert!(!q.promql.is_empty());
            assert_well_formed(&q.promql);
        }
    }
}

#[test]
fn range_kinds_are_consistent_across_dialects() {
    for dialect in ALL_DIALECTS {
        for kind in ALL_KINDS {
            let q = dialect.query(kind, &selector(None), HISTORY, STEP).unwrap();
            let expect_range = matches!(kind, MetricKind::CpuUsage | MetricKind::Memory);
            assert_eq!(q.range, expect_range, "{dialect:?}/{kind}");
        }
    }
}

/// Seed scenario: StatefulSet on GCP Managed with a cluster label. Every
/// query carries the label literal exactly once inside the braces and the
/// mandatory monitored_resource matcher.
#[test]
fn gcp_cluster_label_injected_exactly_once() {
    let sel = selector(Some(("cluster_name", "prod-1")));
    for kind in ALL_KINDS {
        let q = PromDialect::GcpManaged
            .query(kind, &sel, HISTORY, STEP)
            .unwrap();
        let needle = "\"cluster_name\"=\"prod-1\"";
        // OOM joins two selectors; every other kind has one. Count per
        // selector set by requiring at least one occurrence and no bare
        // doubled commas anywhere.
        let occurrences = q.promql.matches(needle).count();
        let selectors = q.promql.matches("\"__name__\"=").count();
        assert_eq!(
            occurrences, selectors,
            "label must appear once per matcher set in {}",
            q.promql
        );
        assert!(q.promql.contains("\"monitored_resource\"=\"k8s_container\""));
        assert_well_formed(&q.promql);
    }
}

#[test]
fn standard_cluster_label_injected_inside_braces() {
    let sel = selector(Some(("cluster", "east-1")));
    for kind in ALL_KINDS {
        let q = PromDialect::Standard.query(kind, &sel, HISTORY, STEP).unwrap();
        assert!(
            q.promql.contains(", cluster=\"east-1\"}"),
            "label must sit before the closing brace in {}",
            q.promql
        );
        assert_well_formed(&q.promql);
    }
}

#[test]
fn gcp_results_are_renamed_to_standard_labels() {
    for kind in ALL_KINDS {
        let q = PromDialect::GcpManaged
            .query(kind, &selector(None), HISTORY, STEP)
            .unwrap();
        assert!(q.promql.starts_with("label_replace(label_replace("));
        assert!(q.promql.contains("\"pod\", \"$1\", \"pod_name\", \"(.+)\""));
        assert!(q.promql.contains("\"container\", \"$1\", \"container_name\", \"(.+)\""));
    }
}

#[test]
fn anthos_uses_the_anthos_metric_prefix() {
    for kind in ALL_KINDS {
        let q = PromDialect::Anthos
            .query(kind, &selector(None), HISTORY, STEP)
            .unwrap();
        assert!(
            q.promql.contains("kubernetes.io/anthos/container/"),
            "missing anthos prefix in {}",
            q.promql
        );
    }
}

#[test]
fn pod_discovery_queries_standard_only() {
    let std = PromDialect::Standard;
    assert!(std
        .pod_owners_query("shop", "ReplicaSet", "db-.*", HISTORY, None)
        .is_some());
    assert!(std.pod_running_query("shop", "db-.*", None).is_some());

    for dialect in [PromDialect::GcpManaged, PromDialect::Anthos] {
        assert!(dialect
            .pod_owners_query("shop", "ReplicaSet", "db-.*", HISTORY, None)
            .is_none());
        assert!(dialect.pod_running_query("shop", "db-.*", None).is_none());
        assert!(!dialect.has_kube_state_metrics());
    }
}

#[test]
fn builder_is_pure() {
    let sel = selector(Some(("cluster", "a")));
    for dialect in ALL_DIALECTS {
        for kind in ALL_KINDS {
            let first = dialect.query(kind, &sel, HISTORY, STEP);
            let second = dialect.query(kind, &sel, HISTORY, STEP);
            assert_eq!(first, second);
        }
    }
}
