//! Ownership resolution: which ReplicaSets / ReplicationControllers / Jobs
//! belong to a controller, and which pods belong to those. Prefers the
//! kube-state-metrics owner series over the history window so pods of
//! recently-deleted owners are included; falls back to the live API when
//! the backend dialect cannot answer.

use crate::errors::PromError;
use crate::k8s::K8sClient;
use crate::model::PodRef;
use crate::prom::service::MetricService;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::core::ObjectMeta;
use kube::Api;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;

/// Paged list with a circuit breaker against runaway `continue` pagination.
pub async fn list_paged<K>(
    api: &Api<K>,
    base: &ListParams,
    batch: u32,
    max_batches: usize,
) -> Result<Vec<K>, kube::Error>
where
    K: Clone + DeserializeOwned + Debug,
{
    let mut out = Vec::new();
    let mut lp = base.clone().limit(batch);
    let mut batches = 0usize;
    loop {
        let list = api.list(&lp).await?;
        out.extend(list.items);
        batches += 1;
        match list.metadata.continue_ {
            Some(token) if !token.is_empty() => {
                if batches >= max_batches {
                    warn!(
                        "pagination stopped after {batches} batches; result may be truncated"
                    );
                    break;
                }
                lp.continue_token = Some(token);
            }
            _ => break,
        }
    }
    Ok(out)
}

/// Join escaped names into regex alternations, `batch` names per query, to
/// cut total query count against rate-limited backends.
pub fn batched_regex(names: &[String], batch: usize) -> Vec<String> {
    names
        .chunks(batch.max(1))
        .map(|chunk| {
            chunk
                .iter()
                .map(|n| regex::escape(n))
                .collect::<Vec<_>>()
                .join("|")
        })
        .collect()
}

fn owner_refs(meta: &ObjectMeta) -> Vec<(String, String)> {
    meta.owner_references
        .as_ref()
        .map(|refs| {
            refs.iter()
                .map(|r| (r.kind.clone(), r.name.clone()))
                .collect()
        })
        .unwrap_or_default()
}

/// Live pods of one namespace, indexed by name with phase and owners. Built
/// once per namespace and shared by every workload resolved there.
#[derive(Debug, Default)]
pub struct PodIndex {
    entries: HashMap<String, PodEntry>,
}

#[derive(Debug)]
struct PodEntry {
    running: bool,
    owners: Vec<(String, String)>,
}

impl PodIndex {
    pub fn from_pods(pods: &[Pod]) -> Self {
        let mut entries = HashMap::new();
        for pod in pods {
            let Some(name) = pod.metadata.name.clone() else {
                continue;
            };
            let running = pod
                .status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                .map(|p| p == "Running")
                .unwrap_or(false);
            entries.insert(
                name,
                PodEntry {
                    running,
                    owners: owner_refs(&pod.metadata),
                },
            );
        }
        Self { entries }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.entries.get(name).map(|e| e.running).unwrap_or(false)
    }

    /// Pods directly owned by any of the given (kind, names) owners.
    pub fn owned_by(&self, owner_kind: &str, owner_names: &HashSet<String>) -> Vec<PodRef> {
        let mut out: Vec<PodRef> = self
            .entries
            .iter()
            .filter(|(_, e)| {
                e.owners
                    .iter()
                    .any(|(k, n)| k == owner_kind && owner_names.contains(n))
            })
            .map(|(name, e)| PodRef {
                name: name.clone(),
                running: e.running,
                deleted: false,
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

/// Resolves owner chains for one namespace of one cluster.
pub struct OwnerResolver<'a> {
    pub kube: &'a K8sClient,
    pub metrics: &'a MetricService,
    pub namespace: &'a str,
    pub owner_batch_size: usize,
    pub now: f64,
}

impl OwnerResolver<'_> {
    /// owner name -> owned names, read from a kube-state-metrics owner
    /// series. `None` means the dialect cannot answer and the caller must
    /// use the live API.
    async fn owned_via_metrics(
        &self,
        metric: &str,
        owned_label: &str,
        owner_kind: &str,
        owners: &[String],
    ) -> Result<Option<HashMap<String, Vec<String>>>, PromError> {
        if !self.metrics.dialect().has_kube_state_metrics() {
            return Ok(None);
        }
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for chunk in batched_regex(owners, self.owner_batch_size) {
            let series = match self
                .metrics
                .owner_series(metric, self.namespace, owner_kind, &chunk, self.now)
                .await?
            {
                Some(series) => series,
                None => return Ok(None),
            };
            for s in &series {
                if let (Some(owner), Some(owned)) = (s.label("owner_name"), s.label(owned_label)) {
                    map.entry(owner.to_string())
                        .or_default()
                        .push(owned.to_string());
                }
            }
        }
        for owned in map.values_mut() {
            owned.sort();
            owned.dedup();
        }
        Ok(Some(map))
    }

    /// ReplicaSets owned by Deployments or Rollouts, including ones deleted
    /// within the history window when the metric path is available.
    pub async fn replica_sets_of(
        &self,
        owner_kind: &str,
        owners: &[String],
    ) -> Result<HashMap<String, Vec<String>>, PromError> {
        if let Some(map) = self
            .owned_via_metrics("kube_replicaset_owner", "replicaset", owner_kind, owners)
            .await?
        {
            return Ok(map);
        }
        debug!(
            "kube_replicaset_owner unavailable on this backend; listing live ReplicaSets, historical replicas will be missing"
        );
        let owner_set: HashSet<&String> = owners.iter().collect();
        let rs = list_paged(
            &self.kube.replica_sets(Some(self.namespace)),
            &ListParams::default(),
            500,
            50,
        )
        .await
        .map_err(|e| PromError::QueryFailed(e.to_string()))?;
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for r in rs {
            let Some(name) = r.metadata.name.clone() else { continue };
            for (kind, owner) in owner_refs(&r.metadata) {
                if kind == owner_kind && owner_set.contains(&owner) {
                    map.entry(owner).or_default().push(name.clone());
                }
            }
        }
        Ok(map)
    }

    /// ReplicationControllers owned by DeploymentConfigs.
    pub async fn replication_controllers_of(
        &self,
        owners: &[String],
    ) -> Result<HashMap<String, Vec<String>>, PromError> {
        if let Some(map) = self
            .owned_via_metrics(
                "kube_replicationcontroller_owner",
                "replicationcontroller",
                "DeploymentConfig",
                owners,
            )
            .await?
        {
            return Ok(map);
        }
        debug!(
            "kube_replicationcontroller_owner unavailable on this backend; listing live ReplicationControllers, historical replicas will be missing"
        );
        let owner_set: HashSet<&String> = owners.iter().collect();
        let rcs = list_paged(
            &self.kube.replication_controllers(Some(self.namespace)),
            &ListParams::default(),
            500,
            50,
        )
        .await
        .map_err(|e| PromError::QueryFailed(e.to_string()))?;
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for rc in rcs {
            let Some(name) = rc.metadata.name.clone() else { continue };
            for (kind, owner) in owner_refs(&rc.metadata) {
                if kind == "DeploymentConfig" && owner_set.contains(&owner) {
                    map.entry(owner).or_default().push(name.clone());
                }
            }
        }
        Ok(map)
    }

    /// Jobs spawned by CronJobs.
    pub async fn jobs_of(
        &self,
        owners: &[String],
    ) -> Result<HashMap<String, Vec<String>>, PromError> {
        if let Some(map) = self
            .owned_via_metrics("kube_job_owner", "job_name", "CronJob", owners)
            .await?
        {
            return Ok(map);
        }
        debug!(
            "kube_job_owner unavailable on this backend; listing live Jobs, completed historical jobs will be missing"
        );
        let owner_set: HashSet<&String> = owners.iter().collect();
        let jobs = list_paged(
            &self.kube.jobs(Some(self.namespace)),
            &ListParams::default(),
            500,
            50,
        )
        .await
        .map_err(|e| PromError::QueryFailed(e.to_string()))?;
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for job in jobs {
            let Some(name) = job.metadata.name.clone() else { continue };
            for (kind, owner) in owner_refs(&job.metadata) {
                if kind == "CronJob" && owner_set.contains(&owner) {
                    map.entry(owner).or_default().push(name.clone());
                }
            }
        }
        Ok(map)
    }

    /// Pods owned by the given owners, keyed by owner name, alive or
    /// deleted within the history window. Running state comes from
    /// kube_pod_status_phase when available, otherwise from the live pod
    /// index.
    pub async fn pods_of(
        &self,
        owner_kind: &str,
        owners: &[String],
        index: &PodIndex,
    ) -> Result<HashMap<String, Vec<PodRef>>, PromError> {
        let via_metrics = self
            .owned_via_metrics("kube_pod_owner", "pod", owner_kind, owners)
            .await?;
        let Some(map) = via_metrics else {
            debug!(
                "kube_pod_owner unavailable on this backend; using live pods only for {owner_kind} owners"
            );
            let mut out = HashMap::new();
            for owner in owners {
                let one: HashSet<String> = [owner.clone()].into_iter().collect();
                out.insert(owner.clone(), index.owned_by(owner_kind, &one));
            }
            return Ok(out);
        };

        let mut names: Vec<String> = map.values().flatten().cloned().collect();
        names.sort();
        names.dedup();

        let mut running: HashSet<String> = HashSet::new();
        for chunk in batched_regex(&names, self.owner_batch_size) {
            if let Some(set) = self
                .metrics
                .running_pods(self.namespace, &chunk, self.now)
                .await?
            {
                running.extend(set);
            }
        }

        Ok(map
            .into_iter()
            .map(|(owner, pod_names)| {
                let pods = pod_names
                    .into_iter()
                    .map(|name| {
                        let deleted = !index.contains(&name);
                        let is_running = running.contains(&name) || index.is_running(&name);
                        PodRef {
                            name,
                            running: is_running && !deleted,
                            deleted,
                        }
                    })
                    .collect();
                (owner, pods)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batched_regex_chunks_and_escapes() {
        let names: Vec<String> = vec![
            "api-1".to_string(),
            "api-2".to_string(),
            "api-3".to_string(),
        ];
        let batches = batched_regex(&names, 2);
        assert_eq!(batches, vec![r"api\-1|api\-2".to_string(), r"api\-3".to_string()]);
    }

    #[test]
    fn test_pod_index_owned_by() {
        use k8s_openapi::api::core::v1::PodStatus;
        use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

        let mk_pod = |name: &str, owner: &str, phase: &str| Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                owner_references: Some(vec![OwnerReference {
                    kind: "ReplicaSet".to_string(),
                    name: owner.to_string(),
                    api_version: "apps/v1".to_string(),
                    uid: String::new(),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };

        let index = PodIndex::from_pods(&[
            mk_pod("api-6d4f-aaa", "api-6d4f", "Running"),
            mk_pod("api-6d4f-bbb", "api-6d4f", "Pending"),
            mk_pod("web-1111-ccc", "web-1111", "Running"),
        ]);

        let owners: HashSet<String> = ["api-6d4f".to_string()].into_iter().collect();
        let pods = index.owned_by("ReplicaSet", &owners);
        assert_eq!(pods.len(), 2);
        assert!(pods[0].running);
        assert!(!pods[1].running);
        assert!(!pods[0].deleted);
    }
}
