use anyhow::Result;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{Namespace, Pod, ReplicationController};
use kube::api::DynamicObject;
use kube::config::Kubeconfig;
use kube::core::{ApiResource, GroupVersionKind};
use kube::{Api, Client, Config};

fn infer_cluster_name() -> Option<String> {
    let kubeconfig = Kubeconfig::read().ok()?;
    let current = kubeconfig.current_context.as_ref()?;
    let named = kubeconfig.contexts.iter().find(|nc| nc.name == *current)?;
    let ctx = named.context.as_ref()?;
    Some(ctx.cluster.clone())
}

/// Typed access to the Kubernetes API for one cluster. The scan core never
/// opens connections on its own; this handle arrives fully configured.
#[derive(Clone)]
pub struct K8sClient {
    client: Client,
    cluster_name: Option<String>,
}

impl K8sClient {
    pub async fn new(
        config_file: Option<&str>,
        as_user: Option<&str>,
        as_group: Option<&[String]>,
    ) -> Result<Self> {
        if let Some(path) = config_file {
            std::env::set_var("KUBECONFIG", path);
        }
        let cluster_name = infer_cluster_name();
        let mut config = Config::infer().await?;
        if let Some(user) = as_user {
            config.auth_info.impersonate = Some(user.to_string());
        }
        if let Some(groups) = as_group {
            if !groups.is_empty() {
                config.auth_info.impersonate_groups = Some(groups.to_vec());
            }
        }
        let client = Client::try_from(config)?;
        Ok(Self { client, cluster_name })
    }

    /// Wrap an already-built client (tests, in-cluster callers).
    pub fn from_client(client: Client, cluster_name: Option<String>) -> Self {
        Self { client, cluster_name }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Cluster name from kubeconfig current context, or None if in-cluster or unset.
    pub fn cluster_name(&self) -> Option<&str> {
        self.cluster_name.as_deref()
    }

    pub fn pods(&self, namespace: Option<&str>) -> Api<Pod> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    pub fn deployments(&self, namespace: Option<&str>) -> Api<Deployment> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    pub fn stateful_sets(&self, namespace: Option<&str>) -> Api<StatefulSet> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    pub fn daemon_sets(&self, namespace: Option<&str>) -> Api<DaemonSet> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    pub fn jobs(&self, namespace: Option<&str>) -> Api<Job> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    pub fn cron_jobs(&self, namespace: Option<&str>) -> Api<CronJob> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    pub fn replica_sets(&self, namespace: Option<&str>) -> Api<ReplicaSet> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    pub fn replication_controllers(&self, namespace: Option<&str>) -> Api<ReplicationController> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    pub fn horizontal_pod_autoscalers(&self, namespace: Option<&str>) -> Api<HorizontalPodAutoscaler> {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    pub fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }

    fn dynamic(&self, namespace: Option<&str>, gvk: &GroupVersionKind) -> Api<DynamicObject> {
        let ar = ApiResource::from_gvk(gvk);
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }

    /// Argo Rollouts (argoproj.io/v1alpha1).
    pub fn rollouts(&self, namespace: Option<&str>) -> Api<DynamicObject> {
        self.dynamic(
            namespace,
            &GroupVersionKind::gvk("argoproj.io", "v1alpha1", "Rollout"),
        )
    }

    /// OpenShift DeploymentConfigs (apps.openshift.io/v1).
    pub fn deployment_configs(&self, namespace: Option<&str>) -> Api<DynamicObject> {
        self.dynamic(
            namespace,
            &GroupVersionKind::gvk("apps.openshift.io", "v1", "DeploymentConfig"),
        )
    }

    /// Strimzi pod sets (core.strimzi.io/v1beta2).
    pub fn strimzi_pod_sets(&self, namespace: Option<&str>) -> Api<DynamicObject> {
        self.dynamic(
            namespace,
            &GroupVersionKind::gvk("core.strimzi.io", "v1beta2", "StrimziPodSet"),
        )
    }
}
