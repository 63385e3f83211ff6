//! [`Cluster`] implementation backed by the `kube` client.

use std::fs;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use kube::runtime::{WatchStreamExt, watcher};
use kube::config::Kubeconfig;
use kube::{Client, Config, ResourceExt};
use tracing::{debug, info, instrument, warn};

use crate::core::namespace::{NamespaceSource, resolve_namespace};
use crate::core::types::{JobEvent, WatchAction};
use crate::io::cluster::{Cluster, JobEventStream, PodLogReader, PodRecord, job_pod_selector};

/// Namespace file mounted into every pod with a service account.
const SERVICE_ACCOUNT_NAMESPACE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Cluster client built from the ambient kubeconfig or in-cluster config.
///
/// The client sits behind a mutex so [`Cluster::close`] can drop it; every
/// call after that fails instead of silently reconnecting.
pub struct KubeCluster {
    namespace: String,
    client: Mutex<Option<Client>>,
}

impl KubeCluster {
    /// Infer the client config and resolve the namespace to work in.
    ///
    /// `explicit_namespace` comes from the command line or config file,
    /// `spec_namespace` from the job manifest.
    #[instrument(skip_all)]
    pub async fn connect(
        explicit_namespace: Option<&str>,
        spec_namespace: Option<&str>,
    ) -> Result<Self> {
        let config = Config::infer().await.context("infer kube config")?;
        let cluster_url = config.cluster_url.to_string();
        // `Config::infer` substitutes "default" when the context names no
        // namespace, which would hide the fallback below.
        let configured = configured_namespace();
        let (namespace, source) =
            resolve_namespace(explicit_namespace, spec_namespace, configured.as_deref());
        let client = Client::try_from(config).context("build kube client")?;

        match client.apiserver_version().await {
            Ok(version) => info!(
                master = %cluster_url,
                version = %version.git_version,
                "connected to cluster"
            ),
            Err(err) => warn!(master = %cluster_url, err = %err, "could not read API server version"),
        }
        if source == NamespaceSource::Fallback {
            warn!(namespace = %namespace, "namespace not provided, using default namespace");
        } else {
            info!(namespace = %namespace, source = ?source, "using namespace");
        }

        Ok(Self::from_client(client, namespace))
    }

    /// Wrap an already built client working in `namespace`.
    pub fn from_client(client: Client, namespace: String) -> Self {
        Self {
            namespace,
            client: Mutex::new(Some(client)),
        }
    }

    fn client(&self) -> Result<Client> {
        let guard = self
            .client
            .lock()
            .map_err(|_| anyhow!("cluster client lock poisoned"))?;
        guard
            .clone()
            .ok_or_else(|| anyhow!("cluster connection already closed"))
    }

    fn jobs(&self) -> Result<Api<Job>> {
        Ok(Api::namespaced(self.client()?, &self.namespace))
    }

    fn pods_in(&self, namespace: &str) -> Result<Api<Pod>> {
        Ok(Api::namespaced(self.client()?, namespace))
    }
}

#[async_trait]
impl Cluster for KubeCluster {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    #[instrument(skip_all, fields(namespace = %self.namespace))]
    async fn create_job(&self, spec: &Job) -> Result<Job> {
        let mut spec = spec.clone();
        spec.metadata.namespace = Some(self.namespace.clone());
        let created = self
            .jobs()?
            .create(&PostParams::default(), &spec)
            .await
            .context("create job")?;
        debug!(job = %created.name_any(), "job accepted by cluster");
        Ok(created)
    }

    #[instrument(skip_all, fields(job = %name))]
    async fn watch_job(&self, name: &str) -> Result<JobEventStream> {
        let jobs = self.jobs()?;
        // The runtime watcher is lazy; make sure the job is visible before
        // reporting the subscription as established.
        jobs.get(name)
            .await
            .with_context(|| format!("get job {name}"))?;

        let config = watcher::Config::default().fields(&format!("metadata.name={name}"));
        let events = watcher(jobs, config)
            .default_backoff()
            .filter_map(|item| async move {
                match item {
                    Ok(watcher::Event::InitApply(job)) => {
                        Some(Ok(JobEvent::new(WatchAction::Added, job)))
                    }
                    Ok(watcher::Event::Apply(job)) => {
                        Some(Ok(JobEvent::new(WatchAction::Modified, job)))
                    }
                    Ok(watcher::Event::Delete(job)) => {
                        Some(Ok(JobEvent::new(WatchAction::Deleted, job)))
                    }
                    Ok(watcher::Event::Init | watcher::Event::InitDone) => None,
                    Err(err) => Some(Err(anyhow::Error::new(err).context("job watch stream"))),
                }
            });
        Ok(Box::pin(events))
    }

    #[instrument(skip_all, fields(job = %name))]
    async fn list_job_pods(&self, name: &str) -> Result<Vec<PodRecord>> {
        let params = ListParams::default().labels(&job_pod_selector(name));
        let pods = self
            .pods_in(&self.namespace)?
            .list(&params)
            .await
            .with_context(|| format!("list pods of job {name}"))?;
        Ok(pods
            .items
            .iter()
            .map(|pod| PodRecord {
                name: pod.name_any(),
                namespace: pod.namespace().unwrap_or_else(|| self.namespace.clone()),
            })
            .collect())
    }

    #[instrument(skip_all, fields(pod = %pod))]
    async fn pod_log(&self, pod: &PodRecord) -> Result<PodLogReader> {
        let reader = self
            .pods_in(&pod.namespace)?
            .log_stream(&pod.name, &LogParams::default())
            .await
            .with_context(|| format!("read log of pod {pod}"))?;
        Ok(Box::pin(reader))
    }

    #[instrument(skip_all, fields(job = %name))]
    async fn delete_job(&self, name: &str) -> Result<()> {
        self.jobs()?
            .delete(name, &DeleteParams::background())
            .await
            .with_context(|| format!("delete job {name}"))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut guard = self
            .client
            .lock()
            .map_err(|_| anyhow!("cluster client lock poisoned"))?;
        if guard.take().is_none() {
            bail!("cluster connection already closed");
        }
        Ok(())
    }
}

/// Namespace the client config names itself, if any.
///
/// Follows the lookup order of `Config::infer`: the kubeconfig first, then
/// the in-cluster service account.
fn configured_namespace() -> Option<String> {
    match Kubeconfig::read() {
        Ok(kubeconfig) => context_namespace(&kubeconfig),
        Err(_) => fs::read_to_string(SERVICE_ACCOUNT_NAMESPACE)
            .ok()
            .map(|namespace| namespace.trim().to_string()),
    }
}

/// `namespace` of the kubeconfig's current context.
fn context_namespace(kubeconfig: &Kubeconfig) -> Option<String> {
    let current = kubeconfig.current_context.as_deref()?;
    kubeconfig
        .contexts
        .iter()
        .find(|named| named.name == current)?
        .context
        .as_ref()?
        .namespace
        .clone()
}
