//! Namespace resolution for the submitted job.

/// Namespace used when nothing else resolves one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Where the resolved namespace came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceSource {
    /// `--namespace` flag or config file.
    Explicit,
    /// `metadata.namespace` of the job spec.
    Spec,
    /// Inferred by the cluster client config (kubeconfig context, in-cluster).
    Client,
    /// Nothing resolved; fell back to [`DEFAULT_NAMESPACE`].
    Fallback,
}

/// Pick the first non-blank namespace in priority order.
pub fn resolve_namespace(
    explicit: Option<&str>,
    spec: Option<&str>,
    client: Option<&str>,
) -> (String, NamespaceSource) {
    let candidates = [
        (explicit, NamespaceSource::Explicit),
        (spec, NamespaceSource::Spec),
        (client, NamespaceSource::Client),
    ];
    candidates
        .into_iter()
        .find_map(|(value, source)| {
            value
                .map(str::trim)
                .filter(|ns| !ns.is_empty())
                .map(|ns| (ns.to_string(), source))
        })
        .unwrap_or_else(|| (DEFAULT_NAMESPACE.to_string(), NamespaceSource::Fallback))
}
