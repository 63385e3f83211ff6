//! Loading the job spec file submitted to the cluster.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use k8s_openapi::api::batch::v1::Job;
use tracing::{debug, info};

/// Read and parse a `batch/v1` Job from a YAML or JSON file.
///
/// The `apiVersion`/`kind` pair is checked during deserialization, so a
/// manifest for any other resource is rejected here.
pub fn load_job_spec(path: &Path) -> Result<Job> {
    if !path.is_file() {
        bail!(
            "invalid job spec file: file not found {}",
            path.display()
        );
    }
    info!(path = %path.display(), "using job spec file");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    debug!(spec = %contents, "job spec contents");
    parse_job_spec(&contents).with_context(|| format!("parse job spec {}", path.display()))
}

/// Parse a Job manifest. JSON is accepted as a subset of YAML.
pub fn parse_job_spec(contents: &str) -> Result<Job> {
    let job: Job = serde_yaml::from_str(contents).context("deserialize batch/v1 Job")?;
    if job.metadata.name.is_none() && job.metadata.generate_name.is_none() {
        bail!("job spec must set metadata.name or metadata.generateName");
    }
    if job.spec.is_none() {
        bail!("job spec is missing `spec`");
    }
    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;

    const JOB_YAML: &str = r#"
apiVersion: batch/v1
kind: Job
metadata:
  name: batch-1
  namespace: ci
spec:
  backoffLimit: 0
  template:
    spec:
      restartPolicy: Never
      containers:
        - name: main
          image: alpine:latest
          command: ["echo", "hello"]
"#;

    #[test]
    fn parses_job_manifest() {
        let job = parse_job_spec(JOB_YAML).expect("parse");
        assert_eq!(job.metadata.name.as_deref(), Some("batch-1"));
        assert_eq!(job.metadata.namespace.as_deref(), Some("ci"));
        assert_eq!(job.spec.and_then(|spec| spec.backoff_limit), Some(0));
    }

    #[test]
    fn rejects_other_kinds() {
        let pod = JOB_YAML.replace("kind: Job", "kind: Pod");
        assert!(parse_job_spec(&pod).is_err());
    }

    #[test]
    fn rejects_unnamed_job() {
        let unnamed = JOB_YAML.replace("  name: batch-1\n", "");
        let err = parse_job_spec(&unnamed).unwrap_err();
        assert!(err.to_string().contains("metadata.name"));
    }

    #[test]
    fn missing_file_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = load_job_spec(&temp.path().join("missing.yaml")).unwrap_err();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn loads_from_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("job.yaml");
        fs::write(&path, JOB_YAML).expect("write spec");
        let job = load_job_spec(&path).expect("load");
        assert_eq!(job.metadata.name.as_deref(), Some("batch-1"));
    }
}
