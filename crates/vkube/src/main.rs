use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vkube_core::{
    GroupVersionKind, PersistentVolume, PersistentVolumeClaim, PodDisruptionBudget, Resource,
    VkubeError,
};
use vkube_store::Cluster;
use vkube_syncer::{ControllerConfig, SyncContext, SyncController, Translator, TranslatorConfig};

#[derive(Parser)]
#[command(name = "vkube", about = "Virtual cluster resource synchronizer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a virtual and a host cluster from manifests, sync them until
    /// nothing changes and print both
    Reconcile {
        /// Multi-document YAML with the virtual cluster's objects
        #[arg(long = "virtual", env = "VKUBE_VIRTUAL")]
        virtual_manifests: PathBuf,
        /// Multi-document YAML with the host cluster's objects
        #[arg(long, env = "VKUBE_HOST")]
        host: PathBuf,
        /// Host namespace receiving all namespaced physical objects
        #[arg(long, env = "VKUBE_TARGET_NAMESPACE", default_value = "vkube")]
        target_namespace: String,
        /// Suffix distinguishing this virtual cluster on the host
        #[arg(long, env = "VKUBE_SUFFIX", default_value = "vkube")]
        suffix: String,
        /// Number of concurrent sync workers
        #[arg(long, env = "VKUBE_WORKERS", default_value_t = 4)]
        workers: usize,
    },
}

/// Kinds the engine synchronizes, in output order
fn synchronized_kinds() -> [GroupVersionKind; 3] {
    [
        GroupVersionKind::persistent_volume(),
        GroupVersionKind::persistent_volume_claim(),
        GroupVersionKind::pod_disruption_budget(),
    ]
}

#[tokio::main]
async fn main() -> miette::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Reconcile {
            virtual_manifests,
            host,
            target_namespace,
            suffix,
            workers,
        } => {
            let translator = Translator::new(TranslatorConfig {
                target_namespace,
                suffix,
            });
            let output = run_reconcile(&virtual_manifests, &host, translator, workers).await?;
            print!("{}", output);
            Ok(())
        }
    }
}

/// Seed both clusters, run the controller until idle and render the result
async fn run_reconcile(
    virtual_manifests: &Path,
    host_manifests: &Path,
    translator: Translator,
    workers: usize,
) -> miette::Result<String> {
    let virtual_cluster = Arc::new(Cluster::new("virtual"));
    let host_cluster = Arc::new(Cluster::new("host"));
    let seeded = load_manifests(&virtual_cluster, virtual_manifests)?;
    info!("Loaded {} objects into the virtual cluster", seeded);
    let seeded = load_manifests(&host_cluster, host_manifests)?;
    info!("Loaded {} objects into the host cluster", seeded);

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping");
            signal_token.cancel();
        }
    });

    let ctx = SyncContext::new(
        virtual_cluster.clone(),
        host_cluster.clone(),
        translator,
        token,
    );
    let config = ControllerConfig {
        workers,
        ..Default::default()
    };
    let summary = SyncController::with_default_syncers(ctx, config)
        .run_until_idle()
        .await
        .map_err(|e| miette::miette!("Sync failed: {}", e))?;
    info!(
        "Converged after {} passes ({} failed)",
        summary.passes, summary.failures
    );

    let mut output = render_cluster(&virtual_cluster)?;
    output.push_str(&render_cluster(&host_cluster)?);
    Ok(output)
}

/// Seed a cluster from a multi-document YAML file, returning the number of objects
fn load_manifests(cluster: &Cluster, path: &Path) -> miette::Result<usize> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| miette::miette!("Failed to read {}: {}", path.display(), e))?;
    let documents = vkube_core::from_yaml_documents(&data)?;

    let mut seeded = 0;
    for document in documents {
        match seed_document(cluster, document) {
            Ok(()) => seeded += 1,
            Err(VkubeError::InvalidKind { kind }) => {
                warn!("Skipping {} object in {}: kind is not synchronized", kind, path.display());
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(seeded)
}

fn seed_document(cluster: &Cluster, document: Value) -> vkube_core::Result<()> {
    let api_version = document["apiVersion"].as_str().unwrap_or_default();
    let kind = document["kind"].as_str().unwrap_or_default();
    let gvk = GroupVersionKind::from_api_version_kind(api_version, kind);

    if gvk == PersistentVolume::gvk() {
        cluster.seed(decode::<PersistentVolume>(document)?)?;
    } else if gvk == PersistentVolumeClaim::gvk() {
        cluster.seed(decode::<PersistentVolumeClaim>(document)?)?;
    } else if gvk == PodDisruptionBudget::gvk() {
        cluster.seed(decode::<PodDisruptionBudget>(document)?)?;
    } else {
        return Err(VkubeError::invalid_kind(gvk.to_string()));
    }
    Ok(())
}

fn decode<T: Resource>(document: Value) -> vkube_core::Result<T> {
    serde_json::from_value(document).map_err(|e| {
        VkubeError::serialization_error(
            format!("Failed to decode {}: {}", T::KIND, e),
            Some(Box::new(e)),
        )
    })
}

/// Render every synchronized object of a cluster as YAML documents
fn render_cluster(cluster: &Cluster) -> miette::Result<String> {
    let mut output = format!("# cluster: {}\n", cluster.name());
    for gvk in synchronized_kinds() {
        for object in cluster.list_values(&gvk)? {
            output.push_str("---\n");
            output.push_str(&vkube_core::to_yaml(&object)?);
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn manifest(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_manifests_skips_unknown_kinds() {
        let file = manifest(
            r#"
apiVersion: v1
kind: PersistentVolumeClaim
metadata:
  name: data
  namespace: team
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: settings
  namespace: team
---
apiVersion: policy/v1
kind: PodDisruptionBudget
metadata:
  name: web
  namespace: team
spec:
  minAvailable: 1
"#,
        );

        let cluster = Cluster::new("virtual");
        assert_eq!(load_manifests(&cluster, file.path()).unwrap(), 2);
        assert_eq!(
            cluster
                .list::<PodDisruptionBudget>(Some("team"))
                .unwrap()
                .len(),
            1
        );
        assert_eq!(cluster.writes(), 0);
    }

    #[test]
    fn test_load_manifests_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let cluster = Cluster::new("virtual");
        assert!(load_manifests(&cluster, &dir.path().join("absent.yaml")).is_err());
    }

    #[tokio::test]
    async fn test_run_reconcile() {
        let virtual_file = manifest(
            r#"
apiVersion: policy/v1
kind: PodDisruptionBudget
metadata:
  name: web
  namespace: team
spec:
  maxUnavailable: 1
  selector:
    matchLabels:
      kubernetes.io/app: web
"#,
        );
        let host_file = manifest("");

        let translator = Translator::new(TranslatorConfig {
            target_namespace: "tenant".to_string(),
            suffix: "blue".to_string(),
        });
        let output = run_reconcile(virtual_file.path(), host_file.path(), translator, 2)
            .await
            .unwrap();

        let (virtual_part, host_part) = output.split_once("# cluster: host").unwrap();
        assert!(virtual_part.contains("name: web"));
        assert!(host_part.contains("name: web-x-team-x-blue"));
        assert!(host_part.contains("namespace: tenant"));
        assert!(host_part.contains("kubernetes.io/app: web"));
    }
}
