//! Controllers deriving node and cluster resources from the machine config.
//!
//! Every controller follows the same loop: wait for a change to an input,
//! read the current inputs, derive the outputs and write them back. Bad
//! user input never stops a controller; it lands in the error field of the
//! output it would have produced. Outputs that no longer apply (a worker
//! has no API server config) are destroyed.
//!
//! [`register_all`] wires the full set into a [`Runtime`]:
//!
//! ```text
//! MachineConfig ─┬─> KubeletConfig ──┬─> Nodename ──┐
//!                ├─> NodeIpConfig ─> NodeIp ────────┴─> KubeletSpec
//!                ├─> *Config (control plane) ──> StaticPod
//!                ├─> KubernetesRoot ─> Kubernetes, Manifest
//!                ├─> Api
//!                └─> RegistriesConfig
//! ```

use std::fmt::Display;
use std::time::Duration;

use resource_state::{ControllerRuntime, Resource, ResourceSpec, Runtime};
use tracing::warn;

use crate::config::v1alpha1::Config;
use crate::config::RuntimeMode;
use crate::resources::config::{MachineConfig, ACTIVE_ID};
use crate::settings::Settings;

mod control_plane;
mod cri;
mod kubelet;
mod manifests;
mod nodename;
mod secrets;
mod static_pod;

pub use control_plane::ControlPlaneConfigController;
pub use cri::RegistriesController;
pub use kubelet::{KubeletConfigController, KubeletSpecController, NodeIpConfigController, NodeIpController};
pub use manifests::{ExtraManifestController, ManifestController};
pub use nodename::{is_ready as nodename_is_ready, NodenameController};
pub use secrets::{ApiCertificatesController, KubernetesRootController, KubernetesSecretsController};
pub use static_pod::StaticPodController;

/// Knobs shared by the controllers.
#[derive(Clone, Debug)]
pub struct Options {
    /// Where the machine runs.
    pub mode: RuntimeMode,
    /// Lifetime of the admin kubeconfig certificate.
    pub admin_kubeconfig_lifetime: Duration,
    /// Lifetime of the machine API certificates.
    pub api_certificate_lifetime: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            mode: RuntimeMode::default(),
            admin_kubeconfig_lifetime: crate::constants::ADMIN_CERT_DEFAULT_LIFETIME,
            api_certificate_lifetime: crate::constants::API_CERT_DEFAULT_LIFETIME,
        }
    }
}

impl From<&Settings> for Options {
    fn from(settings: &Settings) -> Self {
        Options {
            mode: settings.mode,
            admin_kubeconfig_lifetime: settings.admin_kubeconfig_lifetime,
            ..Options::default()
        }
    }
}

/// Registers every controller with `runtime`.
pub fn register_all(runtime: &mut Runtime, options: &Options) -> anyhow::Result<()> {
    runtime.register(KubeletConfigController)?;
    runtime.register(NodenameController)?;
    runtime.register(NodeIpConfigController)?;
    runtime.register(NodeIpController)?;
    runtime.register(KubeletSpecController::new(options.mode))?;

    control_plane::register(runtime)?;
    runtime.register(StaticPodController)?;

    runtime.register(KubernetesRootController)?;
    runtime.register(KubernetesSecretsController::new(options.admin_kubeconfig_lifetime))?;
    runtime.register(ApiCertificatesController::new(options.api_certificate_lifetime))?;

    runtime.register(ManifestController)?;
    runtime.register(ExtraManifestController)?;
    runtime.register(RegistriesController)?;
    Ok(())
}

/// The active machine config with its decoded v1alpha1 document.
///
/// `None` when no config is loaded or it has no v1alpha1 document.
pub(crate) async fn active_config(
    ctx: &resource_state::Context,
    r: &ControllerRuntime,
) -> anyhow::Result<Option<(Resource<MachineConfig>, Config)>> {
    let resource = match r.get::<MachineConfig>(ctx, ACTIVE_ID).await? {
        Some(resource) => resource,
        None => return Ok(None),
    };
    match resource.spec().v1alpha1()? {
        Some(config) => Ok(Some((resource, config))),
        None => Ok(None),
    }
}

/// Writes the outcome of a derivation into the output `id`.
///
/// A derived spec replaces the output and clears its error, a failure is
/// recorded as the output error keeping the last good spec, and `None`
/// removes the output.
pub(crate) async fn apply<S, E>(
    ctx: &resource_state::Context,
    r: &ControllerRuntime,
    id: &str,
    derived: Option<Result<S, E>>,
) -> anyhow::Result<()>
where
    S: ResourceSpec + Default,
    E: Display,
{
    match derived {
        Some(Ok(spec)) => {
            r.modify::<S, _>(ctx, id, move |resource| {
                *resource.spec_mut() = spec;
                resource.metadata_mut().set_error(None);
            })
            .await?;
        }
        Some(Err(e)) => {
            warn!(controller = r.owner(), resource = id, error = %e, "failed to derive resource");
            r.set_error::<S>(ctx, id, e).await?;
        }
        None => r.destroy::<S>(ctx, id).await?,
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use resource_state::{Context, RunningRuntime, State};

    pub(crate) const CONTROL_PLANE: &str = r#"version: v1alpha1
machine:
  type: controlplane
  token: 4rmdzq.i3xwg1nba3zssxmy
  kubelet:
    image: ghcr.io/siderolabs/kubelet:v1.31.1
    extraArgs:
      rotate-server-certificates: "true"
  network:
    hostname: cp-1
  registries:
    mirrors:
      docker.io:
        endpoints:
          - https://mirror.example.com
cluster:
  clusterName: demo
  controlPlane:
    endpoint: https://10.5.0.2:6443
  network:
    dnsDomain: cluster.local
    podSubnets:
      - 10.244.0.0/16
    serviceSubnets:
      - 10.96.0.0/12
  token: abcdef.0123456789abcdef
  secretboxEncryptionSecret: 4sEbCqQo3hyd2nrQjvOhHDyNTIRmhPO8lZQpfEXk1Pg=
  inlineManifests:
    - name: namespace
      contents: |
        apiVersion: v1
        kind: Namespace
        metadata:
          name: ci
"#;

    pub(crate) const WORKER: &str = r#"version: v1alpha1
machine:
  type: worker
  token: 4rmdzq.i3xwg1nba3zssxmy
cluster:
  clusterName: demo
  controlPlane:
    endpoint: https://10.5.0.2:6443
"#;

    /// `source` with a generated cluster CA and OS CA spliced in.
    pub(crate) fn with_secrets(source: &str) -> String {
        let ca = crate::x509::test::test_ca();
        let os_ca = crate::x509::test::test_ca();
        let container = crate::config::Container::from_bytes(source.as_bytes()).unwrap();
        let patched = container
            .patch_v1alpha1(|config| {
                let cluster = config.cluster.get_or_insert_with(Default::default);
                cluster.ca = Some(crate::config::v1alpha1::PemCertificateAndKey {
                    crt: ca.crt.as_str().into(),
                    key: ca.key.as_str().into(),
                });
                let machine = config.machine.get_or_insert_with(Default::default);
                machine.ca = Some(crate::config::v1alpha1::PemCertificateAndKey {
                    crt: os_ca.crt.as_str().into(),
                    key: os_ca.key.as_str().into(),
                });
                Ok(())
            })
            .unwrap();
        String::from_utf8(patched.bytes().unwrap()).unwrap()
    }

    pub(crate) async fn load(ctx: &Context, state: &State, source: &str) {
        let container = crate::config::Container::from_bytes(source.as_bytes()).unwrap();
        state
            .create(ctx, Resource::new(ACTIVE_ID, MachineConfig::new(&container).unwrap()))
            .await
            .unwrap();
    }

    pub(crate) async fn start(ctx: &Context, state: &State) -> RunningRuntime {
        let mut runtime = Runtime::new(state.clone());
        register_all(&mut runtime, &Options::default()).unwrap();
        let running = runtime.start(ctx);
        assert!(running.settle(Duration::from_millis(100), Duration::from_secs(20)).await);
        running
    }

    #[test]
    fn every_controller_has_a_unique_name() {
        let mut runtime = Runtime::new(State::new());
        register_all(&mut runtime, &Options::default()).unwrap();
        let names = runtime.controllers();
        let unique: std::collections::HashSet<_> = names.iter().collect();
        assert_eq!(names.len(), unique.len());
    }
}
