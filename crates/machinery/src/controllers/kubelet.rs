use std::convert::Infallible;

use resource_state::{Context, Controller, ControllerRuntime, Input, Output};
use tracing::{debug, info};

use super::{active_config, apply};
use crate::config::RuntimeMode;
use crate::kubelet;
use crate::resources::config::{MachineConfig, ACTIVE_ID};
use crate::resources::k8s::{KubeletConfig, KubeletSpec, NodeIp, NodeIpConfig, Nodename, KUBELET_ID, NODENAME_ID};
use crate::resources::network::{HostnameStatus, NodeAddresses, CURRENT_ADDRESSES_ID, HOSTNAME_ID};

/// Reduces the machine config to the kubelet settings.
pub struct KubeletConfigController;

#[async_trait::async_trait]
impl Controller for KubeletConfigController {
    fn name(&self) -> &str {
        "k8s.KubeletConfigController"
    }

    fn inputs(&self) -> Vec<Input> {
        vec![Input::weak_id::<MachineConfig>(ACTIVE_ID)]
    }

    fn outputs(&self) -> Vec<Output> {
        vec![Output::of::<KubeletConfig>()]
    }

    async fn run(&self, ctx: &Context, r: &mut ControllerRuntime) -> anyhow::Result<()> {
        while r.event(ctx).await {
            let derived = match r.get::<MachineConfig>(ctx, ACTIVE_ID).await? {
                Some(config) => config
                    .spec()
                    .container()
                    .map_err(anyhow::Error::from)
                    .and_then(|container| kubelet::config_from_container(&container).map_err(anyhow::Error::from))
                    .transpose(),
                None => None,
            };
            apply(ctx, r, KUBELET_ID, derived).await?;
        }
        Ok(())
    }
}

/// Derives the subnets node IPs are picked from.
pub struct NodeIpConfigController;

#[async_trait::async_trait]
impl Controller for NodeIpConfigController {
    fn name(&self) -> &str {
        "k8s.NodeIPConfigController"
    }

    fn inputs(&self) -> Vec<Input> {
        vec![Input::weak_id::<MachineConfig>(ACTIVE_ID)]
    }

    fn outputs(&self) -> Vec<Output> {
        vec![Output::of::<NodeIpConfig>()]
    }

    async fn run(&self, ctx: &Context, r: &mut ControllerRuntime) -> anyhow::Result<()> {
        while r.event(ctx).await {
            let derived = active_config(ctx, r)
                .await?
                .map(|(_, config)| Ok::<_, Infallible>(kubelet::node_ip_config(&config)));
            apply(ctx, r, KUBELET_ID, derived).await?;
        }
        Ok(())
    }
}

/// Picks the node IPs out of the current node addresses.
pub struct NodeIpController;

#[async_trait::async_trait]
impl Controller for NodeIpController {
    fn name(&self) -> &str {
        "k8s.NodeIPController"
    }

    fn inputs(&self) -> Vec<Input> {
        vec![
            Input::weak_id::<NodeIpConfig>(KUBELET_ID),
            Input::weak_id::<NodeAddresses>(CURRENT_ADDRESSES_ID),
        ]
    }

    fn outputs(&self) -> Vec<Output> {
        vec![Output::of::<NodeIp>()]
    }

    async fn run(&self, ctx: &Context, r: &mut ControllerRuntime) -> anyhow::Result<()> {
        while r.event(ctx).await {
            let config = match r.get::<NodeIpConfig>(ctx, KUBELET_ID).await? {
                Some(config) => config,
                None => {
                    r.destroy::<NodeIp>(ctx, KUBELET_ID).await?;
                    continue;
                }
            };
            let addresses = match r.get::<NodeAddresses>(ctx, CURRENT_ADDRESSES_ID).await? {
                Some(addresses) => addresses,
                None => continue,
            };

            let derived = kubelet::select_node_ips(&addresses.spec().addresses, config.spec()).map(|addresses| {
                if addresses.is_empty() {
                    info!("no node address matches the node IP subnets");
                } else {
                    debug!(addresses = ?addresses, "selected node IPs");
                }
                NodeIp { addresses }
            });
            apply(ctx, r, KUBELET_ID, Some(derived)).await?;
        }
        Ok(())
    }
}

/// Builds the kubelet command line and `KubeletConfiguration`.
///
/// Waits until the node name matches the current hostname and, unless the
/// user pins `node-ip`, until node IPs are known.
pub struct KubeletSpecController {
    mode: RuntimeMode,
}

impl KubeletSpecController {
    /// A controller for a machine running in `mode`.
    pub fn new(mode: RuntimeMode) -> Self {
        KubeletSpecController { mode }
    }
}

#[async_trait::async_trait]
impl Controller for KubeletSpecController {
    fn name(&self) -> &str {
        "k8s.KubeletSpecController"
    }

    fn inputs(&self) -> Vec<Input> {
        vec![
            Input::weak_id::<KubeletConfig>(KUBELET_ID),
            Input::weak_id::<Nodename>(NODENAME_ID),
            Input::weak_id::<NodeIp>(KUBELET_ID),
            Input::weak_id::<HostnameStatus>(HOSTNAME_ID),
        ]
    }

    fn outputs(&self) -> Vec<Output> {
        vec![Output::of::<KubeletSpec>()]
    }

    async fn run(&self, ctx: &Context, r: &mut ControllerRuntime) -> anyhow::Result<()> {
        while r.event(ctx).await {
            let config = match r.get::<KubeletConfig>(ctx, KUBELET_ID).await? {
                Some(config) => config,
                None => {
                    r.destroy::<KubeletSpec>(ctx, KUBELET_ID).await?;
                    continue;
                }
            };
            let nodename = match r.get::<Nodename>(ctx, NODENAME_ID).await? {
                Some(nodename) => nodename,
                None => continue,
            };
            match r.get::<HostnameStatus>(ctx, HOSTNAME_ID).await? {
                Some(hostname) if super::nodename_is_ready(&nodename, &hostname) => {}
                _ => {
                    debug!("waiting for the node name to catch up with the hostname");
                    continue;
                }
            }
            let node_ip = r.get::<NodeIp>(ctx, KUBELET_ID).await?;
            let node_ips = node_ip.as_ref().map(|ip| ip.spec().addresses.as_slice());

            match kubelet::spec(config.spec(), &nodename.spec().nodename, node_ips, self.mode) {
                Ok(None) => debug!("waiting for node IPs"),
                derived => apply(ctx, r, KUBELET_ID, derived.transpose()).await?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::controllers::NodenameController;
    use resource_state::{Resource, Runtime, State};
    use std::time::Duration;

    const CONFIG: &str = r#"version: v1alpha1
machine:
  type: worker
  kubelet:
    nodeIP:
      validSubnets:
        - 10.0.0.0/8
        - "!10.0.0.3/32"
cluster:
  network:
    serviceSubnets:
      - 10.96.0.0/12
"#;

    async fn start(ctx: &Context, state: &State, source: &str) -> resource_state::RunningRuntime {
        let container = crate::config::Container::from_bytes(source.as_bytes()).unwrap();
        state
            .create(ctx, Resource::new(ACTIVE_ID, MachineConfig::new(&container).unwrap()))
            .await
            .unwrap();
        state
            .create(ctx, Resource::new(HOSTNAME_ID, HostnameStatus::from_fqdn("Worker-1")))
            .await
            .unwrap();
        state
            .create(
                ctx,
                Resource::new(
                    CURRENT_ADDRESSES_ID,
                    NodeAddresses {
                        addresses: vec![
                            "127.0.0.1/8".to_string(),
                            "10.0.0.3/24".to_string(),
                            "10.0.0.4/24".to_string(),
                            "10.0.0.5/24".to_string(),
                        ],
                    },
                ),
            )
            .await
            .unwrap();

        let mut runtime = Runtime::new(state.clone());
        runtime.register(KubeletConfigController).unwrap();
        runtime.register(NodenameController).unwrap();
        runtime.register(NodeIpConfigController).unwrap();
        runtime.register(NodeIpController).unwrap();
        runtime.register(KubeletSpecController::new(RuntimeMode::Metal)).unwrap();
        let running = runtime.start(ctx);
        assert!(running.settle(Duration::from_millis(100), Duration::from_secs(10)).await);
        running
    }

    #[tokio::test]
    async fn worker_spec() {
        let ctx = Context::new();
        let state = State::new();
        let running = start(&ctx, &state, CONFIG).await;

        let node_ip = state.get::<NodeIp>(&ctx, KUBELET_ID).await.unwrap();
        assert_eq!(vec!["10.0.0.4".to_string()], node_ip.spec().addresses);

        let spec = state.get::<KubeletSpec>(&ctx, KUBELET_ID).await.unwrap();
        assert!(spec.metadata().error().is_none());
        assert_eq!("worker-1", spec.spec().expected_nodename);
        assert!(spec.spec().args.contains(&"--node-ip=10.0.0.4".to_string()));
        assert!(spec.spec().args.contains(&"--hostname-override=worker-1".to_string()));
        assert_eq!(serde_json::json!(["10.96.0.10"]), spec.spec().config["clusterDNS"]);

        ctx.cancel();
        running.join().await;
    }

    #[tokio::test]
    async fn locked_fields_land_in_the_error() {
        let ctx = Context::new();
        let state = State::new();
        let source = r#"version: v1alpha1
machine:
  type: worker
  kubelet:
    extraConfig:
      staticPodPath: /tmp
"#;
        let running = start(&ctx, &state, source).await;
        let spec = state.get::<KubeletSpec>(&ctx, KUBELET_ID).await.unwrap();
        assert_eq!(
            Some("field \"staticPodPath\" can't be overridden"),
            spec.metadata().error()
        );

        ctx.cancel();
        running.join().await;
    }

    #[tokio::test]
    async fn machine_config_removal_removes_the_spec() {
        let ctx = Context::new();
        let state = State::new();
        let running = start(&ctx, &state, CONFIG).await;
        assert!(state.try_get::<KubeletSpec>(&ctx, KUBELET_ID).await.unwrap().is_some());

        state
            .destroy(&ctx, &resource_state::Pointer::of::<MachineConfig>(ACTIVE_ID), "")
            .await
            .unwrap();
        assert!(running.settle(Duration::from_millis(100), Duration::from_secs(10)).await);
        assert!(state.try_get::<KubeletConfig>(&ctx, KUBELET_ID).await.unwrap().is_none());
        assert!(state.try_get::<KubeletSpec>(&ctx, KUBELET_ID).await.unwrap().is_none());

        ctx.cancel();
        running.join().await;
    }
}
