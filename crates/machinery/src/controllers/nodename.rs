use resource_state::{Context, Controller, ControllerRuntime, Input, Output, Resource};
use tracing::debug;

use crate::nodename;
use crate::resources::k8s::{KubeletConfig, Nodename, KUBELET_ID, NODENAME_ID};
use crate::resources::network::{HostnameStatus, HOSTNAME_ID};

/// Derives the Kubernetes node name from the hostname.
///
/// The output carries the version of the hostname status it was derived
/// from, so readers can tell a stale name from a current one.
pub struct NodenameController;

#[async_trait::async_trait]
impl Controller for NodenameController {
    fn name(&self) -> &str {
        "k8s.NodenameController"
    }

    fn inputs(&self) -> Vec<Input> {
        vec![
            Input::weak_id::<HostnameStatus>(HOSTNAME_ID),
            Input::weak_id::<KubeletConfig>(KUBELET_ID),
        ]
    }

    fn outputs(&self) -> Vec<Output> {
        vec![Output::of::<Nodename>()]
    }

    async fn run(&self, ctx: &Context, r: &mut ControllerRuntime) -> anyhow::Result<()> {
        while r.event(ctx).await {
            let hostname = match r.get::<HostnameStatus>(ctx, HOSTNAME_ID).await? {
                Some(hostname) => hostname,
                None => continue,
            };
            let kubelet = match r.get::<KubeletConfig>(ctx, KUBELET_ID).await? {
                Some(kubelet) => kubelet,
                None => {
                    r.destroy::<Nodename>(ctx, NODENAME_ID).await?;
                    continue;
                }
            };

            let status = hostname.spec();
            let derived = nodename::from_hostname_parts(
                &status.hostname,
                &status.domainname,
                kubelet.spec().register_with_fqdn,
            )
            .map(|name| {
                debug!(nodename = %name, "derived node name");
                Nodename {
                    nodename: name,
                    hostname_version: hostname.metadata().version().to_string(),
                    skip_node_registration: kubelet.spec().skip_node_registration,
                }
            });
            super::apply(ctx, r, NODENAME_ID, Some(derived)).await?;
        }
        Ok(())
    }
}

/// True once the node name was derived from the current hostname.
pub fn is_ready(nodename: &Resource<Nodename>, hostname: &Resource<HostnameStatus>) -> bool {
    nodename.metadata().error().is_none()
        && !nodename.spec().nodename.is_empty()
        && nodename.spec().hostname_version == hostname.metadata().version().to_string()
}

#[cfg(test)]
mod test {
    use super::*;
    use resource_state::{Runtime, State};
    use std::time::Duration;

    async fn settle(ctx: &Context, state: &State) -> resource_state::RunningRuntime {
        let mut runtime = Runtime::new(state.clone());
        runtime.register(NodenameController).unwrap();
        let running = runtime.start(ctx);
        assert!(running.settle(Duration::from_millis(50), Duration::from_secs(10)).await);
        running
    }

    #[tokio::test]
    async fn follows_the_hostname() {
        let ctx = Context::new();
        let state = State::new();
        state
            .create(&ctx, Resource::new(KUBELET_ID, KubeletConfig::default()))
            .await
            .unwrap();
        let hostname = state
            .create(&ctx, Resource::new(HOSTNAME_ID, HostnameStatus::from_fqdn("Talos_Node.example.com")))
            .await
            .unwrap();

        let running = settle(&ctx, &state).await;
        let nodename = state.get::<Nodename>(&ctx, NODENAME_ID).await.unwrap();
        assert_eq!("talos-node", nodename.spec().nodename);
        assert!(is_ready(&nodename, &hostname));

        let mut renamed = hostname.clone();
        *renamed.spec_mut() = HostnameStatus::from_fqdn("other");
        let renamed = state.update(&ctx, renamed).await.unwrap();
        assert!(!is_ready(&nodename, &renamed));
        assert!(running.settle(Duration::from_millis(50), Duration::from_secs(10)).await);

        let nodename = state.get::<Nodename>(&ctx, NODENAME_ID).await.unwrap();
        assert_eq!("other", nodename.spec().nodename);
        assert!(is_ready(&nodename, &renamed));
        ctx.cancel();
        running.join().await;
    }

    #[tokio::test]
    async fn fqdn_registration() {
        let ctx = Context::new();
        let state = State::new();
        let kubelet = KubeletConfig {
            register_with_fqdn: true,
            ..KubeletConfig::default()
        };
        state.create(&ctx, Resource::new(KUBELET_ID, kubelet)).await.unwrap();
        state
            .create(&ctx, Resource::new(HOSTNAME_ID, HostnameStatus::from_fqdn("node-1.example.com")))
            .await
            .unwrap();

        let running = settle(&ctx, &state).await;
        let nodename = state.get::<Nodename>(&ctx, NODENAME_ID).await.unwrap();
        assert_eq!("node-1.example.com", nodename.spec().nodename);
        ctx.cancel();
        running.join().await;
    }

    #[tokio::test]
    async fn invalid_hostname_is_an_error() {
        let ctx = Context::new();
        let state = State::new();
        state
            .create(&ctx, Resource::new(KUBELET_ID, KubeletConfig::default()))
            .await
            .unwrap();
        state
            .create(&ctx, Resource::new(HOSTNAME_ID, HostnameStatus::from_fqdn("___")))
            .await
            .unwrap();

        let running = settle(&ctx, &state).await;
        let nodename = state.get::<Nodename>(&ctx, NODENAME_ID).await.unwrap();
        assert!(nodename.metadata().error().unwrap().contains("valid Kubernetes Node name"));
        ctx.cancel();
        running.join().await;
    }
}
