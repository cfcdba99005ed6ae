use resource_state::{Context, Controller, ControllerRuntime, Input, Output, ResourceSpec, Runtime};

use super::{active_config, apply};
use crate::config::v1alpha1::Config;
use crate::control_plane::{self, Error};
use crate::resources::config::{MachineConfig, ACTIVE_ID};
use crate::resources::k8s::*;

type Derive<S> = fn(&Config) -> Option<Result<S, Error>>;

/// Derives one control plane component config from the machine config.
///
/// Outputs exist on control plane nodes only; on any other node the
/// output is removed.
pub struct ControlPlaneConfigController<S> {
    name: &'static str,
    id: &'static str,
    derive: Derive<S>,
}

impl<S> ControlPlaneConfigController<S> {
    /// A controller writing `derive(config)` to the output `id`.
    pub fn new(name: &'static str, id: &'static str, derive: Derive<S>) -> Self {
        ControlPlaneConfigController { name, id, derive }
    }
}

/// Registers a controller for every control plane component config.
pub fn register(runtime: &mut Runtime) -> anyhow::Result<()> {
    runtime.register(ControlPlaneConfigController::<ApiServerConfig>::new(
        "k8s.ControlPlaneAPIServerController",
        API_SERVER_ID,
        |c| control_plane::api_server_config(c).map(Ok),
    ))?;
    runtime.register(ControlPlaneConfigController::<ControllerManagerConfig>::new(
        "k8s.ControlPlaneControllerManagerController",
        CONTROLLER_MANAGER_ID,
        |c| control_plane::controller_manager_config(c).map(Ok),
    ))?;
    runtime.register(ControlPlaneConfigController::<SchedulerConfig>::new(
        "k8s.ControlPlaneSchedulerController",
        SCHEDULER_ID,
        control_plane::scheduler_config,
    ))?;
    runtime.register(ControlPlaneConfigController::<ProxyConfig>::new(
        "k8s.ControlPlaneProxyController",
        PROXY_ID,
        control_plane::proxy_config,
    ))?;
    runtime.register(ControlPlaneConfigController::<AdmissionControlConfig>::new(
        "k8s.ControlPlaneAdmissionControlController",
        ADMISSION_CONTROL_ID,
        control_plane::admission_control_config,
    ))?;
    runtime.register(ControlPlaneConfigController::<AuditPolicyConfig>::new(
        "k8s.ControlPlaneAuditPolicyController",
        AUDIT_POLICY_ID,
        control_plane::audit_policy_config,
    ))?;
    runtime.register(ControlPlaneConfigController::<AuthorizationConfig>::new(
        "k8s.ControlPlaneAuthorizationController",
        AUTHORIZATION_ID,
        control_plane::authorization_config,
    ))?;
    runtime.register(ControlPlaneConfigController::<BootstrapManifestsConfig>::new(
        "k8s.ControlPlaneBootstrapManifestsController",
        BOOTSTRAP_MANIFESTS_ID,
        control_plane::bootstrap_manifests_config,
    ))?;
    runtime.register(ControlPlaneConfigController::<ExtraManifestsConfig>::new(
        "k8s.ControlPlaneExtraManifestsController",
        EXTRA_MANIFESTS_ID,
        |c| control_plane::extra_manifests_config(c).map(Ok),
    ))?;
    Ok(())
}

#[async_trait::async_trait]
impl<S> Controller for ControlPlaneConfigController<S>
where
    S: ResourceSpec + Default,
{
    fn name(&self) -> &str {
        self.name
    }

    fn inputs(&self) -> Vec<Input> {
        vec![Input::weak_id::<MachineConfig>(ACTIVE_ID)]
    }

    fn outputs(&self) -> Vec<Output> {
        vec![Output::of::<S>()]
    }

    async fn run(&self, ctx: &Context, r: &mut ControllerRuntime) -> anyhow::Result<()> {
        while r.event(ctx).await {
            let derived = active_config(ctx, r)
                .await?
                .and_then(|(_, config)| (self.derive)(&config));
            apply(ctx, r, self.id, derived).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::controllers::test::{load, CONTROL_PLANE, WORKER};
    use resource_state::State;
    use std::time::Duration;

    async fn start(ctx: &Context, state: &State) -> resource_state::RunningRuntime {
        let mut runtime = Runtime::new(state.clone());
        register(&mut runtime).unwrap();
        let running = runtime.start(ctx);
        assert!(running.settle(Duration::from_millis(100), Duration::from_secs(10)).await);
        running
    }

    #[tokio::test]
    async fn control_plane_gets_every_config() {
        let ctx = Context::new();
        let state = State::new();
        load(&ctx, &state, CONTROL_PLANE).await;
        let running = start(&ctx, &state).await;

        let api_server = state.get::<ApiServerConfig>(&ctx, API_SERVER_ID).await.unwrap();
        assert_eq!("https://10.5.0.2:6443", api_server.spec().control_plane_endpoint);
        assert_eq!(vec!["10.96.0.0/12".to_string()], api_server.spec().service_cidrs);

        let proxy = state.get::<ProxyConfig>(&ctx, PROXY_ID).await.unwrap();
        assert!(proxy.spec().enabled);
        assert!(proxy.spec().args.contains(&"--cluster-cidr=10.244.0.0/16".to_string()));

        let bootstrap = state
            .get::<BootstrapManifestsConfig>(&ctx, BOOTSTRAP_MANIFESTS_ID)
            .await
            .unwrap();
        assert_eq!("10.96.0.10", bootstrap.spec().dns_service_ip);

        let authorization = state.get::<AuthorizationConfig>(&ctx, AUTHORIZATION_ID).await.unwrap();
        let types: Vec<&str> = authorization.spec().config.iter().map(|a| a.type_.as_str()).collect();
        assert_eq!(vec!["Node", "RBAC"], types);

        assert!(state
            .try_get::<ControllerManagerConfig>(&ctx, CONTROLLER_MANAGER_ID)
            .await
            .unwrap()
            .is_some());
        assert!(state.try_get::<SchedulerConfig>(&ctx, SCHEDULER_ID).await.unwrap().is_some());
        assert!(state.try_get::<AdmissionControlConfig>(&ctx, ADMISSION_CONTROL_ID).await.unwrap().is_some());
        assert!(state.try_get::<AuditPolicyConfig>(&ctx, AUDIT_POLICY_ID).await.unwrap().is_some());

        let extra = state.get::<ExtraManifestsConfig>(&ctx, EXTRA_MANIFESTS_ID).await.unwrap();
        assert_eq!("namespace", extra.spec().extra_manifests[0].name);

        ctx.cancel();
        running.join().await;
    }

    #[tokio::test]
    async fn worker_gets_none() {
        let ctx = Context::new();
        let state = State::new();
        load(&ctx, &state, WORKER).await;
        let running = start(&ctx, &state).await;

        assert!(state.list::<ApiServerConfig>(&ctx).await.unwrap().is_empty());
        assert!(state.list::<ProxyConfig>(&ctx).await.unwrap().is_empty());
        assert!(state.list::<BootstrapManifestsConfig>(&ctx).await.unwrap().is_empty());

        ctx.cancel();
        running.join().await;
    }

    #[tokio::test]
    async fn bad_authorizer_is_reported_on_the_output() {
        let ctx = Context::new();
        let state = State::new();
        let source = format!(
            "{}  apiServer:\n    authorizationConfig:\n      - type: Magic\n        name: magic\n",
            CONTROL_PLANE
        );
        load(&ctx, &state, &source).await;
        let running = start(&ctx, &state).await;

        let authorization = state.get::<AuthorizationConfig>(&ctx, AUTHORIZATION_ID).await.unwrap();
        let error = authorization.metadata().error().unwrap();
        assert!(error.contains("invalid authorizer"), "{}", error);

        // Other components are unaffected.
        assert!(state.get::<ApiServerConfig>(&ctx, API_SERVER_ID).await.unwrap().metadata().error().is_none());

        ctx.cancel();
        running.join().await;
    }
}
