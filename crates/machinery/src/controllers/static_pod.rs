use std::collections::HashSet;

use resource_state::{Context, Controller, ControllerRuntime, Input, Output, Resource, ResourceSpec};
use tracing::debug;

use super::apply;
use crate::resources::k8s::*;
use crate::resources::secrets::{KubernetesRoot, KUBERNETES_ROOT_ID};
use crate::static_pod::{self, Versions};

/// Renders the control plane static pods from the component configs.
///
/// Pods are stamped with the versions of the secrets and configs they
/// were rendered from so the kubelet restarts them on any change.
pub struct StaticPodController;

fn version<S: ResourceSpec>(resource: &Resource<S>) -> String {
    resource.metadata().version().to_string()
}

/// The last good spec of `resource`, `None` while it reports an error.
fn healthy<S: ResourceSpec>(resource: &Option<Resource<S>>) -> Option<&Resource<S>> {
    resource.as_ref().filter(|r| r.metadata().error().is_none())
}

#[async_trait::async_trait]
impl Controller for StaticPodController {
    fn name(&self) -> &str {
        "k8s.ControlPlaneStaticPodController"
    }

    fn inputs(&self) -> Vec<Input> {
        vec![
            Input::weak_id::<KubernetesRoot>(KUBERNETES_ROOT_ID),
            Input::weak_id::<ApiServerConfig>(API_SERVER_ID),
            Input::weak_id::<ControllerManagerConfig>(CONTROLLER_MANAGER_ID),
            Input::weak_id::<SchedulerConfig>(SCHEDULER_ID),
            Input::weak_id::<AdmissionControlConfig>(ADMISSION_CONTROL_ID),
            Input::weak_id::<AuditPolicyConfig>(AUDIT_POLICY_ID),
            Input::weak_id::<AuthorizationConfig>(AUTHORIZATION_ID),
        ]
    }

    fn outputs(&self) -> Vec<Output> {
        vec![Output::of::<StaticPod>()]
    }

    async fn run(&self, ctx: &Context, r: &mut ControllerRuntime) -> anyhow::Result<()> {
        while r.event(ctx).await {
            let mut keep = HashSet::new();

            let root = match r.get::<KubernetesRoot>(ctx, KUBERNETES_ROOT_ID).await? {
                Some(root) => root,
                None => {
                    debug!("no cluster secrets, no static pods");
                    r.cleanup::<StaticPod>(ctx, &keep).await?;
                    continue;
                }
            };
            let secrets = version(&root);

            let api_server = r.get::<ApiServerConfig>(ctx, API_SERVER_ID).await?;
            let admission = r.get::<AdmissionControlConfig>(ctx, ADMISSION_CONTROL_ID).await?;
            let audit = r.get::<AuditPolicyConfig>(ctx, AUDIT_POLICY_ID).await?;
            let authorization = r.get::<AuthorizationConfig>(ctx, AUTHORIZATION_ID).await?;

            if api_server.is_some() {
                keep.insert(API_SERVER_ID.to_string());
            }
            // Errors on any input keep the running pod as is.
            if let (Some(cfg), Some(admission), Some(audit), Some(authorization)) = (
                healthy(&api_server),
                healthy(&admission),
                healthy(&audit),
                healthy(&authorization),
            ) {
                let versions = Versions {
                    secrets: secrets.clone(),
                    config: version(cfg),
                    config_files: format!("{}-{}-{}", version(admission), version(audit), version(authorization)),
                };
                let derived = static_pod::api_server(cfg.spec(), Some(authorization.spec()), &versions)
                    .map(|pod| StaticPod { pod });
                apply(ctx, r, API_SERVER_ID, Some(derived)).await?;
            }

            let controller_manager = r.get::<ControllerManagerConfig>(ctx, CONTROLLER_MANAGER_ID).await?;
            if let Some(cfg) = controller_manager.as_ref() {
                if cfg.spec().enabled {
                    keep.insert(CONTROLLER_MANAGER_ID.to_string());
                }
                let versions = Versions {
                    secrets: secrets.clone(),
                    config: version(cfg),
                    ..Versions::default()
                };
                let derived = static_pod::controller_manager(cfg.spec(), &versions)
                    .map(|pod| pod.map(|pod| StaticPod { pod }))
                    .transpose();
                if derived.is_some() && healthy(&controller_manager).is_some() {
                    apply(ctx, r, CONTROLLER_MANAGER_ID, derived).await?;
                }
            }

            let scheduler = r.get::<SchedulerConfig>(ctx, SCHEDULER_ID).await?;
            if let Some(cfg) = scheduler.as_ref() {
                if cfg.spec().enabled {
                    keep.insert(SCHEDULER_ID.to_string());
                }
                let versions = Versions {
                    secrets: secrets.clone(),
                    config: version(cfg),
                    ..Versions::default()
                };
                let derived = static_pod::scheduler(cfg.spec(), &versions)
                    .map(|pod| pod.map(|pod| StaticPod { pod }))
                    .transpose();
                if derived.is_some() && healthy(&scheduler).is_some() {
                    apply(ctx, r, SCHEDULER_ID, derived).await?;
                }
            }

            r.cleanup::<StaticPod>(ctx, &keep).await?;
        }
        Ok(())
    }
}
