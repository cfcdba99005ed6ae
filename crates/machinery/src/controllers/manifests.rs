use std::collections::HashSet;

use resource_state::{Context, Controller, ControllerRuntime, Input, Output};
use tracing::{debug, info, warn};

use crate::encoding::{split_documents, to_yaml};
use crate::manifests;
use crate::resources::k8s::{
    BootstrapManifestsConfig, ExtraManifestsConfig, Manifest, BOOTSTRAP_MANIFESTS_ID, EXTRA_MANIFESTS_ID,
};
use crate::resources::secrets::{KubernetesRoot, KUBERNETES_ROOT_ID};

/// Renders the bootstrap manifests into one `Manifest` per component.
pub struct ManifestController;

#[async_trait::async_trait]
impl Controller for ManifestController {
    fn name(&self) -> &str {
        "k8s.ManifestController"
    }

    fn inputs(&self) -> Vec<Input> {
        vec![
            Input::weak_id::<BootstrapManifestsConfig>(BOOTSTRAP_MANIFESTS_ID),
            Input::weak_id::<KubernetesRoot>(KUBERNETES_ROOT_ID),
        ]
    }

    fn outputs(&self) -> Vec<Output> {
        vec![Output::of::<Manifest>()]
    }

    async fn run(&self, ctx: &Context, r: &mut ControllerRuntime) -> anyhow::Result<()> {
        while r.event(ctx).await {
            let config = r.get::<BootstrapManifestsConfig>(ctx, BOOTSTRAP_MANIFESTS_ID).await?;
            let root = r.get::<KubernetesRoot>(ctx, KUBERNETES_ROOT_ID).await?;
            let (config, root) = match (config, root) {
                (Some(config), Some(root)) => (config, root),
                _ => {
                    r.cleanup::<Manifest>(ctx, &HashSet::new()).await?;
                    continue;
                }
            };
            if config.metadata().error().is_some() {
                debug!("bootstrap manifests config is in error, keeping the last rendered set");
                continue;
            }

            let rendered = match manifests::render(config.spec(), root.spec()) {
                Ok(rendered) => rendered,
                Err(e) => {
                    // No single output to hang the error on; retry with backoff.
                    warn!(error = %e, "failed to render bootstrap manifests");
                    return Err(e.into());
                }
            };

            let mut keep = HashSet::new();
            for manifest in rendered {
                keep.insert(manifest.id.clone());
                let items = manifest.items;
                r.modify::<Manifest, _>(ctx, &manifest.id, move |resource| {
                    resource.spec_mut().items = items;
                })
                .await?;
            }
            info!(count = keep.len(), "rendered bootstrap manifests");
            r.cleanup::<Manifest>(ctx, &keep).await?;
        }
        Ok(())
    }
}

/// Turns inline manifests into `Manifest` resources.
///
/// Manifests referenced by URL are left to whoever applies the set; they
/// carry no content until fetched.
pub struct ExtraManifestController;

#[async_trait::async_trait]
impl Controller for ExtraManifestController {
    fn name(&self) -> &str {
        "k8s.ExtraManifestController"
    }

    fn inputs(&self) -> Vec<Input> {
        vec![Input::weak_id::<ExtraManifestsConfig>(EXTRA_MANIFESTS_ID)]
    }

    fn outputs(&self) -> Vec<Output> {
        vec![Output::of::<Manifest>()]
    }

    async fn run(&self, ctx: &Context, r: &mut ControllerRuntime) -> anyhow::Result<()> {
        while r.event(ctx).await {
            let mut keep = HashSet::new();
            if let Some(config) = r.get::<ExtraManifestsConfig>(ctx, EXTRA_MANIFESTS_ID).await? {
                for extra in &config.spec().extra_manifests {
                    if extra.inline_manifest.is_empty() {
                        debug!(url = %extra.url, "skipping manifest without inline contents");
                        continue;
                    }
                    let id = format!("{}-{}", extra.priority, extra.name);
                    keep.insert(id.clone());
                    match inline_items(&extra.inline_manifest) {
                        Ok(items) => {
                            r.modify::<Manifest, _>(ctx, &id, move |resource| {
                                resource.spec_mut().items = items;
                                resource.metadata_mut().set_error(None);
                            })
                            .await?;
                        }
                        Err(e) => {
                            warn!(manifest = %id, error = %e, "invalid inline manifest");
                            r.set_error::<Manifest>(ctx, &id, e).await?;
                        }
                    }
                }
            }
            r.cleanup::<Manifest>(ctx, &keep).await?;
        }
        Ok(())
    }
}

fn inline_items(contents: &str) -> Result<Vec<String>, serde_yaml::Error> {
    split_documents(contents)?.iter().map(to_yaml).collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::controllers::test::{load, start, with_secrets, CONTROL_PLANE, WORKER};
    use resource_state::State;

    async fn manifest_ids(ctx: &Context, state: &State) -> Vec<String> {
        let mut ids: Vec<String> = state
            .list::<Manifest>(ctx)
            .await
            .unwrap()
            .iter()
            .map(|m| m.metadata().id().to_string())
            .collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn bootstrap_and_inline_manifests() {
        let ctx = Context::new();
        let state = State::new();
        load(&ctx, &state, &with_secrets(CONTROL_PLANE)).await;
        let running = start(&ctx, &state).await;

        let ids = manifest_ids(&ctx, &state).await;
        for expected in &[
            "00-kubelet-bootstrapping-token",
            "01-csr-node-bootstrap",
            "05-flannel",
            "10-kube-proxy",
            "11-core-dns",
            "99-namespace",
        ] {
            assert!(ids.contains(&expected.to_string()), "{} missing from {:?}", expected, ids);
        }

        let inline = state.get::<Manifest>(&ctx, "99-namespace").await.unwrap();
        assert_eq!(1, inline.spec().items.len());
        assert!(inline.spec().items[0].contains("kind: Namespace"));

        let token = state
            .get::<Manifest>(&ctx, "00-kubelet-bootstrapping-token")
            .await
            .unwrap();
        assert!(token.spec().items[0].contains("bootstrap-token-abcdef"));

        ctx.cancel();
        running.join().await;
    }

    #[tokio::test]
    async fn workers_render_nothing() {
        let ctx = Context::new();
        let state = State::new();
        load(&ctx, &state, WORKER).await;
        let running = start(&ctx, &state).await;
        assert!(manifest_ids(&ctx, &state).await.is_empty());
        ctx.cancel();
        running.join().await;
    }
}
