use std::time::Duration;

use machinery::config::{RuntimeMode, ValidationOptions};
use machinery::controllers::{register_all, Options};
use machinery::resources::config::{MachineConfig, ACTIVE_ID};
use machinery::resources::cri::{RegistriesConfig, REGISTRIES_ID};
use machinery::resources::k8s::*;
use machinery::resources::network::{HostnameStatus, NodeAddresses, CURRENT_ADDRESSES_ID, HOSTNAME_ID};
use machinery::resources::secrets::{Api, Kubernetes, API_ID, KUBERNETES_ID};
use machinery::Container;
use resource_state::{Context, Pointer, Resource, RunningRuntime, Runtime, State};

mod common;

async fn boot(ctx: &Context, state: &State, source: &str, hostname: &str, addresses: &[&str]) -> RunningRuntime {
    let container = Container::from_bytes(source.as_bytes()).unwrap();
    container
        .validate(RuntimeMode::Container, &ValidationOptions::default())
        .unwrap();

    state
        .create(ctx, Resource::new(ACTIVE_ID, MachineConfig::new(&container).unwrap()))
        .await
        .unwrap();
    state
        .create(ctx, Resource::new(HOSTNAME_ID, HostnameStatus::from_fqdn(hostname)))
        .await
        .unwrap();
    state
        .create(
            ctx,
            Resource::new(
                CURRENT_ADDRESSES_ID,
                NodeAddresses {
                    addresses: addresses.iter().map(|a| a.to_string()).collect(),
                },
            ),
        )
        .await
        .unwrap();

    let mut runtime = Runtime::new(state.clone());
    let options = Options {
        mode: RuntimeMode::Container,
        ..Options::default()
    };
    register_all(&mut runtime, &options).unwrap();
    let running = runtime.start(ctx);
    assert!(running.settle(Duration::from_millis(200), Duration::from_secs(30)).await);
    running
}

#[tokio::test(flavor = "multi_thread")]
async fn control_plane_pipeline() {
    let ctx = Context::new();
    let state = State::new();
    let running = boot(
        &ctx,
        &state,
        &common::with_secrets(common::CONTROL_PLANE),
        "cp-1",
        &["10.5.0.2/24"],
    )
    .await;

    let kubelet = state.get::<KubeletSpec>(&ctx, KUBELET_ID).await.unwrap();
    assert!(kubelet.metadata().error().is_none());
    assert!(kubelet.spec().args.contains(&"--node-ip=10.5.0.2".to_string()));
    assert_eq!(serde_json::json!(false), kubelet.spec().config["protectKernelDefaults"]);

    let mut pods: Vec<String> = state
        .list::<StaticPod>(&ctx)
        .await
        .unwrap()
        .iter()
        .map(|p| p.metadata().id().to_string())
        .collect();
    pods.sort();
    assert_eq!(vec!["kube-apiserver", "kube-controller-manager", "kube-scheduler"], pods);

    let manifests: Vec<String> = state
        .list::<Manifest>(&ctx)
        .await
        .unwrap()
        .iter()
        .map(|m| m.metadata().id().to_string())
        .collect();
    assert!(manifests.contains(&"05-flannel".to_string()));
    assert!(manifests.contains(&"99-namespace".to_string()));

    let secrets = state.get::<Kubernetes>(&ctx, KUBERNETES_ID).await.unwrap();
    let kubeconfig: kube::config::Kubeconfig = serde_yaml::from_str(&secrets.spec().admin_kubeconfig).unwrap();
    assert_eq!(
        Some("https://10.5.0.2:6443"),
        Some(kubeconfig.clusters[0].cluster.server.as_str())
    );

    let api = state.get::<Api>(&ctx, API_ID).await.unwrap();
    assert!(api.metadata().error().is_none());

    let registries = state.get::<RegistriesConfig>(&ctx, REGISTRIES_ID).await.unwrap();
    assert!(registries.spec().mirrors.contains_key("docker.io"));

    ctx.cancel();
    running.join().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn worker_pipeline() {
    let ctx = Context::new();
    let state = State::new();
    let running = boot(&ctx, &state, common::WORKER, "worker-1", &["10.5.0.3/24"]).await;

    let kubelet = state.get::<KubeletSpec>(&ctx, KUBELET_ID).await.unwrap();
    assert_eq!("worker-1", kubelet.spec().expected_nodename);
    assert!(state.list::<StaticPod>(&ctx).await.unwrap().is_empty());
    assert!(state.list::<Manifest>(&ctx).await.unwrap().is_empty());
    assert!(state.try_get::<Kubernetes>(&ctx, KUBERNETES_ID).await.unwrap().is_none());

    ctx.cancel();
    running.join().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn removing_the_config_tears_everything_down() {
    let ctx = Context::new();
    let state = State::new();
    let running = boot(
        &ctx,
        &state,
        &common::with_secrets(common::CONTROL_PLANE),
        "cp-1",
        &["10.5.0.2/24"],
    )
    .await;
    assert!(!state.list::<StaticPod>(&ctx).await.unwrap().is_empty());

    state
        .destroy(&ctx, &Pointer::of::<MachineConfig>(ACTIVE_ID), "")
        .await
        .unwrap();
    assert!(running.settle(Duration::from_millis(200), Duration::from_secs(30)).await);

    assert!(state.try_get::<KubeletSpec>(&ctx, KUBELET_ID).await.unwrap().is_none());
    assert!(state.list::<StaticPod>(&ctx).await.unwrap().is_empty());
    assert!(state.list::<Manifest>(&ctx).await.unwrap().is_empty());
    assert!(state.try_get::<ApiServerConfig>(&ctx, API_SERVER_ID).await.unwrap().is_none());

    ctx.cancel();
    running.join().await;
}
