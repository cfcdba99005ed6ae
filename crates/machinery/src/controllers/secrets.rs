use std::collections::BTreeSet;
use std::time::Duration;

use resource_state::{Context, Controller, ControllerRuntime, Input, Output, Resource};
use tracing::{debug, info};

use super::{active_config, apply};
use crate::config::v1alpha1::Config;
use crate::constants;
use crate::kubeconfig;
use crate::manifests;
use crate::net::ParseCidrError;
use crate::resources::config::{MachineConfig, ACTIVE_ID};
use crate::resources::network::{HostnameStatus, NodeAddresses, CURRENT_ADDRESSES_ID, HOSTNAME_ID};
use crate::resources::secrets::{
    Api, CertAndKey, Kubernetes, KubernetesRoot, API_ID, KUBERNETES_ID, KUBERNETES_ROOT_ID,
};
use crate::x509;

/// Annotation recording the input versions a certificate was issued for.
pub const ANNOTATION_INPUTS_VERSION: &str = "talos.dev/inputs-version";

/// Cluster secrets of a control plane node, `None` on any other node.
pub fn kubernetes_root(config: &Config) -> Option<Result<KubernetesRoot, ParseCidrError>> {
    let machine = config.machine.as_ref()?;
    if !machine.machine_type().is_control_plane() {
        return None;
    }
    let cluster = config.cluster();
    let api_server = cluster.api_server();

    let mut cert_sans: BTreeSet<String> = api_server.cert_sans.iter().cloned().collect();
    if let Some(host) = cluster.endpoint_url().ok().and_then(|u| u.host_str().map(str::to_string)) {
        cert_sans.insert(host.trim_start_matches('[').trim_end_matches(']').to_string());
    }

    let api_server_ips = match cluster.api_server_ips() {
        Ok(ips) => ips.iter().map(|ip| ip.to_string()).collect(),
        Err(e) => return Some(Err(e)),
    };

    Some(Ok(KubernetesRoot {
        name: cluster.cluster_name.clone(),
        endpoint: cluster.endpoint(),
        local_endpoint: format!("https://localhost:{}", cluster.local_api_server_port()),
        cert_sans: cert_sans.into_iter().collect(),
        dns_domain: cluster.dns_domain(),
        api_server_ips,
        ca: cluster.ca.as_ref().map(CertAndKey::from).unwrap_or_default(),
        accepted_cas: Vec::new(),
        aggregator_ca: cluster.aggregator_ca.as_ref().map(CertAndKey::from).unwrap_or_default(),
        service_account_key: cluster
            .service_account
            .as_ref()
            .map(|sa| sa.key.to_string_lossy())
            .unwrap_or_default(),
        aescbc_encryption_secret: cluster.aescbc_encryption_secret.clone(),
        secretbox_encryption_secret: cluster.secretbox_encryption_secret.clone(),
        bootstrap_token_id: cluster.token_id(),
        bootstrap_token_secret: cluster.token_secret(),
    }))
}

/// Copies the cluster secrets out of the machine config.
pub struct KubernetesRootController;

#[async_trait::async_trait]
impl Controller for KubernetesRootController {
    fn name(&self) -> &str {
        "secrets.KubernetesRootController"
    }

    fn inputs(&self) -> Vec<Input> {
        vec![Input::weak_id::<MachineConfig>(ACTIVE_ID)]
    }

    fn outputs(&self) -> Vec<Output> {
        vec![Output::of::<KubernetesRoot>()]
    }

    async fn run(&self, ctx: &Context, r: &mut ControllerRuntime) -> anyhow::Result<()> {
        while r.event(ctx).await {
            let derived = active_config(ctx, r)
                .await?
                .and_then(|(_, config)| kubernetes_root(&config));
            apply(ctx, r, KUBERNETES_ROOT_ID, derived).await?;
        }
        Ok(())
    }
}

/// Renders the admin kubeconfig and the encryption-at-rest config.
///
/// The admin certificate is reissued when the root secrets change and
/// every twentieth of its lifetime.
pub struct KubernetesSecretsController {
    lifetime: Duration,
}

impl KubernetesSecretsController {
    /// A controller issuing admin certificates valid for `lifetime`.
    pub fn new(lifetime: Duration) -> Self {
        KubernetesSecretsController { lifetime }
    }

    async fn reconcile(&self, ctx: &Context, r: &ControllerRuntime, refresh: bool) -> anyhow::Result<()> {
        let root = match r.get::<KubernetesRoot>(ctx, KUBERNETES_ROOT_ID).await? {
            Some(root) => root,
            None => {
                r.destroy::<Kubernetes>(ctx, KUBERNETES_ID).await?;
                return Ok(());
            }
        };
        let root_version = root.metadata().version().to_string();

        let current = r.get::<Kubernetes>(ctx, KUBERNETES_ID).await?;
        let admin_kubeconfig = match current.as_ref() {
            Some(current) if !refresh && is_current(current, &root_version) => {
                current.spec().admin_kubeconfig.clone()
            }
            _ => match kubeconfig::generate_admin(root.spec(), self.lifetime) {
                Ok(admin) => {
                    info!(cluster = %root.spec().name, "issued admin kubeconfig");
                    admin
                }
                Err(e) => return apply::<Kubernetes, _>(ctx, r, KUBERNETES_ID, Some(Err(e))).await,
            },
        };
        let encryption_config = match manifests::encryption_config(root.spec()) {
            Ok(config) => config,
            Err(e) => return apply::<Kubernetes, _>(ctx, r, KUBERNETES_ID, Some(Err(e))).await,
        };

        r.modify::<Kubernetes, _>(ctx, KUBERNETES_ID, move |resource| {
            *resource.spec_mut() = Kubernetes {
                admin_kubeconfig,
                encryption_config,
            };
            resource
                .metadata_mut()
                .set_annotation(ANNOTATION_INPUTS_VERSION, root_version);
            resource.metadata_mut().set_error(None);
        })
        .await?;
        Ok(())
    }
}

fn is_current<S: resource_state::ResourceSpec>(resource: &Resource<S>, inputs_version: &str) -> bool {
    resource.metadata().error().is_none()
        && resource.metadata().annotations().get(ANNOTATION_INPUTS_VERSION).map(String::as_str) == Some(inputs_version)
}

#[async_trait::async_trait]
impl Controller for KubernetesSecretsController {
    fn name(&self) -> &str {
        "secrets.KubernetesController"
    }

    fn inputs(&self) -> Vec<Input> {
        vec![Input::weak_id::<KubernetesRoot>(KUBERNETES_ROOT_ID)]
    }

    fn outputs(&self) -> Vec<Output> {
        vec![Output::of::<Kubernetes>()]
    }

    async fn run(&self, ctx: &Context, r: &mut ControllerRuntime) -> anyhow::Result<()> {
        let period = self.lifetime / 20;
        loop {
            let refresh = tokio::select! {
                more = r.event(ctx) => {
                    if !more {
                        return Ok(());
                    }
                    false
                }
                _ = tokio::time::sleep(period) => {
                    debug!("refreshing admin kubeconfig");
                    true
                }
            };
            self.reconcile(ctx, r, refresh).await?;
        }
    }
}

/// Issues the machine API server and client certificates from the OS CA.
///
/// Nodes whose config carries the CA certificate without its key get
/// their certificates from elsewhere; no output is produced for them.
pub struct ApiCertificatesController {
    lifetime: Duration,
}

impl ApiCertificatesController {
    /// A controller issuing certificates valid for `lifetime`.
    pub fn new(lifetime: Duration) -> Self {
        ApiCertificatesController { lifetime }
    }
}

/// Names and addresses the machine API answers on.
pub fn api_sans(config: &Config, hostname: &HostnameStatus, addresses: &NodeAddresses) -> Vec<String> {
    let mut sans = BTreeSet::new();
    sans.extend(config.machine().cert_sans.iter().cloned());
    sans.insert("localhost".to_string());
    sans.insert("127.0.0.1".to_string());
    sans.insert("::1".to_string());
    if !hostname.hostname.is_empty() {
        sans.insert(hostname.hostname.clone());
        sans.insert(hostname.fqdn());
    }
    for address in &addresses.addresses {
        if let Some(ip) = address.split('/').next() {
            sans.insert(ip.to_string());
        }
    }
    sans.into_iter().collect()
}

fn issue_api(config: &Config, sans: &[String], lifetime: Duration) -> Option<Result<Api, x509::Error>> {
    let machine = config.machine();
    let ca = machine.ca.as_ref().map(CertAndKey::from)?;
    if ca.key.is_empty() {
        return None;
    }
    let common_name = sans.iter().find(|s| s.parse::<std::net::IpAddr>().is_err()).cloned().unwrap_or_default();

    let issue = || -> Result<Api, x509::Error> {
        let server = x509::server_certificate(&ca, &common_name, sans, lifetime)?;
        let client = x509::client_certificate(&ca, constants::API_CLIENT_COMMON_NAME, "", lifetime)?;
        Ok(Api {
            ca_pem: ca.crt.clone(),
            server_cert_pem: server.crt,
            server_key_pem: server.key,
            client_cert_pem: Some(client.crt),
            client_key_pem: Some(client.key),
            accepted_cas: machine.accepted_cas.iter().map(|pem| pem.crt.to_string_lossy()).collect(),
        })
    };
    Some(issue())
}

#[async_trait::async_trait]
impl Controller for ApiCertificatesController {
    fn name(&self) -> &str {
        "secrets.APIController"
    }

    fn inputs(&self) -> Vec<Input> {
        vec![
            Input::weak_id::<MachineConfig>(ACTIVE_ID),
            Input::weak_id::<HostnameStatus>(HOSTNAME_ID),
            Input::weak_id::<NodeAddresses>(CURRENT_ADDRESSES_ID),
        ]
    }

    fn outputs(&self) -> Vec<Output> {
        vec![Output::of::<Api>()]
    }

    async fn run(&self, ctx: &Context, r: &mut ControllerRuntime) -> anyhow::Result<()> {
        while r.event(ctx).await {
            let (config_resource, config) = match active_config(ctx, r).await? {
                Some(active) => active,
                None => {
                    r.destroy::<Api>(ctx, API_ID).await?;
                    continue;
                }
            };
            let hostname = match r.get::<HostnameStatus>(ctx, HOSTNAME_ID).await? {
                Some(hostname) => hostname,
                None => continue,
            };
            let addresses = r.get::<NodeAddresses>(ctx, CURRENT_ADDRESSES_ID).await?;

            let inputs_version = format!(
                "{}/{}/{}",
                config_resource.metadata().version(),
                hostname.metadata().version(),
                addresses.as_ref().map(|a| a.metadata().version().to_string()).unwrap_or_default()
            );
            if let Some(current) = r.get::<Api>(ctx, API_ID).await? {
                if is_current(&current, &inputs_version) {
                    continue;
                }
            }

            let addresses = addresses.map(Resource::into_spec).unwrap_or_default();
            let sans = api_sans(&config, hostname.spec(), &addresses);
            match issue_api(&config, &sans, self.lifetime) {
                Some(Ok(api)) => {
                    info!(sans = ?sans, "issued machine API certificates");
                    r.modify::<Api, _>(ctx, API_ID, move |resource| {
                        *resource.spec_mut() = api;
                        resource
                            .metadata_mut()
                            .set_annotation(ANNOTATION_INPUTS_VERSION, inputs_version);
                        resource.metadata_mut().set_error(None);
                    })
                    .await?;
                }
                derived => apply(ctx, r, API_ID, derived).await?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::controllers::test::{load, with_secrets, CONTROL_PLANE, WORKER};
    use resource_state::{Runtime, State};

    async fn start(ctx: &Context, state: &State, lifetime: Duration) -> resource_state::RunningRuntime {
        let mut runtime = Runtime::new(state.clone());
        runtime.register(KubernetesRootController).unwrap();
        runtime.register(KubernetesSecretsController::new(lifetime)).unwrap();
        runtime.register(ApiCertificatesController::new(lifetime)).unwrap();
        let running = runtime.start(ctx);
        assert!(running.settle(Duration::from_millis(100), Duration::from_secs(20)).await);
        running
    }

    #[tokio::test]
    async fn control_plane_secrets() {
        let ctx = Context::new();
        let state = State::new();
        load(&ctx, &state, &with_secrets(CONTROL_PLANE)).await;
        state
            .create(&ctx, Resource::new(HOSTNAME_ID, HostnameStatus::from_fqdn("cp-1")))
            .await
            .unwrap();
        let running = start(&ctx, &state, constants::ADMIN_CERT_DEFAULT_LIFETIME).await;

        let root = state.get::<KubernetesRoot>(&ctx, KUBERNETES_ROOT_ID).await.unwrap();
        assert_eq!("demo", root.spec().name);
        assert_eq!("https://localhost:6443", root.spec().local_endpoint);
        assert_eq!(vec!["10.5.0.2".to_string()], root.spec().cert_sans);
        assert_eq!(vec!["10.96.0.1".to_string()], root.spec().api_server_ips);
        assert_eq!("abcdef", root.spec().bootstrap_token_id);

        let secrets = state.get::<Kubernetes>(&ctx, KUBERNETES_ID).await.unwrap();
        let kubeconfig = kubeconfig::load_and_validate(&secrets.spec().admin_kubeconfig).unwrap();
        assert_eq!(Some("admin@demo"), kubeconfig.current_context.as_deref());
        assert!(secrets.spec().encryption_config.contains("secretbox"));

        let api = state.get::<Api>(&ctx, API_ID).await.unwrap();
        assert!(api.spec().server_cert_pem.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(api.spec().client_cert_pem.is_some());

        ctx.cancel();
        running.join().await;
    }

    #[tokio::test]
    async fn unchanged_inputs_keep_the_certificates() {
        let ctx = Context::new();
        let state = State::new();
        load(&ctx, &state, &with_secrets(CONTROL_PLANE)).await;
        let hostname = state
            .create(&ctx, Resource::new(HOSTNAME_ID, HostnameStatus::from_fqdn("cp-1")))
            .await
            .unwrap();
        let running = start(&ctx, &state, constants::ADMIN_CERT_DEFAULT_LIFETIME).await;

        let api = state.get::<Api>(&ctx, API_ID).await.unwrap();
        let admin = state.get::<Kubernetes>(&ctx, KUBERNETES_ID).await.unwrap();

        // Rewriting an input with the same spec doesn't bump its version.
        state
            .modify(&ctx, hostname.clone(), |h| *h.spec_mut() = HostnameStatus::from_fqdn("cp-1"))
            .await
            .unwrap();
        assert!(running.settle(Duration::from_millis(100), Duration::from_secs(10)).await);
        assert_eq!(api, state.get::<Api>(&ctx, API_ID).await.unwrap());
        assert_eq!(admin, state.get::<Kubernetes>(&ctx, KUBERNETES_ID).await.unwrap());

        // A new hostname reissues the API certificate only.
        state
            .modify(&ctx, hostname, |h| *h.spec_mut() = HostnameStatus::from_fqdn("cp-2"))
            .await
            .unwrap();
        assert!(running.settle(Duration::from_millis(100), Duration::from_secs(10)).await);
        assert_ne!(
            api.spec().server_cert_pem,
            state.get::<Api>(&ctx, API_ID).await.unwrap().spec().server_cert_pem
        );
        assert_eq!(admin, state.get::<Kubernetes>(&ctx, KUBERNETES_ID).await.unwrap());

        ctx.cancel();
        running.join().await;
    }

    #[tokio::test]
    async fn missing_cluster_ca_is_reported() {
        let ctx = Context::new();
        let state = State::new();
        load(&ctx, &state, CONTROL_PLANE).await;
        let running = start(&ctx, &state, constants::ADMIN_CERT_DEFAULT_LIFETIME).await;

        let secrets = state.get::<Kubernetes>(&ctx, KUBERNETES_ID).await.unwrap();
        assert_eq!(Some("issuing CA is missing"), secrets.metadata().error());
        // No OS CA, no machine API certificates.
        assert!(state.try_get::<Api>(&ctx, API_ID).await.unwrap().is_none());

        ctx.cancel();
        running.join().await;
    }

    #[tokio::test]
    async fn workers_have_no_cluster_secrets() {
        let ctx = Context::new();
        let state = State::new();
        load(&ctx, &state, WORKER).await;
        let running = start(&ctx, &state, constants::ADMIN_CERT_DEFAULT_LIFETIME).await;
        assert!(state.try_get::<KubernetesRoot>(&ctx, KUBERNETES_ROOT_ID).await.unwrap().is_none());
        assert!(state.try_get::<Kubernetes>(&ctx, KUBERNETES_ID).await.unwrap().is_none());
        ctx.cancel();
        running.join().await;
    }

    #[test]
    fn sans_cover_names_and_addresses() {
        let config = Config::default();
        let addresses = NodeAddresses {
            addresses: vec!["10.5.0.2/24".to_string()],
        };
        let sans = api_sans(&config, &HostnameStatus::from_fqdn("cp-1.example.com"), &addresses);
        for expected in &["10.5.0.2", "cp-1", "cp-1.example.com", "localhost", "127.0.0.1"] {
            assert!(sans.contains(&expected.to_string()), "{} missing from {:?}", expected, sans);
        }
    }
}
