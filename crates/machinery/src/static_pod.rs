//! Static pods of the control plane components.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Capabilities, Container, EnvVar, EnvVarSource, HTTPGetAction, HostPathVolumeSource, ObjectFieldSelector, Pod,
    PodSecurityContext, PodSpec, Probe, ResourceRequirements, SeccompProfile, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::argsbuilder::{Args, DeniedError, MergePolicies, MergePolicy};
use crate::constants;
use crate::control_plane::{ADMISSION_CONTROL_FILE, AUDIT_POLICY_FILE, AUTHORIZATION_FILE, SCHEDULER_CONFIG_FILE};
use crate::images::KubernetesVersion;
use crate::resources::k8s::{
    ApiServerConfig, AuthorizationConfig, ControllerManagerConfig, ExtraVolume, Resources, SchedulerConfig,
    API_SERVER_ID, CONTROLLER_MANAGER_ID, SCHEDULER_ID,
};

/// Annotation carrying the version of the secrets a pod was rendered with.
pub const ANNOTATION_SECRETS_VERSION: &str = "talos.dev/secrets-version";
/// Annotation carrying the version of the component config.
pub const ANNOTATION_CONFIG_VERSION: &str = "talos.dev/config-version";
/// Annotation carrying the version of the rendered config files.
pub const ANNOTATION_CONFIG_FILE_VERSION: &str = "talos.dev/config-file-version";

const TLS_CIPHER_SUITES: &str = "TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305,TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305,TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,TLS_RSA_WITH_AES_256_GCM_SHA384,TLS_RSA_WITH_AES_128_GCM_SHA256";

/// Reasons a static pod can't be rendered.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A user argument isn't allowed.
    #[error(transparent)]
    Args(#[from] DeniedError),
    /// A resource request or limit doesn't parse.
    #[error("error parsing {what}: {value:?} is not a quantity")]
    Quantity {
        /// `CPU request`, `memory limit` and so on.
        what: String,
        /// Value as configured.
        value: String,
    },
}

/// Versions stamped on a pod so that it's replaced when its inputs change.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Versions {
    /// Version of the secrets the component reads.
    pub secrets: String,
    /// Version of the component config resource.
    pub config: String,
    /// Version of the rendered config files, API server only.
    pub config_files: String,
}

/// Parses a Kubernetes quantity into base units, so `512Mi` is
/// `536870912` and `200m` is `0.2`.
pub fn parse_quantity(value: &str) -> Option<f64> {
    let value = value.trim();
    let split = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(value.len());
    let (number, suffix) = value.split_at(split);
    if number.is_empty() {
        return None;
    }
    let number: f64 = number.parse().ok()?;

    let multiplier = match suffix {
        "" => 1.0,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024f64,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        exp if exp.starts_with('e') || exp.starts_with('E') => 10f64.powi(exp[1..].parse().ok()?),
        _ => return None,
    };
    Some(number * multiplier)
}

fn quantity(what: &str, value: &str) -> Result<Quantity, Error> {
    match parse_quantity(value) {
        Some(_) => Ok(Quantity(value.to_string())),
        None => Err(Error::Quantity {
            what: what.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Requests default to the given values; limits only carry what's set.
fn resources(config: &Resources, default_cpu: &str, default_memory: &str) -> Result<ResourceRequirements, Error> {
    let mut requests = BTreeMap::new();
    requests.insert("cpu".to_string(), Quantity(default_cpu.to_string()));
    requests.insert("memory".to_string(), Quantity(default_memory.to_string()));
    let mut limits = BTreeMap::new();

    for (key, name) in [("cpu", "CPU"), ("memory", "memory")].iter() {
        if let Some(value) = config.requests.get(*key).filter(|v| !v.is_empty()) {
            requests.insert(key.to_string(), quantity(&format!("{} request", name), value)?);
        }
        if let Some(value) = config.limits.get(*key).filter(|v| !v.is_empty()) {
            limits.insert(key.to_string(), quantity(&format!("{} limit", name), value)?);
        }
    }

    Ok(ResourceRequirements {
        requests: Some(requests),
        limits: if limits.is_empty() { None } else { Some(limits) },
    })
}

/// `GOMEMLIMIT` just under the memory limit, if there is one.
fn go_gc_env(resources: &ResourceRequirements) -> Option<EnvVar> {
    let limit = resources.limits.as_ref()?.get("memory")?;
    let bytes = parse_quantity(&limit.0)?.ceil() as u64;
    if bytes == 0 {
        return None;
    }
    Some(EnvVar {
        name: "GOMEMLIMIT".to_string(),
        value: Some((bytes * constants::GO_GC_MEM_LIMIT_PERCENTAGE / 100).to_string()),
        ..EnvVar::default()
    })
}

/// `POD_IP` from the downward API, user variables sorted with `$` escaped,
/// then `GOMEMLIMIT`.
fn env_vars(environment: &BTreeMap<String, String>, resources: &ResourceRequirements) -> Vec<EnvVar> {
    let mut env = vec![EnvVar {
        name: "POD_IP".to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: "status.podIP".to_string(),
                ..ObjectFieldSelector::default()
            }),
            ..EnvVarSource::default()
        }),
        ..EnvVar::default()
    }];
    env.extend(environment.iter().map(|(name, value)| EnvVar {
        name: name.clone(),
        value: Some(value.replace('$', "$$")),
        ..EnvVar::default()
    }));
    env.extend(go_gc_env(resources));
    env
}

fn host_path_volume(name: &str, path: &str) -> Volume {
    Volume {
        name: name.to_string(),
        host_path: Some(HostPathVolumeSource {
            path: path.to_string(),
            ..HostPathVolumeSource::default()
        }),
        ..Volume::default()
    }
}

fn mount(name: &str, path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: Some(read_only),
        ..VolumeMount::default()
    }
}

fn volumes(base: &[(&str, &str)], extra: &[ExtraVolume]) -> Vec<Volume> {
    base.iter()
        .map(|(name, path)| host_path_volume(name, path))
        .chain(extra.iter().map(|v| host_path_volume(&v.name, &v.host_path)))
        .collect()
}

fn mounts(base: &[(&str, &str, bool)], extra: &[ExtraVolume]) -> Vec<VolumeMount> {
    base.iter()
        .map(|(name, path, ro)| mount(name, path, *ro))
        .chain(extra.iter().map(|v| mount(&v.name, &v.mount_path, v.read_only)))
        .collect()
}

fn https_probe(path: &str, port: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            host: Some("localhost".to_string()),
            port: IntOrString::Int(port),
            scheme: Some("HTTPS".to_string()),
            ..HTTPGetAction::default()
        }),
        ..Probe::default()
    }
}

fn security_context(add: &[&str]) -> SecurityContext {
    SecurityContext {
        allow_privilege_escalation: Some(false),
        capabilities: Some(Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            add: if add.is_empty() {
                None
            } else {
                Some(add.iter().map(|c| c.to_string()).collect())
            },
        }),
        seccomp_profile: Some(SeccompProfile {
            type_: "RuntimeDefault".to_string(),
            ..SeccompProfile::default()
        }),
        ..SecurityContext::default()
    }
}

fn labels(id: &str, image: &str) -> BTreeMap<String, String> {
    let version = KubernetesVersion::from_image_ref(image)
        .map(|v| v.to_string())
        .unwrap_or_default();
    vec![
        ("tier", "control-plane".to_string()),
        ("k8s-app", id.to_string()),
        ("component", id.to_string()),
        ("app.kubernetes.io/name", id.to_string()),
        ("app.kubernetes.io/version", version),
        ("app.kubernetes.io/component", "control-plane".to_string()),
        ("app.kubernetes.io/managed-by", "Talos".to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Shared pod skeleton: host network, non-root, system critical.
fn pod(id: &str, annotations: BTreeMap<String, String>, container: Container, volumes: Vec<Volume>) -> Pod {
    let image = container.image.clone().unwrap_or_default();
    Pod {
        metadata: ObjectMeta {
            name: Some(id.to_string()),
            namespace: Some("kube-system".to_string()),
            annotations: Some(annotations),
            labels: Some(labels(id, &image)),
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec {
            priority: Some(constants::SYSTEM_CRITICAL_PRIORITY),
            priority_class_name: Some("system-cluster-critical".to_string()),
            containers: vec![container],
            host_network: Some(true),
            security_context: Some(PodSecurityContext {
                run_as_non_root: Some(true),
                run_as_user: Some(constants::KUBERNETES_RUN_USER),
                run_as_group: Some(constants::KUBERNETES_RUN_GROUP),
                ..PodSecurityContext::default()
            }),
            volumes: Some(volumes),
            ..PodSpec::default()
        }),
        ..Pod::default()
    }
}

fn annotations(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// The kube-apiserver pod.
///
/// With an authorizer chain and Kubernetes 1.30 or newer the chain is
/// passed as `--authorization-config` instead of `--authorization-mode`.
pub fn api_server(
    cfg: &ApiServerConfig,
    authorization: Option<&AuthorizationConfig>,
    versions: &Versions,
) -> Result<Pod, Error> {
    let secrets = |file: &str| format!("{}/{}", constants::KUBE_APISERVER_SECRETS_DIR, file);
    let config_file = |file: &str| format!("{}/{}", constants::KUBE_APISERVER_CONFIG_DIR, file);

    let mut admission_plugins = vec!["NodeRestriction"];
    if cfg.pod_security_policy_enabled {
        admission_plugins.push("PodSecurityPolicy");
    }

    let mut args = Args::new();
    args.set("admission-control-config-file", config_file(ADMISSION_CONTROL_FILE))
        .set("allow-privileged", "true")
        .set("anonymous-auth", "false")
        .set("api-audiences", &cfg.control_plane_endpoint)
        .set("bind-address", "0.0.0.0")
        .set("client-ca-file", secrets("ca.crt"))
        .set_list("enable-admission-plugins", admission_plugins)
        .set("requestheader-client-ca-file", secrets("aggregator-ca.crt"))
        .set("requestheader-allowed-names", "front-proxy-client")
        .set("requestheader-extra-headers-prefix", "X-Remote-Extra-")
        .set("requestheader-group-headers", "X-Remote-Group")
        .set("requestheader-username-headers", "X-Remote-User")
        .set("proxy-client-cert-file", secrets("front-proxy-client.crt"))
        .set("proxy-client-key-file", secrets("front-proxy-client.key"))
        .set("enable-bootstrap-token-auth", "true")
        .set("tls-min-version", "VersionTLS12")
        .set("tls-cipher-suites", TLS_CIPHER_SUITES)
        .set("encryption-provider-config", secrets("encryptionconfig.yaml"))
        .set("audit-policy-file", config_file(AUDIT_POLICY_FILE))
        .set(
            "audit-log-path",
            format!("{}/kube-apiserver.log", constants::KUBERNETES_AUDIT_LOG_DIR),
        )
        .set("audit-log-maxage", "30")
        .set("audit-log-maxbackup", "10")
        .set("audit-log-maxsize", "100")
        .set("profiling", "false")
        .set("etcd-cafile", secrets("etcd-client-ca.crt"))
        .set("etcd-certfile", secrets("etcd-client.crt"))
        .set("etcd-keyfile", secrets("etcd-client.key"))
        .set_list("etcd-servers", cfg.etcd_servers.iter().cloned())
        .set("kubelet-client-certificate", secrets("apiserver-kubelet-client.crt"))
        .set("kubelet-client-key", secrets("apiserver-kubelet-client.key"))
        .set("secure-port", cfg.local_port.to_string())
        .set("service-account-issuer", &cfg.control_plane_endpoint)
        .set("service-account-key-file", secrets("service-account.pub"))
        .set("service-account-signing-key-file", secrets("service-account.key"))
        .set_list("service-cluster-ip-range", cfg.service_cidrs.iter().cloned())
        .set("tls-cert-file", secrets("apiserver.crt"))
        .set("tls-private-key-file", secrets("apiserver.key"))
        .set("kubelet-preferred-address-types", "InternalIP,ExternalIP,Hostname");

    let structured_authorization = authorization.is_some()
        && KubernetesVersion::from_image_ref(&cfg.image).map_or(false, |v| v.at_least(1, 30));
    if structured_authorization {
        args.set("authorization-config", config_file(AUTHORIZATION_FILE));
    } else {
        args.set("authorization-mode", "Node,RBAC");
    }
    if !cfg.advertised_address.is_empty() {
        args.set("advertise-address", &cfg.advertised_address);
    }
    if !cfg.cloud_provider.is_empty() {
        args.set("cloud-provider", &cfg.cloud_provider);
    }

    let policies = MergePolicies::new()
        .with(
            MergePolicy::Additive,
            &[
                "enable-admission-plugins",
                "feature-gates",
                "authorization-mode",
                "tls-cipher-suites",
            ],
        )
        .with(
            MergePolicy::Denied,
            &[
                "etcd-servers",
                "client-ca-file",
                "requestheader-client-ca-file",
                "proxy-client-cert-file",
                "proxy-client-key-file",
                "encryption-provider-config",
                "etcd-cafile",
                "etcd-certfile",
                "etcd-keyfile",
                "kubelet-client-certificate",
                "kubelet-client-key",
                "service-account-key-file",
                "service-account-signing-key-file",
                "tls-cert-file",
                "tls-private-key-file",
            ],
        );
    args.merge(&cfg.extra_args, &policies)?;

    let mut command = vec!["/usr/local/bin/kube-apiserver".to_string()];
    command.extend(args.args());

    let resources = resources(&cfg.resources, "200m", "512Mi")?;
    let container = Container {
        name: API_SERVER_ID.to_string(),
        image: Some(cfg.image.clone()),
        command: Some(command),
        env: Some(env_vars(&cfg.environment_variables, &resources)),
        volume_mounts: Some(mounts(
            &[
                ("secrets", constants::KUBE_APISERVER_SECRETS_DIR, true),
                ("config", constants::KUBE_APISERVER_CONFIG_DIR, true),
                ("audit", constants::KUBERNETES_AUDIT_LOG_DIR, false),
            ],
            &cfg.extra_volumes,
        )),
        resources: Some(resources),
        security_context: Some(security_context(&["NET_BIND_SERVICE"])),
        ..Container::default()
    };

    Ok(pod(
        API_SERVER_ID,
        annotations(&[
            (ANNOTATION_SECRETS_VERSION, &versions.secrets),
            (ANNOTATION_CONFIG_FILE_VERSION, &versions.config_files),
            (ANNOTATION_CONFIG_VERSION, &versions.config),
        ]),
        container,
        volumes(
            &[
                ("secrets", constants::KUBE_APISERVER_SECRETS_DIR),
                ("config", constants::KUBE_APISERVER_CONFIG_DIR),
                ("audit", constants::KUBERNETES_AUDIT_LOG_DIR),
            ],
            &cfg.extra_volumes,
        ),
    ))
}

/// The kube-controller-manager pod, `None` when disabled.
pub fn controller_manager(cfg: &ControllerManagerConfig, versions: &Versions) -> Result<Option<Pod>, Error> {
    if !cfg.enabled {
        return Ok(None);
    }
    let secrets = |file: &str| format!("{}/{}", constants::KUBE_CONTROLLER_MANAGER_SECRETS_DIR, file);

    let mut args = Args::new();
    args.set("allocate-node-cidrs", "true")
        .set("bind-address", "127.0.0.1")
        .set_list("cluster-cidr", cfg.pod_cidrs.iter().cloned())
        .set_list("service-cluster-ip-range", cfg.service_cidrs.iter().cloned())
        .set("cluster-signing-cert-file", secrets("ca.crt"))
        .set("cluster-signing-key-file", secrets("ca.key"))
        .set("controllers", "*,tokencleaner")
        .set("configure-cloud-routes", "false")
        .set("kubeconfig", secrets("kubeconfig"))
        .set("authentication-kubeconfig", secrets("kubeconfig"))
        .set("authorization-kubeconfig", secrets("kubeconfig"))
        .set("leader-elect", "true")
        .set("root-ca-file", secrets("ca.crt"))
        .set("service-account-private-key-file", secrets("service-account.key"))
        .set("profiling", "false")
        .set("tls-min-version", "VersionTLS13");
    if !cfg.cloud_provider.is_empty() {
        args.set("cloud-provider", &cfg.cloud_provider);
    }

    let policies = MergePolicies::new()
        .with(MergePolicy::Additive, &["service-cluster-ip-range", "controllers"])
        .with(
            MergePolicy::Denied,
            &[
                "cluster-signing-cert-file",
                "cluster-signing-key-file",
                "authentication-kubeconfig",
                "authorization-kubeconfig",
                "root-ca-file",
                "service-account-private-key-file",
            ],
        );
    args.merge(&cfg.extra_args, &policies)?;

    let mut command = vec![
        "/usr/local/bin/kube-controller-manager".to_string(),
        "--use-service-account-credentials".to_string(),
    ];
    command.extend(args.args());

    let resources = resources(&cfg.resources, "50m", "256Mi")?;
    let container = Container {
        name: CONTROLLER_MANAGER_ID.to_string(),
        image: Some(cfg.image.clone()),
        command: Some(command),
        env: Some(env_vars(&cfg.environment_variables, &resources)),
        volume_mounts: Some(mounts(
            &[("secrets", constants::KUBE_CONTROLLER_MANAGER_SECRETS_DIR, true)],
            &cfg.extra_volumes,
        )),
        startup_probe: Some(Probe {
            period_seconds: Some(5),
            failure_threshold: Some(12),
            ..https_probe("/healthz", 10257)
        }),
        liveness_probe: Some(Probe {
            timeout_seconds: Some(15),
            ..https_probe("/healthz", 10257)
        }),
        resources: Some(resources),
        security_context: Some(security_context(&[])),
        ..Container::default()
    };

    Ok(Some(pod(
        CONTROLLER_MANAGER_ID,
        annotations(&[
            (ANNOTATION_SECRETS_VERSION, &versions.secrets),
            (ANNOTATION_CONFIG_VERSION, &versions.config),
        ]),
        container,
        volumes(
            &[("secrets", constants::KUBE_CONTROLLER_MANAGER_SECRETS_DIR)],
            &cfg.extra_volumes,
        ),
    )))
}

/// Health endpoints of the scheduler as `(startup, liveness, readiness)`.
/// 1.32 split `/healthz` into `/livez` and `/readyz`.
fn scheduler_health_endpoints(image: &str) -> (&'static str, &'static str, &'static str) {
    match KubernetesVersion::from_image_ref(image) {
        Some(v) if v.at_least(1, 32) => ("/livez", "/livez", "/readyz"),
        _ => ("/healthz", "/healthz", "/healthz"),
    }
}

/// The kube-scheduler pod, `None` when disabled.
pub fn scheduler(cfg: &SchedulerConfig, versions: &Versions) -> Result<Option<Pod>, Error> {
    if !cfg.enabled {
        return Ok(None);
    }
    let secrets = |file: &str| format!("{}/{}", constants::KUBE_SCHEDULER_SECRETS_DIR, file);

    let mut args = Args::new();
    args.set(
        "config",
        format!("{}/{}", constants::KUBE_SCHEDULER_CONFIG_DIR, SCHEDULER_CONFIG_FILE),
    )
    .set("authentication-tolerate-lookup-failure", "false")
    .set("authentication-kubeconfig", secrets("kubeconfig"))
    .set("authorization-kubeconfig", secrets("kubeconfig"))
    .set("bind-address", "127.0.0.1")
    .set("leader-elect", "true")
    .set("profiling", "false")
    .set("tls-min-version", "VersionTLS13");

    let policies = MergePolicies::new().with(
        MergePolicy::Denied,
        &[
            "kubeconfig",
            "authentication-kubeconfig",
            "authorization-kubeconfig",
            "config",
        ],
    );
    args.merge(&cfg.extra_args, &policies)?;

    let mut command = vec!["/usr/local/bin/kube-scheduler".to_string()];
    command.extend(args.args());

    let (startup, liveness, readiness) = scheduler_health_endpoints(&cfg.image);
    let resources = resources(&cfg.resources, "10m", "64Mi")?;
    let container = Container {
        name: SCHEDULER_ID.to_string(),
        image: Some(cfg.image.clone()),
        command: Some(command),
        env: Some(env_vars(&cfg.environment_variables, &resources)),
        volume_mounts: Some(mounts(
            &[
                ("secrets", constants::KUBE_SCHEDULER_SECRETS_DIR, true),
                ("config", constants::KUBE_SCHEDULER_CONFIG_DIR, true),
            ],
            &cfg.extra_volumes,
        )),
        startup_probe: Some(https_probe(startup, 10259)),
        liveness_probe: Some(https_probe(liveness, 10259)),
        readiness_probe: Some(https_probe(readiness, 10259)),
        resources: Some(resources),
        security_context: Some(security_context(&[])),
        ..Container::default()
    };

    Ok(Some(pod(
        SCHEDULER_ID,
        annotations(&[
            (ANNOTATION_SECRETS_VERSION, &versions.secrets),
            (ANNOTATION_CONFIG_VERSION, &versions.config),
        ]),
        container,
        volumes(
            &[
                ("secrets", constants::KUBE_SCHEDULER_SECRETS_DIR),
                ("config", constants::KUBE_SCHEDULER_CONFIG_DIR),
            ],
            &cfg.extra_volumes,
        ),
    )))
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    fn command(pod: &Pod) -> Vec<String> {
        pod.spec.as_ref().unwrap().containers[0].command.clone().unwrap()
    }

    fn env(pod: &Pod) -> Vec<EnvVar> {
        pod.spec.as_ref().unwrap().containers[0].env.clone().unwrap()
    }

    fn api_server_config() -> ApiServerConfig {
        ApiServerConfig {
            image: "registry.k8s.io/kube-apiserver:v1.31.1".into(),
            control_plane_endpoint: "https://example.com:6443".into(),
            etcd_servers: vec![constants::ETCD_LOCAL_ENDPOINT.into()],
            local_port: 6443,
            service_cidrs: vec!["10.96.0.0/12".into()],
            advertised_address: "$(POD_IP)".into(),
            ..ApiServerConfig::default()
        }
    }

    #[rstest]
    #[case("512Mi", 536870912.0)]
    #[case("1Gi", 1073741824.0)]
    #[case("200m", 0.2)]
    #[case("2", 2.0)]
    #[case("1.5G", 1.5e9)]
    #[case("1e3", 1000.0)]
    fn quantities_parse(#[case] value: &str, #[case] expected: f64) {
        let parsed = parse_quantity(value).unwrap();
        assert!((parsed - expected).abs() < 1e-9, "{} parsed as {}", value, parsed);
    }

    #[test]
    fn malformed_quantities_are_rejected() {
        assert_eq!(None, parse_quantity("lots"));
        assert_eq!(None, parse_quantity("10Xi"));
    }

    #[test]
    fn api_server_pod() {
        let mut cfg = api_server_config();
        cfg.pod_security_policy_enabled = true;
        cfg.extra_args.insert("enable-admission-plugins".into(), "AlwaysPullImages".into());
        cfg.environment_variables.insert("PROXY".into(), "$user".into());
        let pod = api_server(&cfg, None, &Versions::default()).unwrap();

        let command = command(&pod);
        assert_eq!("/usr/local/bin/kube-apiserver", command[0]);
        assert!(command.contains(&"--enable-admission-plugins=NodeRestriction,PodSecurityPolicy,AlwaysPullImages".to_string()));
        assert!(command.contains(&"--authorization-mode=Node,RBAC".to_string()));
        assert!(command.contains(&"--advertise-address=$(POD_IP)".to_string()));
        assert!(command.contains(&"--etcd-servers=https://localhost:2379".to_string()));
        let mut sorted = command[1..].to_vec();
        sorted.sort();
        assert_eq!(sorted, command[1..].to_vec());

        let env = env(&pod);
        assert_eq!("POD_IP", env[0].name);
        assert_eq!(Some("$$user".to_string()), env[1].value);
        assert_eq!(2, env.len());

        let spec = pod.spec.unwrap();
        assert_eq!(Some(true), spec.host_network);
        assert_eq!(Some(2_000_000_000), spec.priority);
        assert_eq!(3, spec.volumes.unwrap().len());
        let labels = pod.metadata.labels.unwrap();
        assert_eq!(Some(&"1.31.1".to_string()), labels.get("app.kubernetes.io/version"));
        let requests = spec.containers[0].resources.as_ref().unwrap().requests.clone().unwrap();
        assert_eq!(Quantity("512Mi".into()), requests["memory"]);
    }

    #[test]
    fn denied_api_server_args_fail() {
        let mut cfg = api_server_config();
        cfg.extra_args.insert("etcd-servers".into(), "https://elsewhere:2379".into());
        let err = api_server(&cfg, None, &Versions::default()).unwrap_err();
        assert_eq!(r#"extra arg "etcd-servers" is not allowed"#, err.to_string());
    }

    #[test]
    fn authorization_config_replaces_the_mode() {
        let authorization = AuthorizationConfig::default();
        let pod = api_server(&api_server_config(), Some(&authorization), &Versions::default()).unwrap();
        let args = command(&pod);
        assert!(args.contains(&format!(
            "--authorization-config={}/authorization-config.yaml",
            constants::KUBE_APISERVER_CONFIG_DIR
        )));
        assert!(!args.iter().any(|a| a.starts_with("--authorization-mode")));

        let mut old = api_server_config();
        old.image = "registry.k8s.io/kube-apiserver:v1.29.0".into();
        let pod = api_server(&old, Some(&authorization), &Versions::default()).unwrap();
        assert!(command(&pod).contains(&"--authorization-mode=Node,RBAC".to_string()));
    }

    #[test]
    fn memory_limit_sets_gomemlimit() {
        let mut cfg = api_server_config();
        cfg.resources.limits.insert("memory".into(), "1Gi".into());
        let pod = api_server(&cfg, None, &Versions::default()).unwrap();
        let env = env(&pod);
        let last = env.last().unwrap();
        assert_eq!("GOMEMLIMIT", last.name);
        assert_eq!(Some("1020054732".to_string()), last.value);
    }

    #[test]
    fn bad_quantities_fail() {
        let mut cfg = api_server_config();
        cfg.resources.requests.insert("cpu".into(), "fast".into());
        let err = api_server(&cfg, None, &Versions::default()).unwrap_err();
        assert_eq!(r#"error parsing CPU request: "fast" is not a quantity"#, err.to_string());
    }

    #[test]
    fn disabled_components_have_no_pod() {
        assert!(controller_manager(&ControllerManagerConfig::default(), &Versions::default())
            .unwrap()
            .is_none());
        assert!(scheduler(&SchedulerConfig::default(), &Versions::default()).unwrap().is_none());
    }

    #[test]
    fn controller_manager_pod() {
        let cfg = ControllerManagerConfig {
            enabled: true,
            image: "registry.k8s.io/kube-controller-manager:v1.31.1".into(),
            pod_cidrs: vec!["10.244.0.0/16".into()],
            service_cidrs: vec!["10.96.0.0/12".into()],
            extra_args: vec![("controllers".to_string(), "bootstrapsigner".to_string())]
                .into_iter()
                .collect(),
            ..ControllerManagerConfig::default()
        };
        let pod = controller_manager(&cfg, &Versions::default()).unwrap().unwrap();
        let command = command(&pod);
        assert_eq!("--use-service-account-credentials", command[1]);
        assert!(command.contains(&"--controllers=*,tokencleaner,bootstrapsigner".to_string()));
        let container = &pod.spec.as_ref().unwrap().containers[0];
        let startup = container.startup_probe.as_ref().unwrap();
        assert_eq!(Some(12), startup.failure_threshold);
        assert_eq!(
            IntOrString::Int(10257),
            startup.http_get.as_ref().unwrap().port
        );
    }

    #[rstest]
    #[case("registry.k8s.io/kube-scheduler:v1.31.1", "/healthz", "/healthz")]
    #[case("registry.k8s.io/kube-scheduler:v1.32.0", "/livez", "/readyz")]
    fn scheduler_probes_follow_the_version(#[case] image: &str, #[case] liveness: &str, #[case] readiness: &str) {
        let cfg = SchedulerConfig {
            enabled: true,
            image: image.into(),
            ..SchedulerConfig::default()
        };
        let pod = scheduler(&cfg, &Versions::default()).unwrap().unwrap();
        let container = &pod.spec.as_ref().unwrap().containers[0];
        let path = |p: &Option<Probe>| p.as_ref().unwrap().http_get.as_ref().unwrap().path.clone().unwrap();
        assert_eq!(liveness, path(&container.liveness_probe));
        assert_eq!(readiness, path(&container.readiness_probe));
    }
}
