//! Well-known names, paths and defaults shared by the config model and the
//! controllers.

use std::time::Duration;

/// Default target Kubernetes version.
pub const DEFAULT_KUBERNETES_VERSION: &str = "1.31.1";

/// Kubelet image repository.
pub const KUBELET_IMAGE: &str = "ghcr.io/siderolabs/kubelet";
/// kube-proxy image repository.
pub const KUBE_PROXY_IMAGE: &str = "registry.k8s.io/kube-proxy";
/// kube-apiserver image repository.
pub const KUBE_APISERVER_IMAGE: &str = "registry.k8s.io/kube-apiserver";
/// kube-controller-manager image repository.
pub const KUBE_CONTROLLER_MANAGER_IMAGE: &str = "registry.k8s.io/kube-controller-manager";
/// kube-scheduler image repository.
pub const KUBE_SCHEDULER_IMAGE: &str = "registry.k8s.io/kube-scheduler";
/// CoreDNS image repository.
pub const COREDNS_IMAGE: &str = "registry.k8s.io/coredns/coredns";
/// Default CoreDNS version.
pub const DEFAULT_COREDNS_VERSION: &str = "v1.11.3";
/// Flannel image repository.
pub const FLANNEL_IMAGE: &str = "ghcr.io/siderolabs/flannel";
/// Default Flannel version.
pub const FLANNEL_VERSION: &str = "v0.25.6";
/// etcd image repository.
pub const ETCD_IMAGE: &str = "gcr.io/etcd-development/etcd";
/// Default etcd version.
pub const DEFAULT_ETCD_VERSION: &str = "v3.5.16";

/// Default cluster DNS domain.
pub const DEFAULT_DNS_DOMAIN: &str = "cluster.local";
/// Default IPv4 pod network.
pub const DEFAULT_IPV4_POD_NET: &str = "10.244.0.0/16";
/// Default IPv4 service network.
pub const DEFAULT_IPV4_SERVICE_NET: &str = "10.96.0.0/12";
/// Default IPv6 pod network.
pub const DEFAULT_IPV6_POD_NET: &str = "fc00:db8:10::/56";
/// Default IPv6 service network.
pub const DEFAULT_IPV6_SERVICE_NET: &str = "fc00:db8:20::/112";

/// Default API server port.
pub const DEFAULT_CONTROL_PLANE_PORT: u16 = 6443;
/// Default KubePrism load balancer port.
pub const DEFAULT_KUBE_PRISM_PORT: u16 = 7445;
/// Port of the machine API.
pub const APID_PORT: u16 = 50000;
/// Kubelet API port.
pub const KUBELET_PORT: u16 = 10250;

/// CNI name for the built-in Flannel deployment.
pub const FLANNEL_CNI: &str = "flannel";
/// CNI name for a user supplied CNI.
pub const CUSTOM_CNI: &str = "custom";
/// CNI name for no CNI at all.
pub const NO_CNI: &str = "none";

/// Kubernetes configuration directory.
pub const KUBERNETES_CONFIG_DIR: &str = "/etc/kubernetes";
/// Kubelet configuration file.
pub const KUBELET_CONFIG_PATH: &str = "/etc/kubernetes/kubelet.yaml";
/// Kubelet bootstrap kubeconfig.
pub const KUBELET_BOOTSTRAP_KUBECONFIG: &str = "/etc/kubernetes/bootstrap-kubeconfig";
/// Kubelet kubeconfig.
pub const KUBELET_KUBECONFIG: &str = "/etc/kubernetes/kubeconfig-kubelet";
/// Kubelet PKI directory.
pub const KUBELET_PKI_DIR: &str = "/var/lib/kubelet/pki";
/// Static pod manifests directory.
pub const MANIFESTS_DIR: &str = "/etc/kubernetes/manifests";
/// Kubernetes CA certificate as seen by the kubelet.
pub const KUBERNETES_CA_PATH: &str = "/etc/kubernetes/pki/ca.crt";
/// CRI socket.
pub const CRI_CONTAINERD_ADDRESS: &str = "/run/containerd/containerd.sock";
/// Directory with containerd configuration parts.
pub const CRI_CONFD_PATH: &str = "/etc/cri/conf.d";
/// Registry hosts tree, relative to the CRI configuration root.
pub const CRI_REGISTRY_HOSTS_PATH: &str = "/etc/cri/conf.d/hosts";
/// Registry part of the containerd configuration.
pub const CRI_REGISTRY_CONFIG_PART: &str = "01-registries.part";

/// Directory with control plane secrets.
pub const KUBERNETES_STATIC_SECRETS_DIR: &str = "/system/secrets/kubernetes";
/// Directory with control plane configs.
pub const KUBERNETES_STATIC_CONFIG_DIR: &str = "/system/config/kubernetes";
/// kube-apiserver secrets.
pub const KUBE_APISERVER_SECRETS_DIR: &str = "/system/secrets/kubernetes/kube-apiserver";
/// kube-apiserver configs.
pub const KUBE_APISERVER_CONFIG_DIR: &str = "/system/config/kubernetes/kube-apiserver";
/// kube-controller-manager secrets.
pub const KUBE_CONTROLLER_MANAGER_SECRETS_DIR: &str = "/system/secrets/kubernetes/kube-controller-manager";
/// kube-scheduler secrets.
pub const KUBE_SCHEDULER_SECRETS_DIR: &str = "/system/secrets/kubernetes/kube-scheduler";
/// kube-scheduler configs.
pub const KUBE_SCHEDULER_CONFIG_DIR: &str = "/system/config/kubernetes/kube-scheduler";
/// Audit log directory of the API server.
pub const KUBERNETES_AUDIT_LOG_DIR: &str = "/var/log/audit/kube";
/// UID the control plane components run as.
pub const KUBERNETES_RUN_USER: i64 = 65534;

/// Admin certificate common name.
pub const ADMIN_CERT_COMMON_NAME: &str = "admin";
/// Admin certificate organization.
pub const ADMIN_CERT_ORGANIZATION: &str = "system:masters";
/// Lifetime of the admin client certificate.
pub const ADMIN_CERT_DEFAULT_LIFETIME: Duration = Duration::from_secs(365 * 24 * 60 * 60);
/// Lifetime of the machine API server certificate.
pub const API_CERT_DEFAULT_LIFETIME: Duration = Duration::from_secs(365 * 24 * 60 * 60);
/// Common name of the machine API client certificate.
pub const API_CLIENT_COMMON_NAME: &str = "os:admin";
/// Clock skew tolerated by generated certificates.
pub const CERTIFICATE_SKEW: Duration = Duration::from_secs(10);

/// Name of the Talos API service exposed into the cluster.
pub const TALOS_API_SERVICE_NAME: &str = "talos";
/// Namespace of the Talos API service.
pub const TALOS_API_SERVICE_NAMESPACE: &str = "default";
/// API group of the Talos service account resource.
pub const SERVICE_ACCOUNT_RESOURCE_GROUP: &str = "talos.dev";
/// API version of the Talos service account resource.
pub const SERVICE_ACCOUNT_RESOURCE_VERSION: &str = "v1alpha1";
/// Kind of the Talos service account resource.
pub const SERVICE_ACCOUNT_RESOURCE_KIND: &str = "ServiceAccount";
/// Singular of the Talos service account resource.
pub const SERVICE_ACCOUNT_RESOURCE_SINGULAR: &str = "serviceaccount";
/// Plural of the Talos service account resource.
pub const SERVICE_ACCOUNT_RESOURCE_PLURAL: &str = "serviceaccounts";
/// Short name of the Talos service account resource.
pub const SERVICE_ACCOUNT_RESOURCE_SHORT_NAME: &str = "tsa";

/// In-cluster service account token.
pub const SERVICE_ACCOUNT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
/// In-cluster service account CA.
pub const SERVICE_ACCOUNT_CA_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Placeholder that redaction writes over secrets.
pub const REDACTED: &str = "******";

/// KubeletConfiguration fields the machine config may not override.
pub const KUBELET_LOCKED_FIELDS: &[&str] = &[
    "authentication",
    "authorization",
    "cgroupRoot",
    "kubeletCgroups",
    "port",
    "protectKernelDefaults",
    "rotateCertificates",
    "staticPodPath",
    "staticPodURL",
    "systemCgroups",
];

/// Cgroup of system services.
pub const CGROUP_SYSTEM: &str = "/system";
/// Cgroup of the kubelet.
pub const CGROUP_KUBELET: &str = "/podruntime/kubelet";
/// OOM score adjustment of the kubelet.
pub const KUBELET_OOM_SCORE_ADJ: i64 = -450;
/// CPU reserved for the system.
pub const KUBELET_SYSTEM_RESERVED_CPU: &str = "50m";
/// Memory reserved for the system.
pub const KUBELET_SYSTEM_RESERVED_MEMORY: &str = "192Mi";
/// PIDs reserved for the system.
pub const KUBELET_SYSTEM_RESERVED_PID: &str = "100";
/// Ephemeral storage reserved for the system.
pub const KUBELET_SYSTEM_RESERVED_EPHEMERAL_STORAGE: &str = "256Mi";
/// Grace period of a node shutdown.
pub const KUBELET_SHUTDOWN_GRACE_PERIOD: &str = "30s";
/// Part of the shutdown grace period reserved for critical pods.
pub const KUBELET_SHUTDOWN_GRACE_PERIOD_CRITICAL_PODS: &str = "10s";
/// Kubelet state directory, always mounted into the kubelet container.
pub const KUBELET_STATE_DIR: &str = "/var/lib/kubelet";
/// Seccomp profiles made available to the kubelet.
pub const SECCOMP_PROFILES_DIR: &str = "/var/lib/kubelet/seccomp/profiles";

/// kube-controller-manager and kube-scheduler run as this group.
pub const KUBERNETES_RUN_GROUP: i64 = 65534;
/// Priority value of system critical pods.
pub const SYSTEM_CRITICAL_PRIORITY: i32 = 2_000_000_000;
/// Part of the memory limit handed to the Go runtime as `GOMEMLIMIT`.
pub const GO_GC_MEM_LIMIT_PERCENTAGE: u64 = 95;
/// Local etcd client endpoint.
pub const ETCD_LOCAL_ENDPOINT: &str = "https://localhost:2379";
