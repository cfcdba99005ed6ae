//! Field descriptions emitted as YAML comments when encoding with comments
//! enabled. Keys are dotted paths; list items are not descended into.

use std::collections::HashMap;

use lazy_static::lazy_static;

lazy_static! {
    static ref DOCS: HashMap<&'static str, &'static str> = {
        let mut docs = HashMap::new();
        docs.insert("version", "Indicates the schema used to decode the contents.");
        docs.insert("debug", "Enable verbose logging to the console.");
        docs.insert("persist", "Indicates whether to pull the machine config upon every boot.");
        docs.insert("machine", "Provides machine specific configuration options.");
        docs.insert("machine.type", "Defines the role of the machine within the cluster.");
        docs.insert("machine.token", "The `token` is used by a machine to join the PKI of the cluster.");
        docs.insert("machine.ca", "The root certificate authority of the PKI.");
        docs.insert("machine.certSANs", "Extra certificate subject alternative names for the machine's certificate.");
        docs.insert("machine.controlPlane", "Provides machine specific control plane configuration options.");
        docs.insert("machine.kubelet", "Used to provide additional options to the kubelet.");
        docs.insert("machine.kubelet.image", "The `image` field is an optional reference to an alternative kubelet image.");
        docs.insert("machine.kubelet.clusterDNS", "The `ClusterDNS` field is an optional reference to an alternative kubelet clusterDNS ip list.");
        docs.insert("machine.kubelet.extraArgs", "The `extraArgs` field is used to provide additional flags to the kubelet.");
        docs.insert("machine.kubelet.extraMounts", "The `extraMounts` field is used to add additional mounts to the kubelet container.");
        docs.insert("machine.kubelet.extraConfig", "The `extraConfig` field is used to provide kubelet configuration overrides.");
        docs.insert("machine.kubelet.nodeIP", "The `nodeIP` field is used to configure `--node-ip` flag for the kubelet.");
        docs.insert("machine.network", "Provides machine specific network configuration options.");
        docs.insert("machine.network.hostname", "Used to statically set the hostname for the machine.");
        docs.insert("machine.network.interfaces", "`interfaces` is used to define the network interface configuration.");
        docs.insert("machine.network.nameservers", "Used to statically set the nameservers for the machine.");
        docs.insert("machine.disks", "Used to partition, format and mount additional disks.");
        docs.insert("machine.install", "Used to provide instructions for installations.");
        docs.insert("machine.install.disk", "The disk used for installations.");
        docs.insert("machine.install.diskSelector", "Look up disk using disk attributes like model, size, serial and others.");
        docs.insert("machine.install.image", "Allows for supplying the image used to perform the installation.");
        docs.insert("machine.install.wipe", "Indicates if the installation disk should be wiped at installation time.");
        docs.insert("machine.files", "Allows the addition of user specified files.");
        docs.insert("machine.time", "Used to configure the machine's time settings.");
        docs.insert("machine.sysctls", "Used to configure the machine's sysctls.");
        docs.insert("machine.registries", "Used to configure the machine's container image registry mirrors.");
        docs.insert("machine.registries.mirrors", "Specifies mirror configuration for each registry host namespace.");
        docs.insert("machine.registries.config", "Specifies TLS & auth configuration for HTTPS image registries.");
        docs.insert("machine.systemDiskEncryption", "Machine system disk encryption configuration.");
        docs.insert("machine.features", "Features describe individual Talos features that can be switched on or off.");
        docs.insert("machine.features.kubePrism", "KubePrism - local proxy/load balancer on defined port that will distribute requests to all API servers in the cluster.");
        docs.insert("machine.nodeLabels", "Configures the node labels for the machine.");
        docs.insert("cluster", "Provides cluster specific configuration options.");
        docs.insert("cluster.id", "Globally unique identifier for this cluster (base64 encoded random 32 bytes).");
        docs.insert("cluster.secret", "Shared secret of cluster (base64 encoded random 32 bytes).");
        docs.insert("cluster.controlPlane", "Provides control plane specific configuration options.");
        docs.insert("cluster.controlPlane.endpoint", "Endpoint is the canonical controlplane endpoint, which can be an IP address or a DNS hostname.");
        docs.insert("cluster.clusterName", "Configures the cluster's name.");
        docs.insert("cluster.network", "Provides cluster specific network configuration options.");
        docs.insert("cluster.network.dnsDomain", "The domain used by Kubernetes DNS.");
        docs.insert("cluster.network.podSubnets", "The pod subnet CIDR.");
        docs.insert("cluster.network.serviceSubnets", "The service subnet CIDR.");
        docs.insert("cluster.network.cni", "The CNI used.");
        docs.insert("cluster.token", "The [bootstrap token](https://kubernetes.io/docs/reference/access-authn-authz/bootstrap-tokens/) used to join the cluster.");
        docs.insert("cluster.secretboxEncryptionSecret", "A key used for the [encryption of secret data at rest](https://kubernetes.io/docs/tasks/administer-cluster/encrypt-data/).");
        docs.insert("cluster.aescbcEncryptionSecret", "A key used for the [encryption of secret data at rest](https://kubernetes.io/docs/tasks/administer-cluster/encrypt-data/).");
        docs.insert("cluster.ca", "The base64 encoded root certificate authority used by Kubernetes.");
        docs.insert("cluster.aggregatorCA", "The base64 encoded aggregator certificate authority used by Kubernetes for front-proxy certificate generation.");
        docs.insert("cluster.serviceAccount", "The base64 encoded private key for service account token generation.");
        docs.insert("cluster.apiServer", "API server specific configuration options.");
        docs.insert("cluster.controllerManager", "Controller manager server specific configuration options.");
        docs.insert("cluster.proxy", "Kube-proxy server-specific configuration options");
        docs.insert("cluster.scheduler", "Scheduler server specific configuration options.");
        docs.insert("cluster.discovery", "Configures cluster member discovery.");
        docs.insert("cluster.etcd", "Etcd specific configuration options.");
        docs.insert("cluster.coreDNS", "Core DNS specific configuration options.");
        docs.insert("cluster.externalCloudProvider", "External cloud provider configuration.");
        docs.insert("cluster.extraManifests", "A list of urls that point to additional manifests.");
        docs.insert("cluster.inlineManifests", "A list of inline Kubernetes manifests.");
        docs.insert("cluster.adminKubeconfig", "Settings for admin kubeconfig generation.");
        docs.insert("cluster.allowSchedulingOnControlPlanes", "Allows running workload on control-plane nodes.");
        docs
    };
}

/// Description of the field at `path`, if documented.
pub fn lookup(path: &str) -> Option<&'static str> {
    DOCS.get(path).copied()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn documented_paths() {
        assert!(lookup("machine.install.disk").is_some());
        assert_eq!(None, lookup("machine.install.bogus"));
    }
}
