//! Role bindings for node bootstrapping and the legacy pod security policy.

use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use serde_json::json;

use super::{
    cluster_role, cluster_role_binding, encode, group, meta, rule, service_account_subject, string_map, Error,
    KUBE_SYSTEM,
};

/// Lets bootstrap tokens and nodes request certificates.
pub(super) fn csr_node_bootstrap() -> ClusterRoleBinding {
    cluster_role_binding(
        meta("system-bootstrap-node-bootstrapper", None, &[]),
        "system:node-bootstrapper",
        vec![group("system:bootstrappers:nodes"), group("system:nodes")],
    )
}

/// Auto-approves client certificate requests of bootstrap tokens.
pub(super) fn csr_approver() -> ClusterRoleBinding {
    cluster_role_binding(
        meta("system-bootstrap-approve-node-client-csr", None, &[]),
        "system:certificates.k8s.io:certificatesigningrequests:nodeclient",
        vec![group("system:bootstrappers:nodes")],
    )
}

/// Auto-approves client certificate renewals of nodes.
pub(super) fn csr_renewal() -> ClusterRoleBinding {
    cluster_role_binding(
        meta("system-bootstrap-node-renewal", None, &[]),
        "system:certificates.k8s.io:certificatesigningrequests:selfnodeclient",
        vec![group("system:nodes")],
    )
}

pub(super) fn kube_system_default_sa() -> ClusterRoleBinding {
    cluster_role_binding(
        meta("system:default-sa", None, &[]),
        "cluster-admin",
        vec![service_account_subject("default", KUBE_SYSTEM)],
    )
}

/// Read access for nodes to the objects the machine API looks up: nodes
/// and Talos service accounts.
pub(super) fn talos_nodes() -> Result<Vec<String>, Error> {
    let role = cluster_role(
        meta("system:talos-nodes", None, &[]),
        vec![
            rule("", &["nodes"], &["get", "list", "watch"]),
            rule("talos.dev", &["serviceaccounts"], &["get", "list", "watch"]),
        ],
    );
    let binding = cluster_role_binding(
        meta("system:talos-nodes", None, &[]),
        "system:talos-nodes",
        vec![group("system:nodes")],
    );
    Ok(vec![encode(&role)?, encode(&binding)?])
}

/// Privileged policy for clusters still running the PodSecurityPolicy
/// admission plugin.
pub(super) fn pod_security_policy() -> Result<Vec<String>, Error> {
    let mut use_policy = rule("policy", &["podsecuritypolicies"], &["use"]);
    use_policy.resource_names = Some(vec!["privileged".to_string()]);
    let role = cluster_role(meta("psp:privileged", None, &[]), vec![use_policy]);

    let binding = cluster_role_binding(
        meta("psp:privileged", None, &[]),
        "psp:privileged",
        vec![group("system:serviceaccounts"), group("system:authenticated")],
    );

    let policy = json!({
        "apiVersion": "policy/v1beta1",
        "kind": "PodSecurityPolicy",
        "metadata": {
            "name": "privileged",
            "annotations": string_map(&[("seccomp.security.alpha.kubernetes.io/allowedProfileNames", "*")]),
        },
        "spec": {
            "fsGroup": {"rule": "RunAsAny"},
            "privileged": true,
            "runAsUser": {"rule": "RunAsAny"},
            "seLinux": {"rule": "RunAsAny"},
            "supplementalGroups": {"rule": "RunAsAny"},
            "volumes": ["*"],
            "allowedCapabilities": ["*"],
            "hostPID": true,
            "hostIPC": true,
            "hostNetwork": true,
            "hostPorts": [{"min": 1, "max": 65536}],
        },
    });

    Ok(vec![encode(&role)?, encode(&binding)?, encode(&policy)?])
}
