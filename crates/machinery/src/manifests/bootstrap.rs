use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use serde_json::json;

use super::{meta, string_map, Error, KUBE_SYSTEM};
use crate::constants;
use crate::encoding::to_yaml;
use crate::resources::secrets::KubernetesRoot;

/// Name of the ConfigMap holding the in-cluster kubeconfig.
pub(super) const KUBECONFIG_IN_CLUSTER: &str = "kubeconfig-in-cluster";

/// Bootstrap token the kubelets authenticate with before they have a
/// client certificate.
pub(super) fn token_secret(secrets: &KubernetesRoot) -> Secret {
    Secret {
        metadata: meta(
            &format!("bootstrap-token-{}", secrets.bootstrap_token_id),
            Some(KUBE_SYSTEM),
            &[],
        ),
        type_: Some("bootstrap.kubernetes.io/token".to_string()),
        string_data: Some(string_map(&[
            ("token-id", secrets.bootstrap_token_id.as_str()),
            ("token-secret", secrets.bootstrap_token_secret.as_str()),
            ("usage-bootstrap-authentication", "true"),
            ("auth-extra-groups", "system:bootstrappers:nodes"),
        ])),
        ..Secret::default()
    }
}

/// Kubeconfig for pods that run before the cluster network works, so
/// they can't rely on the `KUBERNETES_SERVICE_*` variables.
pub(super) fn kubeconfig_in_cluster(server: &str) -> Result<ConfigMap, Error> {
    let kubeconfig = json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{
            "name": "local",
            "cluster": {
                "server": server,
                "certificate-authority": constants::SERVICE_ACCOUNT_CA_PATH,
            },
        }],
        "users": [{
            "name": "service-account",
            "user": {
                "tokenFile": constants::SERVICE_ACCOUNT_TOKEN_PATH,
            },
        }],
        "contexts": [{
            "name": "local",
            "context": {
                "cluster": "local",
                "user": "service-account",
            },
        }],
        "current-context": "local",
    });

    let kubeconfig = to_yaml(&kubeconfig)?;
    Ok(ConfigMap {
        metadata: meta(KUBECONFIG_IN_CLUSTER, Some(KUBE_SYSTEM), &[]),
        data: Some(string_map(&[("kubeconfig", kubeconfig.as_str())])),
        ..ConfigMap::default()
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn token_secret_is_named_after_the_token() {
        let secrets = KubernetesRoot {
            bootstrap_token_id: "abcdef".to_string(),
            bootstrap_token_secret: "0123456789abcdef".to_string(),
            ..KubernetesRoot::default()
        };
        let secret = token_secret(&secrets);
        assert_eq!(Some("bootstrap-token-abcdef"), secret.metadata.name.as_deref());
        assert_eq!(Some("bootstrap.kubernetes.io/token"), secret.type_.as_deref());
        let data = secret.string_data.unwrap();
        assert_eq!("abcdef", data["token-id"]);
        assert_eq!("0123456789abcdef", data["token-secret"]);
        assert_eq!("system:bootstrappers:nodes", data["auth-extra-groups"]);
    }

    #[test]
    fn in_cluster_kubeconfig_uses_the_service_account() {
        let config_map = kubeconfig_in_cluster("https://localhost:7445").unwrap();
        let data = config_map.data.unwrap();
        let kubeconfig: kube::config::Kubeconfig = serde_yaml::from_str(&data["kubeconfig"]).unwrap();

        assert_eq!(Some("local".to_string()), kubeconfig.current_context);
        assert_eq!("https://localhost:7445", kubeconfig.clusters[0].cluster.server);
        assert_eq!(
            Some(constants::SERVICE_ACCOUNT_CA_PATH.to_string()),
            kubeconfig.clusters[0].cluster.certificate_authority
        );
        assert_eq!(
            Some(constants::SERVICE_ACCOUNT_TOKEN_PATH.to_string()),
            kubeconfig.auth_infos[0].auth_info.token_file
        );
    }
}
