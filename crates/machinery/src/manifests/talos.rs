//! In-cluster access to the machine API.

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde_json::{json, Value};

use super::meta;
use crate::constants;

/// Service fronting the machine API of the control plane nodes. Its
/// endpoints are managed outside of the manifests.
pub(super) fn api_service() -> Service {
    let port = i32::from(constants::APID_PORT);
    Service {
        metadata: meta(
            constants::TALOS_API_SERVICE_NAME,
            Some(constants::TALOS_API_SERVICE_NAMESPACE),
            &[],
        ),
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                name: Some("apid".to_string()),
                port,
                protocol: Some("TCP".to_string()),
                target_port: Some(IntOrString::Int(port)),
                ..ServicePort::default()
            }]),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    }
}

/// Definition of the namespaced service account resource workloads use to
/// request machine API credentials.
pub(super) fn service_account_crd() -> Value {
    let group = constants::SERVICE_ACCOUNT_RESOURCE_GROUP;
    let plural = constants::SERVICE_ACCOUNT_RESOURCE_PLURAL;

    json!({
        "apiVersion": "apiextensions.k8s.io/v1",
        "kind": "CustomResourceDefinition",
        "metadata": {
            "name": format!("{}.{}", plural, group),
        },
        "spec": {
            "group": group,
            "names": {
                "kind": constants::SERVICE_ACCOUNT_RESOURCE_KIND,
                "listKind": format!("{}List", constants::SERVICE_ACCOUNT_RESOURCE_KIND),
                "plural": plural,
                "singular": constants::SERVICE_ACCOUNT_RESOURCE_SINGULAR,
                "shortNames": [constants::SERVICE_ACCOUNT_RESOURCE_SHORT_NAME],
            },
            "scope": "Namespaced",
            "versions": [{
                "name": constants::SERVICE_ACCOUNT_RESOURCE_VERSION,
                "served": true,
                "storage": true,
                "subresources": {"status": {}},
                "schema": {
                    "openAPIV3Schema": {
                        "type": "object",
                        "properties": {
                            "spec": {
                                "type": "object",
                                "properties": {
                                    "roles": {
                                        "type": "array",
                                        "items": {"type": "string"},
                                    },
                                },
                            },
                            "status": {
                                "type": "object",
                                "properties": {
                                    "failureReason": {"type": "string"},
                                },
                            },
                        },
                    },
                },
            }],
        },
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn api_service_exposes_apid() {
        let service = api_service();
        assert_eq!(Some("talos"), service.metadata.name.as_deref());
        assert_eq!(Some("default"), service.metadata.namespace.as_deref());
        let port = &service.spec.unwrap().ports.unwrap()[0];
        assert_eq!(50000, port.port);
        assert_eq!(Some(IntOrString::Int(50000)), port.target_port);
    }

    #[test]
    fn crd_names_the_resource() {
        let crd = service_account_crd();
        assert_eq!("serviceaccounts.talos.dev", crd["metadata"]["name"]);
        assert_eq!("ServiceAccount", crd["spec"]["names"]["kind"]);
        assert_eq!("tsa", crd["spec"]["names"]["shortNames"][0]);
        assert_eq!("v1alpha1", crd["spec"]["versions"][0]["name"]);
    }
}
