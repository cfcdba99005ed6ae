use rcgen::{BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa};

pub const CONTROL_PLANE: &str = r#"version: v1alpha1
machine:
  type: controlplane
  token: 4rmdzq.i3xwg1nba3zssxmy
  network:
    hostname: cp-1
  registries:
    mirrors:
      docker.io:
        endpoints:
          - https://mirror.example.com
cluster:
  clusterName: demo
  controlPlane:
    endpoint: https://10.5.0.2:6443
  network:
    dnsDomain: cluster.local
    podSubnets:
      - 10.244.0.0/16
    serviceSubnets:
      - 10.96.0.0/12
  token: abcdef.0123456789abcdef
  secretboxEncryptionSecret: 4sEbCqQo3hyd2nrQjvOhHDyNTIRmhPO8lZQpfEXk1Pg=
  inlineManifests:
    - name: namespace
      contents: |
        apiVersion: v1
        kind: Namespace
        metadata:
          name: ci
"#;

pub const WORKER: &str = r#"version: v1alpha1
machine:
  type: worker
  token: 4rmdzq.i3xwg1nba3zssxmy
  network:
    hostname: worker-1
cluster:
  clusterName: demo
  controlPlane:
    endpoint: https://10.5.0.2:6443
"#;

/// A self-signed CA as PEM certificate and PKCS#8 key.
pub fn ca(common_name: &str) -> (String, String) {
    let mut params = CertificateParams::default();
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, common_name);
    params.distinguished_name = name;
    let cert = Certificate::from_params(params).unwrap();
    (cert.serialize_pem().unwrap(), cert.serialize_private_key_pem())
}

/// `source` with a cluster CA and a machine CA spliced in.
pub fn with_secrets(source: &str) -> String {
    let container = machinery::Container::from_bytes(source.as_bytes()).unwrap();
    let (cluster_crt, cluster_key) = ca("kubernetes");
    let (os_crt, os_key) = ca("talos");
    let patched = container
        .patch_v1alpha1(|config| {
            config.cluster.get_or_insert_with(Default::default).ca =
                Some(machinery::config::v1alpha1::PemCertificateAndKey {
                    crt: cluster_crt.as_str().into(),
                    key: cluster_key.as_str().into(),
                });
            config.machine.get_or_insert_with(Default::default).ca =
                Some(machinery::config::v1alpha1::PemCertificateAndKey {
                    crt: os_crt.as_str().into(),
                    key: os_key.as_str().into(),
                });
            Ok(())
        })
        .unwrap();
    String::from_utf8(patched.bytes().unwrap()).unwrap()
}
