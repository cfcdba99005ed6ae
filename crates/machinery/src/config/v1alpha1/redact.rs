//! Secret redaction.

use super::*;

impl Config {
    /// Returns a copy of the document with every secret replaced by
    /// `placeholder`. Empty optional secrets stay empty.
    pub fn redact_secrets(&self, placeholder: &str) -> Config {
        let mut redacted = self.clone();

        if let Some(machine) = redacted.machine.as_mut() {
            machine.redact(placeholder);
        }
        if let Some(cluster) = redacted.cluster.as_mut() {
            cluster.redact(placeholder);
        }

        redacted
    }
}

fn replace(value: &mut String, placeholder: &str) {
    if !value.is_empty() {
        *value = placeholder.to_string();
    }
}

fn replace_bytes(value: &mut Base64Bytes, placeholder: &str) {
    if !value.is_empty() {
        *value = Base64Bytes::from(placeholder);
    }
}

fn redact_key(pair: &mut Option<PemCertificateAndKey>, placeholder: &str) {
    if let Some(pair) = pair.as_mut() {
        replace_bytes(&mut pair.key, placeholder);
    }
}

/// Replaces the value of a `jointoken` query parameter in `raw`.
///
/// Returns `raw` unchanged when it is not a URL or carries no token.
pub fn redact_url_token(raw: &str, placeholder: &str) -> String {
    let mut parsed = match url::Url::parse(raw) {
        Ok(parsed) => parsed,
        Err(_) => return raw.to_string(),
    };
    if !parsed.query_pairs().any(|(k, _)| k == "jointoken") {
        return raw.to_string();
    }
    let pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| {
            let v = if k == "jointoken" { placeholder.to_string() } else { v.into_owned() };
            (k.into_owned(), v)
        })
        .collect();
    parsed.query_pairs_mut().clear().extend_pairs(pairs);
    parsed.to_string()
}

impl MachineConfig {
    fn redact(&mut self, placeholder: &str) {
        replace(&mut self.token, placeholder);
        redact_key(&mut self.ca, placeholder);

        if let Some(registries) = self.registries.as_mut() {
            for registry in registries.config.values_mut() {
                if let Some(auth) = registry.auth.as_mut() {
                    replace(&mut auth.password, placeholder);
                    replace(&mut auth.auth, placeholder);
                    replace(&mut auth.identity_token, placeholder);
                }
                if let Some(tls) = registry.tls.as_mut() {
                    redact_key(&mut tls.client_identity, placeholder);
                }
            }
        }

        if let Some(network) = self.network.as_mut() {
            for device in network.interfaces.iter_mut() {
                if let Some(wireguard) = device.wireguard.as_mut() {
                    replace(&mut wireguard.private_key, placeholder);
                }
                let vips = device
                    .vip
                    .iter_mut()
                    .chain(device.vlans.iter_mut().filter_map(|v| v.vip.as_mut()));
                for vip in vips {
                    for provider in vip.equinix_metal.iter_mut().chain(vip.hcloud.iter_mut()) {
                        replace(&mut provider.api_token, placeholder);
                    }
                }
            }
        }

        if let Some(encryption) = self.system_disk_encryption.as_mut() {
            for config in encryption.state.iter_mut().chain(encryption.ephemeral.iter_mut()) {
                for key in config.keys.iter_mut() {
                    if let Some(key) = key.static_.as_mut() {
                        replace(&mut key.passphrase, placeholder);
                    }
                }
            }
        }

        if let Some(install) = self.install.as_mut() {
            for arg in install.extra_kernel_args.iter_mut() {
                if let Some((name, value)) = arg.split_once('=') {
                    if value.contains("jointoken=") {
                        *arg = format!("{}={}", name, redact_url_token(value, placeholder));
                    }
                }
            }
        }
    }
}

impl ClusterConfig {
    fn redact(&mut self, placeholder: &str) {
        if !self.token.is_empty() {
            self.token = match self.token.split_once('.') {
                Some((id, _)) => format!("{}.{}", id, placeholder),
                None => placeholder.to_string(),
            };
        }
        replace(&mut self.secret, placeholder);
        replace(&mut self.aescbc_encryption_secret, placeholder);
        replace(&mut self.secretbox_encryption_secret, placeholder);

        redact_key(&mut self.ca, placeholder);
        redact_key(&mut self.aggregator_ca, placeholder);
        if let Some(etcd) = self.etcd.as_mut() {
            redact_key(&mut etcd.ca, placeholder);
        }
        if let Some(sa) = self.service_account.as_mut() {
            replace_bytes(&mut sa.key, placeholder);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::constants::REDACTED;
    use proptest::prelude::*;

    fn pair(crt: &str, key: &str) -> Option<PemCertificateAndKey> {
        Some(PemCertificateAndKey {
            crt: crt.into(),
            key: key.into(),
        })
    }

    fn secret_config() -> Config {
        let mut registries = RegistriesConfig::default();
        registries.config.insert(
            "registry.local".into(),
            RegistryConfig {
                auth: Some(RegistryAuthConfig {
                    username: "user".into(),
                    password: "hunter2".into(),
                    ..Default::default()
                }),
                tls: None,
            },
        );

        Config {
            version: VERSION.into(),
            machine: Some(MachineConfig {
                type_: "controlplane".into(),
                token: "machine.token".into(),
                ca: pair("machine-crt", "machine-key"),
                registries: Some(registries),
                install: Some(InstallConfig {
                    extra_kernel_args: vec![
                        "siderolink.api=https://link.example.com?jointoken=s3cr3t".into(),
                        "console=ttyS0".into(),
                    ],
                    ..Default::default()
                }),
                ..Default::default()
            }),
            cluster: Some(ClusterConfig {
                token: "abcdef.0123456789abcdef".into(),
                secret: "cluster-secret".into(),
                secretbox_encryption_secret: "box".into(),
                ca: pair("cluster-crt", "cluster-key"),
                etcd: Some(EtcdConfig {
                    ca: pair("etcd-crt", "etcd-key"),
                    ..Default::default()
                }),
                service_account: Some(PemKey {
                    key: "sa-key".into(),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn secrets_are_replaced_on_a_copy() {
        let original = secret_config();
        let redacted = original.redact_secrets(REDACTED);

        assert_eq!(secret_config(), original);

        let cluster = redacted.cluster();
        assert_eq!("abcdef.******", cluster.token);
        assert_eq!(REDACTED, cluster.secret);
        assert_eq!("", cluster.aescbc_encryption_secret);
        assert_eq!(REDACTED.as_bytes(), cluster.ca.as_ref().unwrap().key.as_bytes());
        assert_eq!(b"cluster-crt", cluster.ca.as_ref().unwrap().crt.as_bytes());
        assert_eq!(REDACTED.as_bytes(), cluster.etcd.unwrap().ca.unwrap().key.as_bytes());
        assert_eq!(REDACTED.as_bytes(), cluster.service_account.unwrap().key.as_bytes());

        let machine = redacted.machine();
        assert_eq!(REDACTED, machine.token);
        assert_eq!(REDACTED.as_bytes(), machine.ca.unwrap().key.as_bytes());
        let auth = machine.registries.unwrap().config["registry.local"].auth.clone().unwrap();
        assert_eq!("user", auth.username);
        assert_eq!(REDACTED, auth.password);

        let args = machine.install.unwrap().extra_kernel_args;
        assert!(!args[0].contains("s3cr3t"));
        assert!(args[0].starts_with("siderolink.api=https://link.example.com/?jointoken="));
        assert_eq!("console=ttyS0", args[1]);
    }

    #[test]
    fn url_without_token_is_untouched() {
        assert_eq!("https://a.example.com/x", redact_url_token("https://a.example.com/x", REDACTED));
        assert_eq!("not a url", redact_url_token("not a url", REDACTED));
        assert_eq!(
            "https://10.0.0.1:8081/?jointoken=XXX&other=1",
            redact_url_token("https://10.0.0.1:8081?jointoken=abc&other=1", "XXX")
        );
    }

    #[derive(Debug)]
    struct Secrets {
        machine_token: String,
        token_secret: String,
        cluster_secret: String,
        secretbox: String,
        registry_password: String,
        join_token: String,
        keys: [String; 4],
    }

    fn secret() -> impl Strategy<Value = String> {
        "s[a-z0-9]{12,20}"
    }

    fn secrets() -> impl Strategy<Value = Secrets> {
        (
            secret(),
            "[a-z0-9]{16}",
            secret(),
            secret(),
            secret(),
            secret(),
            [secret(), secret(), secret(), secret()],
        )
            .prop_map(
                |(machine_token, token_secret, cluster_secret, secretbox, registry_password, join_token, keys)| {
                    Secrets {
                        machine_token,
                        token_secret,
                        cluster_secret,
                        secretbox,
                        registry_password,
                        join_token,
                        keys,
                    }
                },
            )
    }

    fn config_with(secrets: &Secrets) -> Config {
        let mut config = secret_config();
        let machine = config.machine.as_mut().unwrap();
        machine.token = secrets.machine_token.clone();
        machine.ca = pair("machine-crt", &secrets.keys[0]);
        machine.registries.as_mut().unwrap().config.get_mut("registry.local").unwrap().auth =
            Some(RegistryAuthConfig {
                username: "user".into(),
                password: secrets.registry_password.clone(),
                ..Default::default()
            });
        machine.install.as_mut().unwrap().extra_kernel_args[0] =
            format!("siderolink.api=https://link.example.com?jointoken={}", secrets.join_token);

        let cluster = config.cluster.as_mut().unwrap();
        cluster.token = format!("abcdef.{}", secrets.token_secret);
        cluster.secret = secrets.cluster_secret.clone();
        cluster.secretbox_encryption_secret = secrets.secretbox.clone();
        cluster.ca = pair("cluster-crt", &secrets.keys[1]);
        cluster.etcd.as_mut().unwrap().ca = pair("etcd-crt", &secrets.keys[2]);
        cluster.service_account = Some(PemKey {
            key: secrets.keys[3].as_str().into(),
        });
        config
    }

    proptest! {
        #[test]
        fn redaction_hides_every_secret(secrets in secrets(), placeholder in "[A-Z*]{1,8}") {
            let original = config_with(&secrets);
            let redacted = original.redact_secrets(&placeholder);

            prop_assert_eq!(&config_with(&secrets), &original);

            let encoded = serde_yaml::to_string(&redacted).unwrap();
            let mut plain = vec![
                &secrets.machine_token,
                &secrets.token_secret,
                &secrets.cluster_secret,
                &secrets.secretbox,
                &secrets.registry_password,
                &secrets.join_token,
            ];
            plain.extend(secrets.keys.iter());
            for value in plain {
                prop_assert!(!encoded.contains(value.as_str()), "{} leaked", value);
                prop_assert!(!encoded.contains(&base64::encode(value)), "{} leaked as base64", value);
            }

            let cluster = redacted.cluster();
            prop_assert!(cluster.token.starts_with("abcdef."));
            prop_assert_eq!(b"cluster-crt", cluster.ca.as_ref().unwrap().crt.as_bytes());
            let machine = redacted.machine();
            prop_assert_eq!("controlplane", machine.type_.as_str());
            prop_assert_eq!(
                "user",
                machine.registries.as_ref().unwrap().config["registry.local"].auth.as_ref().unwrap().username.as_str()
            );
            prop_assert_eq!("console=ttyS0", machine.install.as_ref().unwrap().extra_kernel_args[1].as_str());
        }
    }
}
