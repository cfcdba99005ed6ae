//! containerd registry configuration: the hosts tree and the registry
//! section of the CRI plugin.
//!
//! containerd looks up `<config_path>/<host>/hosts.toml` for every image
//! pull. Mirrors become `[host."<endpoint>"]` entries in the order they're
//! configured; per-host TLS material lands next to the `hosts.toml` that
//! references it.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::Path;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::config::v1alpha1::{RegistryAuthConfig, RegistryConfig};
use crate::resources::cri::RegistriesConfig;

/// Mode of every file written into the hosts tree.
pub const HOSTS_FILE_MODE: u32 = 0o600;
/// CRI plugin that owns the registry section.
pub const CRI_IMAGES_PLUGIN: &str = "io.containerd.cri.v1.images";

const HOSTS_TOML: &str = "hosts.toml";
const WILDCARD: &str = "*";

/// Failures to render or write registry configuration.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A mirror endpoint isn't a URL.
    #[error("error parsing endpoint {endpoint:?} for host {host:?}: {source}")]
    Endpoint {
        /// Registry the mirror belongs to.
        host: String,
        /// Endpoint as configured.
        endpoint: String,
        /// Parse failure.
        #[source]
        source: url::ParseError,
    },
    /// TLS settings are only allowed for concrete hosts.
    #[error("wildcard host TLS configuration is not supported")]
    WildcardTls,
    /// TOML encoding failed.
    #[error("error encoding registry configuration: {0}")]
    Encode(#[from] toml::ser::Error),
    /// Writing the tree failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Directories of the hosts tree keyed by directory name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HostsConfig {
    /// Host directories, named by [`host_directory`].
    pub directories: BTreeMap<String, HostsDirectory>,
}

/// Files of one registry host.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HostsDirectory {
    /// `hosts.toml` and the PEM files it references.
    pub files: Vec<HostsFile>,
}

/// A file of the hosts tree.
#[derive(Clone, Debug, PartialEq)]
pub struct HostsFile {
    /// File name inside the host directory.
    pub name: String,
    /// File contents.
    pub contents: Vec<u8>,
    /// Permission bits, always [`HOSTS_FILE_MODE`].
    pub mode: u32,
}

impl HostsFile {
    fn new(name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        HostsFile {
            name: name.into(),
            contents: contents.into(),
            mode: HOSTS_FILE_MODE,
        }
    }
}

/// One `hosts.toml` table. The root entry also carries `server`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
struct HostToml {
    #[serde(skip_serializing_if = "Option::is_none")]
    server: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    capabilities: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    override_path: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    ca: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    client: Vec<[String; 2]>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    skip_verify: bool,
}

#[derive(Serialize)]
struct HostTable<'a> {
    host: BTreeMap<&'a str, &'a HostToml>,
}

#[derive(Default)]
struct HostsToml {
    /// Upstream used when every mirror fails.
    root: Option<(String, HostToml)>,
    /// Mirrors in configuration order.
    hosts: Vec<(String, HostToml)>,
}

impl HostsToml {
    /// Promotes the last mirror to the root so that containerd doesn't fall
    /// back to the upstream registry.
    fn disable_fallback(&mut self) {
        if let Some(last) = self.hosts.pop() {
            self.root = Some(last);
        }
    }

    /// Encodes one table per host, keeping their order.
    fn render(&self) -> Result<Vec<u8>, Error> {
        let mut out = String::new();

        if let Some((server, host)) = &self.root {
            let root = HostToml {
                server: Some(server.clone()),
                ..host.clone()
            };
            out.push_str(&toml::to_string(&root)?);
        }

        for (i, (endpoint, host)) in self.hosts.iter().enumerate() {
            let mut table = BTreeMap::new();
            table.insert(endpoint.as_str(), host);
            let encoded = toml::to_string(&HostTable { host: table })?;
            let encoded = if i > 0 {
                encoded.strip_prefix("[host]\n").unwrap_or(&encoded).to_string()
            } else {
                encoded
            };
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&encoded);
        }

        Ok(out.into_bytes())
    }
}

/// Directory name of a registry host: `*` is `_default` and a port turns
/// `host:5000` into `host_5000_`.
pub fn host_directory(host: &str) -> String {
    if host == WILDCARD {
        return "_default".to_string();
    }
    match host.rfind(':') {
        Some(idx) if idx > 0 => format!("{}_{}_", &host[..idx], &host[idx + 1..]),
        _ => host.to_string(),
    }
}

/// Host that actually serves a registry name.
pub fn default_host(host: &str) -> &str {
    if host == "docker.io" {
        "registry-1.docker.io"
    } else {
        host
    }
}

fn endpoint_host(url: &url::Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

/// Applies the TLS settings of `host` to a table, adding the PEM files the
/// table points at to `directory`.
fn configure_endpoint(
    registries: &BTreeMap<String, RegistryConfig>,
    host: &str,
    directory_path: &str,
    table: &mut HostToml,
    directory: &mut HostsDirectory,
) {
    let tls = match registries.get(host).and_then(|config| config.tls.as_ref()) {
        Some(tls) => tls,
        None => return,
    };

    if tls.insecure_skip_verify {
        table.skip_verify = true;
    }

    if !tls.ca.is_empty() {
        let name = format!("{}-ca.crt", host);
        table.ca = Some(format!("{}/{}", directory_path, name));
        directory.files.push(HostsFile::new(name, tls.ca.as_bytes()));
    }

    if let Some(identity) = &tls.client_identity {
        let crt = format!("{}-client.crt", host);
        let key = format!("{}-client.key", host);
        table.client = vec![[
            format!("{}/{}", directory_path, crt),
            format!("{}/{}", directory_path, key),
        ]];
        directory.files.push(HostsFile::new(crt, identity.crt.as_bytes()));
        directory.files.push(HostsFile::new(key, identity.key.as_bytes()));
    }
}

fn has_custom_tls(config: &RegistryConfig) -> bool {
    config
        .tls
        .as_ref()
        .map_or(false, |tls| !tls.ca.is_empty() || tls.client_identity.is_some() || tls.insecure_skip_verify)
}

/// Builds the hosts tree rooted at `base_path`.
///
/// Every mirrored registry gets a directory. Hosts without a mirror get one
/// only when they need non-default TLS, pointing at the registry itself.
pub fn generate_hosts(cfg: &RegistriesConfig, base_path: &str) -> Result<HostsConfig, Error> {
    let mut hosts = HostsConfig::default();

    for (registry, mirror) in &cfg.mirrors {
        let directory_name = host_directory(registry);
        let directory_path = format!("{}/{}", base_path, directory_name);
        let mut directory = HostsDirectory::default();
        let mut hosts_toml = HostsToml::default();

        for endpoint in &mirror.endpoints {
            let url = url::Url::parse(endpoint).map_err(|source| Error::Endpoint {
                host: registry.clone(),
                endpoint: endpoint.clone(),
                source,
            })?;

            let mut table = HostToml {
                capabilities: vec!["pull".to_string(), "resolve".to_string()],
                override_path: mirror.override_path,
                ..HostToml::default()
            };
            configure_endpoint(
                &cfg.config,
                &endpoint_host(&url),
                &directory_path,
                &mut table,
                &mut directory,
            );
            hosts_toml.hosts.push((endpoint.clone(), table));
        }

        if mirror.skip_fallback {
            hosts_toml.disable_fallback();
        }

        directory.files.push(HostsFile::new(HOSTS_TOML, hosts_toml.render()?));
        hosts.directories.insert(directory_name, directory);
    }

    for (host, config) in &cfg.config {
        let directory_name = host_directory(host);
        if hosts.directories.contains_key(&directory_name) || !has_custom_tls(config) {
            continue;
        }
        if host == WILDCARD {
            return Err(Error::WildcardTls);
        }

        let directory_path = format!("{}/{}", base_path, directory_name);
        let mut directory = HostsDirectory::default();
        let mut table = HostToml::default();
        configure_endpoint(&cfg.config, host, &directory_path, &mut table, &mut directory);

        let hosts_toml = HostsToml {
            root: None,
            hosts: vec![(format!("https://{}", default_host(host)), table)],
        };
        directory.files.push(HostsFile::new(HOSTS_TOML, hosts_toml.render()?));
        hosts.directories.insert(directory_name, directory);
    }

    Ok(hosts)
}

impl HostsConfig {
    /// Writes the tree under `root` and removes directories of hosts that
    /// are no longer configured.
    pub async fn write(&self, root: &Path) -> Result<(), Error> {
        tokio::fs::create_dir_all(root).await?;

        let mut stale = BTreeSet::new();
        let mut entries = tokio::fs::read_dir(root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !self.directories.contains_key(name) {
                    stale.insert(entry.path());
                }
            }
        }
        for path in stale {
            debug!(path = %path.display(), "removing stale registry hosts directory");
            tokio::fs::remove_dir_all(&path).await?;
        }

        for (name, directory) in &self.directories {
            let dir = root.join(name);
            tokio::fs::create_dir_all(&dir).await?;
            for file in &directory.files {
                let mut out = tokio::fs::OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .mode(file.mode)
                    .open(dir.join(&file.name))
                    .await?;
                out.write_all(&file.contents).await?;
                out.flush().await?;
            }
        }

        info!(root = %root.display(), hosts = self.directories.len(), "wrote registry hosts");
        Ok(())
    }
}

#[derive(Serialize)]
struct PluginFragment<'a> {
    plugins: BTreeMap<&'static str, ImagesPlugin<'a>>,
}

#[derive(Serialize)]
struct ImagesPlugin<'a> {
    registry: RegistrySection<'a>,
}

#[derive(Serialize)]
struct RegistrySection<'a> {
    config_path: &'a str,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    configs: BTreeMap<&'a str, HostAuth<'a>>,
}

#[derive(Serialize)]
struct HostAuth<'a> {
    auth: AuthToml<'a>,
}

#[derive(Serialize)]
struct AuthToml<'a> {
    #[serde(skip_serializing_if = "str::is_empty")]
    username: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    password: &'a str,
    #[serde(skip_serializing_if = "str::is_empty")]
    auth: &'a str,
    #[serde(rename = "identitytoken", skip_serializing_if = "str::is_empty")]
    identity_token: &'a str,
}

impl<'a> From<&'a RegistryAuthConfig> for AuthToml<'a> {
    fn from(auth: &'a RegistryAuthConfig) -> Self {
        AuthToml {
            username: &auth.username,
            password: &auth.password,
            auth: &auth.auth,
            identity_token: &auth.identity_token,
        }
    }
}

/// The registry part of the containerd config: where the hosts tree lives
/// and the credentials of every host that has them.
pub fn registry_plugin_config(cfg: &RegistriesConfig, hosts_path: &str) -> Result<String, Error> {
    let configs = cfg
        .config
        .iter()
        .filter_map(|(host, config)| {
            config.auth.as_ref().map(|auth| {
                (
                    host.as_str(),
                    HostAuth {
                        auth: AuthToml::from(auth),
                    },
                )
            })
        })
        .collect();

    let mut plugins = BTreeMap::new();
    plugins.insert(
        CRI_IMAGES_PLUGIN,
        ImagesPlugin {
            registry: RegistrySection {
                config_path: hosts_path,
                configs,
            },
        },
    );
    Ok(toml::to_string(&PluginFragment { plugins })?)
}
