//! TLS configuration for the machine API with hot certificate rotation.
//!
//! [`CertificateProvider::bootstrap`] waits for the first [`Api`] secrets
//! resource, then keeps watching it. Every accepted update replaces the
//! cached material in one swap, so handshakes in flight see either the old
//! or the new certificates. Material that fails to parse is logged and the
//! previous certificates stay in use.

use std::sync::{Arc, Mutex};

use resource_state::{Context, Event, Selector, State};
use rustls::client::ResolvesClientCert;
use rustls::crypto::CryptoProvider;
use rustls::server::{ClientHello, ResolvesServerCert, WebPkiClientVerifier};
use rustls::sign::CertifiedKey;
use rustls::{ClientConfig, RootCertStore, ServerConfig, SignatureScheme};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::resources::secrets::{self, Api};

/// Errors from the certificate provider.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// PEM material could not be used.
    #[error("failed to parse certificate: {0}")]
    CertificateParse(String),
    /// The watch reported an error before any material arrived.
    #[error("certificate watch failed: {0}")]
    Watch(String),
    #[error(transparent)]
    State(#[from] resource_state::Error),
    #[error("failed to build client verifier: {0}")]
    Verifier(#[from] rustls::server::VerifierBuilderError),
    #[error(transparent)]
    Tls(#[from] rustls::Error),
}

/// Parsed certificates, replaced as a whole on rotation.
#[derive(Debug)]
struct Material {
    roots: Arc<RootCertStore>,
    server: Arc<CertifiedKey>,
    client: Option<Arc<CertifiedKey>>,
}

#[derive(Debug)]
struct Shared {
    current: Mutex<Arc<Material>>,
}

impl Shared {
    fn load(&self) -> Arc<Material> {
        match self.current.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn store(&self, material: Material) {
        let material = Arc::new(material);
        match self.current.lock() {
            Ok(mut guard) => *guard = material,
            Err(poisoned) => *poisoned.into_inner() = material,
        }
    }
}

/// Source of server and client TLS configurations backed by the [`Api`]
/// secrets resource.
#[derive(Clone, Debug)]
pub struct CertificateProvider {
    shared: Arc<Shared>,
    crypto: Arc<CryptoProvider>,
}

impl CertificateProvider {
    /// Waits for the API certificates in `state` and starts watching them
    /// for rotation.
    ///
    /// Destroyed resources and the snapshot marker are skipped while
    /// waiting. The returned task stops when `ctx` is cancelled.
    pub async fn bootstrap(ctx: &Context, state: &State) -> Result<(Self, JoinHandle<()>), Error> {
        let crypto = Arc::new(rustls::crypto::ring::default_provider());
        let queue = state
            .watch(ctx, Selector::resource::<Api>(secrets::API_ID))
            .await?;

        let material = loop {
            match queue.recv(ctx).await? {
                Event::Created(raw) | Event::Updated(raw) => {
                    let api = raw.typed::<Api>()?;
                    break parse(&crypto, api.spec())?;
                }
                Event::Errored(e) => return Err(Error::Watch(e)),
                Event::Destroyed(_) | Event::Bootstrapped(_) => continue,
            }
        };
        info!("machine API certificates loaded");

        let provider = CertificateProvider {
            shared: Arc::new(Shared {
                current: Mutex::new(Arc::new(material)),
            }),
            crypto,
        };

        let watcher = provider.clone();
        let ctx = ctx.clone();
        let task = tokio::spawn(async move {
            loop {
                let event = match queue.recv(&ctx).await {
                    Ok(event) => event,
                    Err(_) => return,
                };
                let raw = match event {
                    Event::Created(raw) | Event::Updated(raw) => raw,
                    Event::Errored(e) => {
                        error!(error = %e, "certificate watch failed");
                        continue;
                    }
                    Event::Destroyed(_) | Event::Bootstrapped(_) => continue,
                };
                let version = raw.metadata.version();
                match raw.typed::<Api>().map_err(Error::from).and_then(|api| parse(&watcher.crypto, api.spec())) {
                    Ok(material) => {
                        watcher.shared.store(material);
                        info!(%version, "machine API certificates rotated");
                    }
                    Err(e) => warn!(error = %e, %version, "keeping previous certificates"),
                }
            }
        });

        Ok((provider, task))
    }

    /// Server configuration requiring client certificates signed by the
    /// trusted CAs.
    pub fn server_config(&self) -> Result<ServerConfig, Error> {
        let roots = self.shared.load().roots.clone();
        let verifier = WebPkiClientVerifier::builder_with_provider(roots, self.crypto.clone()).build()?;
        Ok(ServerConfig::builder_with_provider(self.crypto.clone())
            .with_protocol_versions(&[&rustls::version::TLS13])?
            .with_client_cert_verifier(verifier)
            .with_cert_resolver(Arc::new(ServerResolver(self.shared.clone()))))
    }

    /// Client configuration trusting the CAs and presenting the client
    /// certificate when one is configured.
    pub fn client_config(&self) -> Result<ClientConfig, Error> {
        let roots = self.shared.load().roots.clone();
        Ok(ClientConfig::builder_with_provider(self.crypto.clone())
            .with_protocol_versions(&[&rustls::version::TLS13])?
            .with_root_certificates(roots)
            .with_client_cert_resolver(Arc::new(ClientResolver(self.shared.clone()))))
    }
}

#[derive(Debug)]
struct ServerResolver(Arc<Shared>);

impl ResolvesServerCert for ServerResolver {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(self.0.load().server.clone())
    }
}

#[derive(Debug)]
struct ClientResolver(Arc<Shared>);

impl ResolvesClientCert for ClientResolver {
    fn resolve(&self, _root_hint_subjects: &[&[u8]], _sigschemes: &[SignatureScheme]) -> Option<Arc<CertifiedKey>> {
        self.0.load().client.clone()
    }

    fn has_certs(&self) -> bool {
        self.0.load().client.is_some()
    }
}

fn parse(crypto: &CryptoProvider, api: &Api) -> Result<Material, Error> {
    let mut roots = RootCertStore::empty();
    for pem in std::iter::once(&api.ca_pem).chain(api.accepted_cas.iter()) {
        for cert in certificates(pem)? {
            roots.add(cert)?;
        }
    }
    if roots.is_empty() {
        return Err(Error::CertificateParse("no trusted CA".to_string()));
    }

    let server = certified_key(crypto, &api.server_cert_pem, &api.server_key_pem)?;
    let client = match (&api.client_cert_pem, &api.client_key_pem) {
        (Some(crt), Some(key)) => Some(certified_key(crypto, crt, key)?),
        _ => None,
    };
    debug!(roots = roots.len(), client = client.is_some(), "parsed API certificates");

    Ok(Material {
        roots: Arc::new(roots),
        server,
        client,
    })
}

fn certificates(pem: &str) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>, Error> {
    rustls_pemfile::certs(&mut pem.as_bytes())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| Error::CertificateParse(e.to_string()))
}

fn certified_key(crypto: &CryptoProvider, cert_pem: &str, key_pem: &str) -> Result<Arc<CertifiedKey>, Error> {
    let chain = certificates(cert_pem)?;
    if chain.is_empty() {
        return Err(Error::CertificateParse("no certificate in PEM".to_string()));
    }
    let key = rustls_pemfile::private_key(&mut key_pem.as_bytes())
        .map_err(|e| Error::CertificateParse(e.to_string()))?
        .ok_or_else(|| Error::CertificateParse("no private key in PEM".to_string()))?;
    let key = crypto.key_provider.load_private_key(key)?;
    Ok(Arc::new(CertifiedKey::new(chain, key)))
}
