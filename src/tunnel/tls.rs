use crate::tunnel::splice;
use anyhow::{anyhow, bail, Context, Result};
use log::{debug, error, info, warn};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{
    ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme, SupportedCipherSuite,
    SupportedProtocolVersion,
};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

const MACOS_CERT_BUNDLE: &str = "/etc/ssl/cert.pem";

const TLS_VERSIONS: [&str; 5] = ["SSL30", "TLS10", "TLS11", "TLS12", "TLS13"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    /// Skip certificate verification on the relay's upstream leg.
    pub insecure: bool,
    /// TLS 1.2 cipher suite names. Empty means the provider defaults.
    pub cipher_suites: Vec<String>,
    /// `TLS12` or `TLS13`. Empty means `TLS12`.
    pub min_version: String,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            insecure: false,
            cipher_suites: Vec::new(),
            min_version: String::new(),
        }
    }
}

impl TlsSettings {
    pub fn protocol_versions(&self) -> Result<&'static [&'static SupportedProtocolVersion]> {
        static FROM_TLS12: [&SupportedProtocolVersion; 2] =
            [&rustls::version::TLS13, &rustls::version::TLS12];
        static FROM_TLS13: [&SupportedProtocolVersion; 1] = [&rustls::version::TLS13];

        match self.min_version.as_str() {
            "" | "TLS12" => Ok(&FROM_TLS12),
            "TLS13" => Ok(&FROM_TLS13),
            v if TLS_VERSIONS.contains(&v) => {
                bail!("minimum TLS version {v} is no longer supported, use TLS12 or TLS13")
            }
            v => bail!(
                "invalid minimum TLS version: {v}, valid names include {}",
                TLS_VERSIONS.join(",")
            ),
        }
    }

    /// Provider suites restricted to the configured names. TLS 1.3 suites are always kept.
    pub fn cipher_suites(&self, provider: &CryptoProvider) -> Result<Vec<SupportedCipherSuite>> {
        if self.cipher_suites.is_empty() {
            return Ok(provider.cipher_suites.clone());
        }

        let known: Vec<(String, SupportedCipherSuite)> = provider
            .cipher_suites
            .iter()
            .map(|s| (format!("{:?}", s.suite()), *s))
            .collect();

        for name in &self.cipher_suites {
            if !known.iter().any(|(known_name, _)| known_name == name) {
                let valid = known
                    .iter()
                    .filter(|(_, s)| !matches!(s, SupportedCipherSuite::Tls13(_)))
                    .map(|(n, _)| n.as_str())
                    .collect::<Vec<_>>();
                bail!(
                    "invalid cipher suite: {name}, valid names include {}",
                    valid.join(",")
                );
            }
        }

        Ok(known
            .into_iter()
            .filter(|(name, s)| {
                matches!(s, SupportedCipherSuite::Tls13(_)) || self.cipher_suites.contains(name)
            })
            .map(|(_, s)| s)
            .collect())
    }

    pub fn build_client_config(&self) -> Result<Arc<ClientConfig>> {
        let mut provider = ring::default_provider();
        provider.cipher_suites = self.cipher_suites(&provider)?;
        let algorithms = provider.signature_verification_algorithms;

        let mut config = ClientConfig::builder_with_provider(Arc::new(provider))
            .with_protocol_versions(self.protocol_versions()?)
            .context("incompatible TLS settings")?
            .with_root_certificates(self.root_store())
            .with_no_client_auth();

        if self.insecure {
            config
                .dangerous()
                .set_certificate_verifier(Arc::new(NoCertificateVerification(algorithms)));
        }

        Ok(Arc::new(config))
    }

    fn root_store(&self) -> RootCertStore {
        let bundle = Path::new(MACOS_CERT_BUNDLE);
        if cfg!(target_os = "macos") && !self.insecure && bundle.exists() {
            match std::fs::read(bundle) {
                Ok(pem) => {
                    let (store, added) = root_store_from_pem(&pem);
                    debug!("loaded {added} root certificates from {MACOS_CERT_BUNDLE}");
                    return store;
                }
                Err(e) => warn!("failed to read {MACOS_CERT_BUNDLE}: {e}"),
            }
        }

        let mut store = RootCertStore::empty();
        store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        store
    }
}

/// Builds a trust store from PEM data, skipping blocks that are not usable certificates.
pub fn root_store_from_pem(pem: &[u8]) -> (RootCertStore, usize) {
    let mut store = RootCertStore::empty();
    let mut added = 0;
    for cert in CertificateDer::pem_slice_iter(pem) {
        match cert {
            Ok(der) => match store.add(der) {
                Ok(()) => added += 1,
                Err(e) => debug!("skipping certificate: {e}"),
            },
            Err(e) => {
                warn!("stopped reading PEM data: {e}");
                break;
            }
        }
    }
    (store, added)
}

#[derive(Debug)]
struct NoCertificateVerification(WebPkiSupportedAlgorithms);

impl ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.supported_schemes()
    }
}

fn resolve_server_name(address: &str) -> Result<ServerName<'static>> {
    let host = match address.rsplit_once(':') {
        Some((host, _)) => host,
        None => address,
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');

    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ServerName::IpAddress(ip.into()));
    }
    ServerName::try_from(host.to_owned()).map_err(|e| anyhow!("invalid TLS server name {host}: {e}"))
}

/// Accepts plaintext connections locally and re-originates them as TLS
/// towards the upstream address, verifying the real remote's identity.
pub struct TlsRelay {
    listen_address: String,
    upstream_address: String,
    server_name: ServerName<'static>,
    connector: TlsConnector,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TlsRelay {
    pub fn new(
        listen_address: &str,
        upstream_address: &str,
        server_address: &str,
        config: Arc<ClientConfig>,
    ) -> Result<Self> {
        Ok(Self {
            listen_address: listen_address.to_string(),
            upstream_address: upstream_address.to_string(),
            server_name: resolve_server_name(server_address)?,
            connector: TlsConnector::from(config),
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        })
    }

    pub fn listen_address(&self) -> &str {
        &self.listen_address
    }

    pub async fn start(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.listen_address)
            .await
            .with_context(|| format!("starting a TLS relay on {} failed", self.listen_address))?;
        info!(
            "TLS relay {} -> {} ({})",
            self.listen_address,
            self.upstream_address,
            self.server_name.to_str()
        );

        let handle = tokio::spawn(accept_loop(
            listener,
            self.upstream_address.clone(),
            self.server_name.clone(),
            self.connector.clone(),
            self.shutdown.clone(),
        ));

        let mut task = self.task.lock().unwrap_or_else(|p| p.into_inner());
        if task.replace(handle).is_some() {
            bail!("TLS relay on {} already started", self.listen_address);
        }
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        self.shutdown.cancel();
        let handle = self.task.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            handle
                .await
                .with_context(|| format!("TLS relay on {} panicked", self.listen_address))?;
        }
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    upstream: String,
    server_name: ServerName<'static>,
    connector: TlsConnector,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("TLS relay to {upstream} shutting down");
                break;
            }
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((socket, src_addr)) => {
                        debug!("accepted TLS relay connection from {src_addr}");
                        let upstream = upstream.clone();
                        let server_name = server_name.clone();
                        let connector = connector.clone();
                        let child_token = token.child_token();
                        tokio::spawn(async move {
                            if let Err(e) = relay_connection(socket, &upstream, server_name, connector, child_token).await {
                                error!("TLS relay connection from {src_addr}: {e:#}");
                            }
                        });
                    }
                    Err(e) => {
                        error!("error accepting TLS relay connection: {e}");
                        sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        }
    }
}

async fn relay_connection(
    socket: TcpStream,
    upstream: &str,
    server_name: ServerName<'static>,
    connector: TlsConnector,
    token: CancellationToken,
) -> Result<()> {
    let label = format!("TLS relay to {upstream}");
    let tcp = TcpStream::connect(upstream)
        .await
        .with_context(|| format!("failed to connect to {upstream}"))?;
    let tls = connector
        .connect(server_name, tcp)
        .await
        .with_context(|| format!("TLS handshake via {upstream} failed"))?;

    tokio::select! {
        _ = token.cancelled() => debug!("{label}: cancelled"),
        _ = splice(socket, tls, &label) => {}
    }
    Ok(())
}
