//! TLS configuration and certificate loading.
//!
//! # Responsibilities
//! - Provide the default server TLS policy
//! - Load a policy descriptor (YAML) restricting versions, suites and groups
//! - Build the listener's `ServerConfig` from a policy and a cert/key pair
//! - Build the connector used to reach HTTPS backends
//!
//! # Design Decisions
//! - ALPN only offers `http/1.1`; the proxy never upgrades a client to HTTP/2
//! - Descriptor names are rustls names (`TLS13_AES_128_GCM_SHA256`, `X25519`)
//! - Unknown names are errors rather than silently ignored

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{aws_lc_rs, CryptoProvider};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{
    ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme,
    SupportedProtocolVersion,
};
use serde::Deserialize;

/// ALPN protocols offered to clients.
const ALPN_HTTP1: &[u8] = b"http/1.1";

/// Error type for TLS setup.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("cannot read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no certificates found in {0:?}")]
    NoCertificates(PathBuf),
    #[error("no private key found in {0:?}")]
    NoPrivateKey(PathBuf),
    #[error("invalid TLS descriptor {path:?}: {source}")]
    Descriptor {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("unknown cipher suite {0:?}")]
    UnknownCipherSuite(String),
    #[error("unknown key exchange group {0:?}")]
    UnknownKxGroup(String),
    #[error("min_version {min} is above max_version {max}")]
    VersionRange { min: TlsVersion, max: TlsVersion },
    #[error(transparent)]
    Rustls(#[from] rustls::Error),
}

/// Protocol versions a policy can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
pub enum TlsVersion {
    #[serde(rename = "1.2", alias = "TLS1.2", alias = "tls1.2")]
    Tls12,
    #[serde(rename = "1.3", alias = "TLS1.3", alias = "tls1.3")]
    Tls13,
}

impl TlsVersion {
    fn protocol(self) -> &'static SupportedProtocolVersion {
        match self {
            TlsVersion::Tls12 => &rustls::version::TLS12,
            TlsVersion::Tls13 => &rustls::version::TLS13,
        }
    }
}

impl std::fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsVersion::Tls12 => write!(f, "1.2"),
            TlsVersion::Tls13 => write!(f, "1.3"),
        }
    }
}

/// Server-side TLS policy: version bounds and optional suite/group allow-lists.
///
/// Empty allow-lists keep the provider defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TlsPolicy {
    pub min_version: TlsVersion,
    pub max_version: TlsVersion,
    pub cipher_suites: Vec<String>,
    pub curve_preferences: Vec<String>,
}

impl Default for TlsPolicy {
    fn default() -> Self {
        Self {
            min_version: TlsVersion::Tls12,
            max_version: TlsVersion::Tls13,
            cipher_suites: Vec::new(),
            curve_preferences: Vec::new(),
        }
    }
}

impl TlsPolicy {
    /// Load a policy descriptor from a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self, TlsError> {
        let content = std::fs::read_to_string(path).map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|source| TlsError::Descriptor {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Protocol versions enabled by this policy, lowest first.
    pub fn protocol_versions(&self) -> Result<Vec<&'static SupportedProtocolVersion>, TlsError> {
        if self.min_version > self.max_version {
            return Err(TlsError::VersionRange {
                min: self.min_version,
                max: self.max_version,
            });
        }
        Ok([TlsVersion::Tls12, TlsVersion::Tls13]
            .into_iter()
            .filter(|v| (self.min_version..=self.max_version).contains(v))
            .map(TlsVersion::protocol)
            .collect())
    }

    /// Crypto provider restricted to the policy's suites and groups, in the
    /// order the policy lists them.
    pub fn crypto_provider(&self) -> Result<CryptoProvider, TlsError> {
        let mut provider = aws_lc_rs::default_provider();

        if !self.cipher_suites.is_empty() {
            provider.cipher_suites = self
                .cipher_suites
                .iter()
                .map(|name| {
                    provider
                        .cipher_suites
                        .iter()
                        .find(|suite| format!("{:?}", suite.suite()) == *name)
                        .copied()
                        .ok_or_else(|| TlsError::UnknownCipherSuite(name.clone()))
                })
                .collect::<Result<_, _>>()?;
        }

        if !self.curve_preferences.is_empty() {
            provider.kx_groups = self
                .curve_preferences
                .iter()
                .map(|name| {
                    provider
                        .kx_groups
                        .iter()
                        .find(|group| format!("{:?}", group.name()) == *name)
                        .copied()
                        .ok_or_else(|| TlsError::UnknownKxGroup(name.clone()))
                })
                .collect::<Result<_, _>>()?;
        }

        Ok(provider)
    }

    /// Build the listener configuration for a certificate chain and key.
    pub fn server_config(
        &self,
        certs: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
    ) -> Result<ServerConfig, TlsError> {
        let versions = self.protocol_versions()?;
        let mut config = ServerConfig::builder_with_provider(Arc::new(self.crypto_provider()?))
            .with_protocol_versions(&versions)?
            .with_no_client_auth()
            .with_single_cert(certs, key)?;
        config.alpn_protocols = vec![ALPN_HTTP1.to_vec()];
        Ok(config)
    }
}

/// Resolve the policy: the descriptor when one is named, the default otherwise.
pub fn load_policy(descriptor: Option<&Path>) -> Result<TlsPolicy, TlsError> {
    match descriptor {
        Some(path) => {
            tracing::info!(path = ?path, "Loading TLS configuration");
            TlsPolicy::from_yaml_file(path)
        }
        None => {
            tracing::warn!("No TLS configuration specified, using default");
            Ok(TlsPolicy::default())
        }
    }
}

/// Load the listener TLS configuration from certificate and key files.
pub fn load_tls_config(
    policy: &TlsPolicy,
    cert_path: &Path,
    key_path: &Path,
) -> Result<RustlsConfig, TlsError> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;
    let config = policy.server_config(certs, key)?;
    Ok(RustlsConfig::from_config(Arc::new(config)))
}

fn open(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|source| TlsError::Read {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))
}

/// Connector for reaching the backend over plain HTTP or HTTPS.
///
/// With `skip_verify` the backend certificate is accepted unchecked. Without
/// native roots HTTPS backends fail verification, plain HTTP still works.
pub fn backend_connector(skip_verify: bool) -> Result<HttpsConnector<HttpConnector>, TlsError> {
    let client_config = || {
        ClientConfig::builder_with_provider(Arc::new(aws_lc_rs::default_provider()))
            .with_safe_default_protocol_versions()
    };

    let builder = if skip_verify {
        tracing::warn!("Backend TLS verification disabled");
        let config = client_config()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth();
        hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(config)
    } else {
        match hyper_rustls::HttpsConnectorBuilder::new()
            .with_provider_and_native_roots(aws_lc_rs::default_provider())
        {
            Ok(builder) => builder,
            Err(e) => {
                tracing::warn!(error = %e, "No native root certificates, HTTPS backends will not verify");
                let config = client_config()?
                    .with_root_certificates(RootCertStore::empty())
                    .with_no_client_auth();
                hyper_rustls::HttpsConnectorBuilder::new().with_tls_config(config)
            }
        }
    };
    Ok(builder.https_or_http().enable_http1().build())
}

/// Accepts any backend certificate.
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_policy_allows_tls12_and_tls13() {
        let versions = TlsPolicy::default().protocol_versions().unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].version, rustls::ProtocolVersion::TLSv1_2);
        assert_eq!(versions[1].version, rustls::ProtocolVersion::TLSv1_3);
    }

    #[test]
    fn default_policy_keeps_provider_suites() {
        let provider = TlsPolicy::default().crypto_provider().unwrap();
        assert_eq!(
            provider.cipher_suites.len(),
            aws_lc_rs::default_provider().cipher_suites.len()
        );
    }

    #[test]
    fn descriptor_restricts_suites_in_listed_order() {
        let policy = TlsPolicy::from_yaml(
            r#"
min_version: "1.3"
cipher_suites:
  - TLS13_CHACHA20_POLY1305_SHA256
  - TLS13_AES_128_GCM_SHA256
curve_preferences:
  - X25519
"#,
        )
        .unwrap();

        assert_eq!(policy.min_version, TlsVersion::Tls13);
        assert_eq!(policy.max_version, TlsVersion::Tls13);

        let provider = policy.crypto_provider().unwrap();
        let names: Vec<String> = provider
            .cipher_suites
            .iter()
            .map(|s| format!("{:?}", s.suite()))
            .collect();
        assert_eq!(
            names,
            ["TLS13_CHACHA20_POLY1305_SHA256", "TLS13_AES_128_GCM_SHA256"]
        );
        assert_eq!(provider.kx_groups.len(), 1);
        assert_eq!(policy.protocol_versions().unwrap().len(), 1);
    }

    #[test]
    fn unknown_suite_is_rejected() {
        let policy = TlsPolicy {
            cipher_suites: vec!["TLS_RSA_WITH_RC4_128_MD5".into()],
            ..TlsPolicy::default()
        };
        assert!(matches!(
            policy.crypto_provider(),
            Err(TlsError::UnknownCipherSuite(name)) if name == "TLS_RSA_WITH_RC4_128_MD5"
        ));
    }

    #[test]
    fn unknown_group_is_rejected() {
        let policy = TlsPolicy {
            curve_preferences: vec!["brainpool".into()],
            ..TlsPolicy::default()
        };
        assert!(matches!(
            policy.crypto_provider(),
            Err(TlsError::UnknownKxGroup(_))
        ));
    }

    #[test]
    fn inverted_version_range_is_rejected() {
        let policy = TlsPolicy {
            min_version: TlsVersion::Tls13,
            max_version: TlsVersion::Tls12,
            ..TlsPolicy::default()
        };
        assert!(matches!(
            policy.protocol_versions(),
            Err(TlsError::VersionRange { .. })
        ));
    }

    #[test]
    fn unknown_descriptor_key_is_rejected() {
        assert!(TlsPolicy::from_yaml("prefer_server_ciphers: true\n").is_err());
    }

    #[test]
    fn descriptor_file_errors_name_the_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "min_version: [not, a, version]").unwrap();

        let err = TlsPolicy::from_yaml_file(file.path()).unwrap_err();
        assert!(matches!(err, TlsError::Descriptor { ref path, .. } if path == file.path()));
    }

    #[test]
    fn no_descriptor_means_default_policy() {
        assert_eq!(load_policy(None).unwrap(), TlsPolicy::default());
    }

    #[test]
    fn missing_certificate_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_tls_config(
            &TlsPolicy::default(),
            &dir.path().join("example.crt"),
            &dir.path().join("example.key"),
        )
        .unwrap_err();
        assert!(matches!(err, TlsError::Read { .. }));
    }

    #[test]
    fn empty_certificate_file_is_fatal() {
        let cert = tempfile::NamedTempFile::new().unwrap();
        let key = tempfile::NamedTempFile::new().unwrap();
        let err = load_tls_config(&TlsPolicy::default(), cert.path(), key.path()).unwrap_err();
        assert!(matches!(err, TlsError::NoCertificates(_)));
    }

    #[test]
    fn backend_connector_builds_with_and_without_verification() {
        assert!(backend_connector(true).is_ok());
        assert!(backend_connector(false).is_ok());
    }
}
