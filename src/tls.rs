use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pgwire::tokio::TlsAcceptor;
use pgwire::tokio::tokio_rustls::rustls::ServerConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("ROOMHOLD_TLS_CERT and ROOMHOLD_TLS_KEY must be set together")]
    HalfConfigured,
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no certificates in {0}")]
    NoCertificates(PathBuf),
    #[error("no private key in {0}")]
    NoPrivateKey(PathBuf),
    #[error("rejected certificate/key pair: {0}")]
    Config(#[from] pgwire::tokio::tokio_rustls::rustls::Error),
}

fn reader(path: &Path) -> Result<BufReader<File>, TlsError> {
    File::open(path).map(BufReader::new).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Build the server TLS acceptor from PEM files. TLS is off when neither path is set.
pub fn load_tls_acceptor(
    cert_path: Option<&str>,
    key_path: Option<&str>,
) -> Result<Option<TlsAcceptor>, TlsError> {
    let (cert_path, key_path) = match (cert_path, key_path) {
        (None, None) => return Ok(None),
        (Some(c), Some(k)) => (Path::new(c), Path::new(k)),
        _ => return Err(TlsError::HalfConfigured),
    };

    let read_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| TlsError::Read { path, source }
    };

    let certs: Vec<_> = rustls_pemfile::certs(&mut reader(cert_path)?)
        .collect::<Result<_, _>>()
        .map_err(read_err(cert_path))?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(cert_path.to_path_buf()));
    }

    let key = rustls_pemfile::private_key(&mut reader(key_path)?)
        .map_err(read_err(key_path))?
        .ok_or_else(|| TlsError::NoPrivateKey(key_path.to_path_buf()))?;

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"postgresql".to_vec()];

    tracing::debug!(cert = %cert_path.display(), "TLS enabled");
    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_file(name: &str, contents: &str) -> String {
        let dir = std::env::temp_dir().join("roomhold_test_tls");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn disabled_without_paths() {
        assert!(load_tls_acceptor(None, None).unwrap().is_none());
    }

    #[test]
    fn one_path_alone_is_rejected() {
        assert!(matches!(
            load_tls_acceptor(Some("cert.pem"), None),
            Err(TlsError::HalfConfigured)
        ));
        assert!(matches!(
            load_tls_acceptor(None, Some("key.pem")),
            Err(TlsError::HalfConfigured)
        ));
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = load_tls_acceptor(Some("/nonexistent/roomhold.crt"), Some("/nonexistent/roomhold.key"))
            .err()
            .unwrap();
        assert!(matches!(&err, TlsError::Read { path, .. } if path.ends_with("roomhold.crt")));
    }

    #[test]
    fn empty_pem_has_no_certificates() {
        let cert = tmp_file("empty.crt", "");
        let key = tmp_file("empty.key", "");
        assert!(matches!(
            load_tls_acceptor(Some(&cert), Some(&key)),
            Err(TlsError::NoCertificates(_))
        ));
    }
}
