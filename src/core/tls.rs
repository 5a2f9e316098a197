use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

use crate::proto::error::{Error, Result};

/// Internal TLS connector wrapper using rustls.
#[derive(Clone)]
pub(crate) struct TlsConnectorInner {
    connector: TlsConnector,
}

impl TlsConnectorInner {
    /// Creates a new TLS connector with default secure configuration.
    ///
    /// Uses `webpki-roots` for Mozilla's root certificates.
    pub(crate) fn new() -> Result<Self> {
        let mut root_store = RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
        })
    }

    /// Wraps an established stream in TLS, using `server_name` for SNI and
    /// certificate verification.
    pub(crate) async fn connect<S>(&self, server_name: &str, stream: S) -> Result<TlsStream<S>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|_| Error::connect(format!("invalid TLS server name {:?}", server_name)))?;
        self.connector
            .connect(name, stream)
            .await
            .map_err(|e| Error::connect(format!("TLS handshake with {}: {}", server_name, e)))
    }
}
