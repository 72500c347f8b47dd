//! Byte stream to a broker: plain TCP or TLS, and SASL/PLAIN credentials

use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig as TlsClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Username and password for SASL/PLAIN
#[derive(Clone, PartialEq, Eq)]
pub struct SaslPlain {
    pub username: String,
    pub password: String,
}

impl SaslPlain {
    /// PLAIN initial response: empty authzid, then username and password,
    /// each preceded by NUL
    pub fn auth_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.username.len() + self.password.len() + 2);
        buf.put_u8(0);
        buf.put_slice(self.username.as_bytes());
        buf.put_u8(0);
        buf.put_slice(self.password.as_bytes());
        buf.freeze()
    }
}

impl fmt::Debug for SaslPlain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaslPlain")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Stream carrying Kafka frames to one broker
pub enum BrokerStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl BrokerStream {
    /// Run a TLS handshake over `stream`, verifying the broker against the
    /// platform's root certificates
    pub async fn tls(stream: TcpStream, address: &str) -> Result<Self> {
        let name = server_name(address)?;
        let connector = tls_connector()?;
        let stream = connector
            .connect(name, stream)
            .await
            .map_err(|e| Error::connection(format!("TLS handshake with {address} failed: {e}")))?;

        debug!(broker = %address, "TLS session established");
        Ok(BrokerStream::Tls(Box::new(stream)))
    }
}

fn tls_connector() -> Result<TlsConnector> {
    let native = rustls_native_certs::load_native_certs();
    for error in &native.errors {
        warn!(error = %error, "Failed to load a platform root certificate");
    }

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    if added == 0 {
        return Err(Error::config(format!(
            "no usable platform root certificates for TLS ({ignored} rejected)"
        )));
    }

    let config = TlsClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Host part of `host:port`, for SNI and certificate verification
fn server_name(address: &str) -> Result<ServerName<'static>> {
    let host = match address.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => address,
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');

    ServerName::try_from(host.to_string())
        .map_err(|e| Error::config(format!("invalid TLS server name '{host}': {e}")))
}

impl AsyncRead for BrokerStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BrokerStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            BrokerStream::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for BrokerStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            BrokerStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            BrokerStream::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BrokerStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            BrokerStream::Tls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BrokerStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            BrokerStream::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_auth_bytes_are_nul_separated() {
        let credentials = SaslPlain {
            username: "alice".to_string(),
            password: "s3cret".to_string(),
        };
        assert_eq!(&credentials.auth_bytes()[..], b"\0alice\0s3cret");
    }

    #[test]
    fn password_is_not_printed() {
        let credentials = SaslPlain {
            username: "alice".to_string(),
            password: "s3cret".to_string(),
        };
        let printed = format!("{credentials:?}");
        assert!(printed.contains("alice"));
        assert!(!printed.contains("s3cret"));
    }

    #[test]
    fn server_name_strips_port() {
        assert_eq!(
            server_name("kafka-0.kafka.svc:9093").unwrap(),
            ServerName::try_from("kafka-0.kafka.svc").unwrap()
        );
        assert_eq!(
            server_name("broker.example.com").unwrap(),
            ServerName::try_from("broker.example.com").unwrap()
        );
    }

    #[test]
    fn server_name_accepts_ip_addresses() {
        assert!(matches!(
            server_name("10.0.0.7:9093").unwrap(),
            ServerName::IpAddress(_)
        ));
        assert!(matches!(
            server_name("[::1]:9093").unwrap(),
            ServerName::IpAddress(_)
        ));
    }
}
