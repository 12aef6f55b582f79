//! The accepted-stream abstraction and TLS detection/handshake stages
//! (§4.1 steps 1-2: `DetectTls`, `HandshakeTls`).
//!
//! `Transport` erases the difference between a plain `TcpStream` and an
//! established `tokio-rustls` stream so the rest of the session drives one
//! `AsyncRead + AsyncWrite` type regardless of which stage produced it.

use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

#[cfg(feature = "tls")]
use tokio_rustls::server::TlsStream;

/// A connection after `DetectTls`/`HandshakeTls` has run (§3 "Session
/// state"). `Plain` is the common case; `Tls` wraps the handshake output.
pub enum Transport {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<TlsStream<TcpStream>>),
}

impl Transport {
    /// Peeks the first byte without consuming it. A TLS `ClientHello`
    /// record starts with content-type `0x16` (handshake) — `original
    /// source`'s `detect_ssl` check, reduced to the one byte that actually
    /// discriminates HTTP request-lines (which start with an ASCII method
    /// letter) from a TLS record header.
    pub async fn peek_is_tls(stream: &TcpStream) -> std::io::Result<bool> {
        let mut buf = [0u8; 1];
        let n = stream.peek(&mut buf).await?;
        Ok(n == 1 && buf[0] == 0x16)
    }
}

impl AsyncRead for Transport {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Transport {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_flush(cx),
            #[cfg(feature = "tls")]
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Transport::Plain(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            Transport::Tls(s) => Pin::new(s.as_mut()).poll_shutdown(cx),
        }
    }
}

/// A TLS server configuration built from in-memory cert/key bytes
/// (`Server::use_tls`). Loading from disk or a keystore is the out-of-scope
/// "SSL certificate loading" collaborator (SPEC_FULL §1).
#[cfg(feature = "tls")]
pub struct TlsSetup {
    pub acceptor: tokio_rustls::TlsAcceptor,
}

#[cfg(feature = "tls")]
impl TlsSetup {
    pub fn from_pem(cert: &[u8], key: &[u8], passphrase: Option<&str>) -> Result<Self, crate::error::TlsConfigError> {
        use crate::error::TlsConfigError;
        use std::io::Cursor;

        if passphrase.is_some() {
            // Decrypting a passphrase-protected PKCS#8 key is "certificate
            // loading"-shaped work this crate places outside the core.
            return Err(TlsConfigError::EncryptedKeyUnsupported);
        }

        let certs: Vec<_> = rustls_pemfile::certs(&mut Cursor::new(cert))
            .collect::<Result<_, _>>()
            .map_err(|e| TlsConfigError::InvalidMaterial(e.to_string()))?;
        if certs.is_empty() {
            return Err(TlsConfigError::NoCertificates);
        }

        let private_key = rustls_pemfile::private_key(&mut Cursor::new(key))
            .map_err(|e| TlsConfigError::InvalidMaterial(e.to_string()))?
            .ok_or(TlsConfigError::NoPrivateKey)?;

        let config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, private_key)?;

        Ok(Self { acceptor: tokio_rustls::TlsAcceptor::from(std::sync::Arc::new(config)) })
    }
}

#[cfg(all(test, feature = "tls"))]
mod tests {
    use super::*;

    #[test]
    fn rejects_encrypted_key_unconditionally() {
        let err = TlsSetup::from_pem(b"", b"", Some("secret")).unwrap_err();
        assert!(matches!(err, crate::error::TlsConfigError::EncryptedKeyUnsupported));
    }

    #[test]
    fn empty_cert_bytes_rejected() {
        let err = TlsSetup::from_pem(b"", b"", None).unwrap_err();
        assert!(matches!(err, crate::error::TlsConfigError::NoCertificates));
    }
}
