//! HTTP CONNECT tunnelling (§4.1 stage 4, §4.6).
//!
//! Two unidirectional copies with a 512 KiB buffer each, half-shutting the
//! opposite direction as each side finishes; both tasks are driven to
//! completion together via `tokio::try_join!`, the Rust analogue of the
//! original source's `when_all` fan-in (SPEC_FULL §9).

use crate::error::SessionError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

const TUNNEL_BUFFER: usize = 512 * 1024;

/// Parses a CONNECT request-target (`host:port`) the way the original
/// source's proxy handler resolves its upstream dial target.
pub fn parse_connect_target(target: &str) -> Result<(&str, u16), SessionError> {
    let (host, port) = target
        .rsplit_once(':')
        .ok_or_else(|| SessionError::Parse(format!("malformed CONNECT target {target:?}")))?;
    let port: u16 = port
        .parse()
        .map_err(|_| SessionError::Parse(format!("malformed CONNECT port {port:?}")))?;
    Ok((host, port))
}

/// Dials the upstream named by a `CONNECT` request.
pub async fn dial_upstream(host: &str, port: u16) -> Result<TcpStream, SessionError> {
    TcpStream::connect((host, port))
        .await
        .map_err(|e| SessionError::UpstreamConnectFailed(format!("{host}:{port}: {e}")))
}

/// Pumps bytes bidirectionally between `client` and `upstream` until either
/// half closes, half-shutting the opposite direction as each side
/// finishes. Returns `(client_to_upstream_bytes, upstream_to_client_bytes)`
/// for the caller to log (§4.6 "byte counts are tracked for logging").
pub async fn pump<C, U>(client: &mut C, upstream: &mut U) -> Result<(u64, u64), SessionError>
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_r, mut client_w) = tokio::io::split(&mut *client);
    let (mut upstream_r, mut upstream_w) = tokio::io::split(&mut *upstream);

    let c2u = async {
        let n = copy_and_shutdown(&mut client_r, &mut upstream_w, TUNNEL_BUFFER).await?;
        Ok::<u64, std::io::Error>(n)
    };
    let u2c = async {
        let n = copy_and_shutdown(&mut upstream_r, &mut client_w, TUNNEL_BUFFER).await?;
        Ok::<u64, std::io::Error>(n)
    };

    let (sent, received) = tokio::try_join!(c2u, u2c).map_err(SessionError::Io)?;
    Ok((sent, received))
}

async fn copy_and_shutdown<R, W>(reader: &mut R, writer: &mut W, buf_size: usize) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buf_size];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    let _ = writer.shutdown().await;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_and_port() {
        let (host, port) = parse_connect_target("example.com:443").unwrap();
        assert_eq!(host, "example.com");
        assert_eq!(port, 443);
    }

    #[test]
    fn rejects_missing_port() {
        assert!(parse_connect_target("example.com").is_err());
    }

    #[tokio::test]
    async fn pumps_both_directions() {
        let (mut client_side, mut client_remote) = tokio::io::duplex(1024);
        let (mut upstream_side, mut upstream_remote) = tokio::io::duplex(1024);

        let pumper = tokio::spawn(async move { pump(&mut client_remote, &mut upstream_remote).await });

        client_side.write_all(b"to-upstream").await.unwrap();
        upstream_side.write_all(b"to-client").await.unwrap();
        client_side.shutdown().await.unwrap();
        upstream_side.shutdown().await.unwrap();

        let mut from_client = vec![0u8; b"to-upstream".len()];
        upstream_side.read_exact(&mut from_client).await.unwrap();
        assert_eq!(&from_client, b"to-upstream");

        let mut from_upstream = vec![0u8; b"to-client".len()];
        client_side.read_exact(&mut from_upstream).await.unwrap();
        assert_eq!(&from_upstream, b"to-client");

        let (sent, received) = pumper.await.unwrap().unwrap();
        assert_eq!(sent, "to-upstream".len() as u64);
        assert_eq!(received, "to-client".len() as u64);
    }
}
