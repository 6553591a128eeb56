use std::io;

use log::{debug, info};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

/// Size of the single read performed by [`send_recv`]. Longer responses are
/// truncated.
pub const RECV_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to connect to {address}. More details: {source}")]
    ConnectionFailed {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("Exchange with {address} failed. More details: {source}")]
    ExchangeFailed {
        address: String,
        #[source]
        source: io::Error,
    },
}

pub async fn connect(host: &str, port: u16) -> Result<TcpStream, TransportError> {
    TcpStream::connect((host, port))
        .await
        .map_err(|source| TransportError::ConnectionFailed {
            address: format!("{host}:{port}"),
            source,
        })
}

/// Opens one connection, writes `payload` as a single line, reads one chunk
/// of at most [`RECV_BUFFER_SIZE`] bytes and closes the connection.
pub async fn send_recv(
    host: &str,
    port: u16,
    payload: Option<&str>,
) -> Result<Vec<u8>, TransportError> {
    send_recv_with_prefix(host, port, None, payload).await
}

/// Like [`send_recv`], with `prefix` written and flushed before the line.
pub async fn send_recv_with_prefix(
    host: &str,
    port: u16,
    prefix: Option<&[u8]>,
    payload: Option<&str>,
) -> Result<Vec<u8>, TransportError> {
    let mut stream = connect(host, port).await?;
    debug!("Connection open: {host}:{port}");
    let response = async {
        if let Some(prefix) = prefix {
            stream.write_all(prefix).await?;
            stream.flush().await?;
        }
        exchange(&mut stream, payload).await
    }
    .await;
    let _ = stream.shutdown().await;
    debug!("Connection closed: {host}:{port}");
    response.map_err(|source| TransportError::ExchangeFailed {
        address: format!("{host}:{port}"),
        source,
    })
}

pub async fn exchange<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    payload: Option<&str>,
) -> Result<Vec<u8>, io::Error> {
    match payload.filter(|payload| !payload.is_empty()) {
        Some(payload) => {
            stream.write_all(format!("{payload}\n").as_bytes()).await?;
            stream.flush().await?;
            info!("Sent: {payload}");
        }
        None => info!("Sent: (none)"),
    }

    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    let count = stream.read(&mut buf).await?;
    buf.truncate(count);
    if buf.is_empty() {
        info!("Recv: (none)");
    } else {
        info!("Recv: {}", String::from_utf8_lossy(&buf));
    }
    Ok(buf)
}

#[cfg(test)]
mod test {
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use super::{TransportError, RECV_BUFFER_SIZE};

    async fn serve_once(response: Vec<u8>) -> (u16, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            reader.get_mut().write_all(&response).await.unwrap();
            line
        });
        (port, server)
    }

    #[tokio::test]
    async fn send_recv_line() {
        let (port, server) = serve_once(b"OK".to_vec()).await;
        let response = super::send_recv("127.0.0.1", port, Some(r#"{"method":"remove"}"#))
            .await
            .unwrap();
        assert_eq!(response, b"OK");
        assert_eq!(server.await.unwrap(), "{\"method\":\"remove\"}\n");
    }

    #[tokio::test]
    async fn send_recv_truncates_to_single_read() {
        let (port, server) = serve_once(vec![b'x'; RECV_BUFFER_SIZE * 2]).await;
        let response = super::send_recv("127.0.0.1", port, Some("ping"))
            .await
            .unwrap();
        assert!(!response.is_empty());
        assert!(response.len() <= RECV_BUFFER_SIZE);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn prefix_precedes_line() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut prefix = [0u8; 4];
            stream.read_exact(&mut prefix).await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            reader.get_mut().write_all(b"echo").await.unwrap();
            (prefix, line)
        });

        let response =
            super::send_recv_with_prefix("127.0.0.1", port, Some(&[1, 2, 3, 4]), Some("hi"))
                .await
                .unwrap();

        assert_eq!(response, b"echo");
        assert_eq!(server.await.unwrap(), ([1, 2, 3, 4], String::from("hi\n")));
    }

    #[tokio::test]
    async fn prefix_without_payload() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut prefix = [0u8; 2];
            stream.read_exact(&mut prefix).await.unwrap();
            stream.write_all(b"welcome").await.unwrap();
            let mut rest = Vec::new();
            stream.read_to_end(&mut rest).await.unwrap();
            rest
        });

        let response = super::send_recv_with_prefix("127.0.0.1", port, Some(&[7, 7]), None)
            .await
            .unwrap();

        assert_eq!(response, b"welcome");
        assert!(server.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn exchange_without_payload_sends_nothing() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let peer = tokio::spawn(async move {
            server.write_all(b"hello").await.unwrap();
            let mut received = Vec::new();
            server.read_to_end(&mut received).await.unwrap();
            received
        });
        let response = super::exchange(&mut client, None).await.unwrap();
        assert_eq!(response, b"hello");
        drop(client);
        assert!(peer.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn exchange_empty_response() {
        let (mut client, server) = tokio::io::duplex(64);
        drop(server);
        assert!(matches!(super::exchange(&mut client, None).await, Ok(response) if response.is_empty()));
    }

    #[tokio::test]
    async fn connect_to_closed_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(matches!(
            super::send_recv("127.0.0.1", port, Some("ping")).await,
            Err(TransportError::ConnectionFailed { .. })
        ));
    }
}
