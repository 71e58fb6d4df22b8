//! Command channel: the line-oriented debug shell the pload command goes over.
//!
//! The Ember helper exposes the shell as a telnet service. Only what the
//! acquisition needs is implemented: send a line, and read whatever text is
//! there, answering option negotiation on the way.

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{self, Instant};
use tracing::{debug, trace};

use crate::error::PloadError;

/// Time without new bytes after which a response is considered complete
pub const QUIET_INTERVAL: Duration = Duration::from_millis(100);

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(100);

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SGA: u8 = 3;

/// A remote shell session
pub trait CommandChannel {
    /// Send one line of text
    fn write_line(&mut self, line: &str) -> impl Future<Output = io::Result<()>> + Send;

    /// Return the text currently available, possibly empty
    fn read_available(&mut self) -> impl Future<Output = io::Result<String>> + Send;
}

/// Strips telnet commands from received bytes and collects the replies owed
/// to the peer. Keeps state so a command split across reads is handled.
#[derive(Debug, Default)]
struct TelnetDecoder {
    state: DecodeState,
}

#[derive(Debug, Default, Clone, Copy)]
enum DecodeState {
    #[default]
    Data,
    Iac,
    Option(u8),
}

impl TelnetDecoder {
    fn decode(&mut self, input: &[u8], text: &mut Vec<u8>, replies: &mut Vec<u8>) {
        for &byte in input {
            self.state = match (self.state, byte) {
                (DecodeState::Data, IAC) => DecodeState::Iac,
                (DecodeState::Data, b) => {
                    text.push(b);
                    DecodeState::Data
                }
                (DecodeState::Iac, IAC) => {
                    text.push(IAC);
                    DecodeState::Data
                }
                (DecodeState::Iac, verb @ (DO | DONT | WILL | WONT)) => DecodeState::Option(verb),
                // two-byte commands (NOP, GA, ...) carry nothing we need
                (DecodeState::Iac, _) => DecodeState::Data,
                (DecodeState::Option(verb), option) => {
                    match verb {
                        DO => {
                            let answer = if option == SGA { WILL } else { WONT };
                            replies.extend_from_slice(&[IAC, answer, option]);
                        }
                        WILL => {
                            let answer = if option == SGA { DO } else { DONT };
                            replies.extend_from_slice(&[IAC, answer, option]);
                        }
                        _ => {}
                    }
                    DecodeState::Data
                }
            };
        }
    }
}

/// Minimal telnet client over any byte stream
pub struct TelnetChannel<S> {
    stream: S,
    decoder: TelnetDecoder,
    read_timeout: Duration,
}

impl TelnetChannel<TcpStream> {
    /// Connect to the helper's telnet port, retrying until `timeout` since
    /// the helper may still be starting up.
    pub async fn connect(
        endpoint: &str,
        timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, PloadError> {
        let deadline = Instant::now() + timeout;
        loop {
            match TcpStream::connect(endpoint).await {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    debug!("Connected to {}", endpoint);
                    return Ok(Self::new(stream, read_timeout));
                }
                Err(e) if Instant::now() + CONNECT_RETRY_INTERVAL < deadline => {
                    trace!("{} not reachable yet: {}", endpoint, e);
                    time::sleep(CONNECT_RETRY_INTERVAL).await;
                }
                Err(e) => {
                    debug!("Giving up on {}: {}", endpoint, e);
                    return Err(PloadError::GatewayUnreachable {
                        endpoint: endpoint.to_string(),
                        timeout,
                    });
                }
            }
        }
    }
}

impl<S> TelnetChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, read_timeout: Duration) -> Self {
        Self {
            stream,
            decoder: TelnetDecoder::default(),
            read_timeout,
        }
    }

    /// Reads one chunk, waiting at most `wait`. `None` on timeout or EOF.
    async fn read_chunk(&mut self, buf: &mut [u8], wait: Duration) -> io::Result<Option<usize>> {
        match time::timeout(wait, self.stream.read(buf)).await {
            Ok(Ok(0)) | Err(_) => Ok(None),
            Ok(Ok(n)) => Ok(Some(n)),
            Ok(Err(e)) => Err(e),
        }
    }
}

impl<S> CommandChannel for TelnetChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        // a &str never contains a bare 0xFF, so there is no IAC to escape
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');

        self.stream.write_all(&bytes).await?;
        self.stream.flush().await
    }

    async fn read_available(&mut self) -> io::Result<String> {
        let mut buf = [0u8; 1024];
        let mut text = Vec::new();
        let mut replies = Vec::new();

        let mut wait = self.read_timeout;
        while let Some(n) = self.read_chunk(&mut buf, wait).await? {
            self.decoder.decode(&buf[..n], &mut text, &mut replies);
            if !replies.is_empty() {
                self.stream.write_all(&replies).await?;
                self.stream.flush().await?;
                replies.clear();
            }
            wait = QUIET_INTERVAL;
        }

        Ok(String::from_utf8_lossy(&text).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(input: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut decoder = TelnetDecoder::default();
        let mut text = Vec::new();
        let mut replies = Vec::new();
        decoder.decode(input, &mut text, &mut replies);
        (text, replies)
    }

    #[test]
    fn test_plain_text_passes_through() {
        let (text, replies) = decode(b"Raw IRMS: 00999999\r\n");
        assert_eq!(text, b"Raw IRMS: 00999999\r\n");
        assert!(replies.is_empty());
    }

    #[test]
    fn test_negotiation_is_refused_except_sga() {
        let (text, replies) = decode(&[IAC, DO, 1, b'o', IAC, WILL, SGA, b'k', IAC, WILL, 1]);
        assert_eq!(text, b"ok");
        assert_eq!(replies, vec![IAC, WONT, 1, IAC, DO, SGA, IAC, DONT, 1]);

        let (_, replies) = decode(&[IAC, DO, SGA, IAC, DONT, 1, IAC, WONT, 1]);
        assert_eq!(replies, vec![IAC, WILL, SGA]);
    }

    #[test]
    fn test_escaped_iac_and_split_commands() {
        let mut decoder = TelnetDecoder::default();
        let mut text = Vec::new();
        let mut replies = Vec::new();
        decoder.decode(&[b'a', IAC], &mut text, &mut replies);
        decoder.decode(&[IAC, b'b', IAC], &mut text, &mut replies);
        decoder.decode(&[DO], &mut text, &mut replies);
        decoder.decode(&[24, b'c'], &mut text, &mut replies);
        assert_eq!(text, vec![b'a', IAC, b'b', b'c']);
        assert_eq!(replies, vec![IAC, WONT, 24]);
    }

    #[tokio::test]
    async fn test_write_line_and_read_available() {
        let (client, mut server) = tokio::io::duplex(4096);
        let mut channel = TelnetChannel::new(client, Duration::from_millis(500));

        channel.write_line("cu cs5480_pload").await.unwrap();
        let mut buf = [0u8; 16];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"cu cs5480_pload\n");

        server.write_all(&[IAC, DO, 1]).await.unwrap();
        server.write_all(b"Raw IRMS: 00999999\r\n").await.unwrap();
        let text = channel.read_available().await.unwrap();
        assert_eq!(text, "Raw IRMS: 00999999\r\n");

        let mut reply = [0u8; 3];
        server.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [IAC, WONT, 1]);
    }

    #[tokio::test]
    async fn test_read_available_gathers_late_chunks() {
        let (client, mut server) = tokio::io::duplex(4096);
        let mut channel = TelnetChannel::new(client, Duration::from_millis(500));

        let writer = tokio::spawn(async move {
            server.write_all(b"Raw IRMS: 00999999\r\n").await.unwrap();
            time::sleep(Duration::from_millis(20)).await;
            server.write_all(b"Raw VRMS: 00999999\r\n").await.unwrap();
            server
        });

        let text = channel.read_available().await.unwrap();
        assert_eq!(text, "Raw IRMS: 00999999\r\nRaw VRMS: 00999999\r\n");
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_read_available_times_out_empty() {
        let (client, _server) = tokio::io::duplex(64);
        let mut channel = TelnetChannel::new(client, Duration::from_millis(50));
        assert_eq!(channel.read_available().await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_connect_gives_up_when_nothing_listens() {
        // bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let endpoint = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = TelnetChannel::connect(
            &endpoint,
            Duration::from_millis(300),
            Duration::from_millis(50),
        )
        .await;
        assert!(matches!(result, Err(PloadError::GatewayUnreachable { .. })));
    }
}
