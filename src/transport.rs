use crate::error::{ConfigError, TransportError};
use serde::Deserialize;
use std::fmt;
use std::io::{self, ErrorKind, Write};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpStream, ToSocketAddrs, UdpSocket};
use std::time::Duration;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Connection-oriented byte stream.
    #[default]
    Tcp,
    /// One datagram per tick.
    Udp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportKind::Tcp => "tcp",
            TransportKind::Udp => "udp",
        })
    }
}

/// Destination for one tick's encoded bytes.
pub trait SampleSink {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;
}

/// Owns the outbound connection for the whole run.
#[derive(Debug)]
pub enum Transmitter {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

impl Transmitter {
    pub fn connect(
        kind: TransportKind,
        addr: &str,
        write_timeout: Option<Duration>,
    ) -> Result<Self, ConfigError> {
        let connect_err = |source: io::Error| ConfigError::Connect {
            addr: addr.to_string(),
            source,
        };
        let tx = match kind {
            TransportKind::Tcp => {
                let stream = TcpStream::connect(addr).map_err(connect_err)?;
                stream.set_write_timeout(write_timeout).map_err(connect_err)?;
                stream.set_nodelay(true).ok();
                Transmitter::Tcp(stream)
            }
            TransportKind::Udp => {
                let peer = resolve(addr).map_err(connect_err)?;
                let local = if peer.is_ipv4() {
                    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
                } else {
                    SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
                };
                let socket = UdpSocket::bind(local).map_err(connect_err)?;
                socket.connect(peer).map_err(connect_err)?;
                socket.set_write_timeout(write_timeout).map_err(connect_err)?;
                Transmitter::Udp(socket)
            }
        };
        tracing::info!(%addr, transport = %tx.kind(), ?write_timeout, "connected");
        Ok(tx)
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Transmitter::Tcp(_) => TransportKind::Tcp,
            Transmitter::Udp(_) => TransportKind::Udp,
        }
    }
}

impl SampleSink for Transmitter {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        match self {
            Transmitter::Tcp(stream) => write_tick(stream, bytes),
            Transmitter::Udp(socket) => send_datagram(socket, bytes),
        }
    }
}

fn resolve(addr: &str) -> io::Result<SocketAddr> {
    addr.to_socket_addrs()?.next().ok_or_else(|| {
        io::Error::new(ErrorKind::AddrNotAvailable, format!("no address for {addr}"))
    })
}

/// Writes one tick to a byte stream. Once part of a tick has gone out the
/// rest must follow, otherwise every later value would be misaligned.
pub fn write_tick<W: Write>(w: &mut W, bytes: &[u8]) -> Result<(), TransportError> {
    let mut written = 0usize;
    while written < bytes.len() {
        match w.write(&bytes[written..]) {
            Ok(0) => {
                return Err(TransportError::Fatal(io::Error::from(ErrorKind::WriteZero)));
            }
            Ok(k) => written += k,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(classify_stream_error(e, written)),
        }
    }
    Ok(())
}

fn classify_stream_error(e: io::Error, written: usize) -> TransportError {
    if written > 0 {
        let kind = e.kind();
        return TransportError::Fatal(io::Error::new(
            kind,
            format!("stream misaligned after partial write of {written} bytes: {e}"),
        ));
    }
    match e.kind() {
        ErrorKind::BrokenPipe
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::UnexpectedEof
        | ErrorKind::WriteZero => TransportError::Fatal(e),
        _ => TransportError::Transient(e),
    }
}

fn send_datagram(socket: &UdpSocket, bytes: &[u8]) -> Result<(), TransportError> {
    match socket.send(bytes) {
        Ok(k) if k == bytes.len() => Ok(()),
        Ok(k) => Err(TransportError::Transient(io::Error::new(
            ErrorKind::WriteZero,
            format!("short datagram: {k} of {} bytes", bytes.len()),
        ))),
        Err(e) => Err(TransportError::Transient(e)),
    }
}
