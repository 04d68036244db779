//! TCP output for actuators not driven by the DAC.
//!
//! ## Connection
//! Resolve the host, connect (optionally with a timeout), set
//! `TCP_NODELAY`, then send the optional prefix packet: a 4-byte
//! little-endian length followed by the prefix bytes.
//!
//! ## Frames
//! [`TcpSink::send_frame`] writes header and payload with vectored writes
//! and loops until every byte is out. There is no acknowledgement.

use std::io::{self, IoSlice, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use rtc_common::severity::{Classify, Severity};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::frame::{FrameHeader, HEADER_LEN, MAX_VALUES};

/// Socket errors. All are recoverable: the DAC keeps being driven.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Host name did not resolve.
    #[error("cannot resolve {host}:{port}: {reason}")]
    Resolve {
        /// Host as given.
        host: String,
        /// Port.
        port: u16,
        /// Resolver error.
        reason: String,
    },

    /// Every resolved address refused the connection.
    #[error("connect to {host}:{port} failed: {source}")]
    Connect {
        /// Host as given.
        host: String,
        /// Port.
        port: u16,
        /// Last connect error.
        #[source]
        source: io::Error,
    },

    /// Prefix packet could not be sent.
    #[error("prefix send failed: {0}")]
    Prefix(#[source] io::Error),

    /// Prefix longer than its 32-bit length word can describe.
    #[error("prefix of {len} bytes does not fit a 32-bit length")]
    PrefixTooLong {
        /// Prefix length in bytes.
        len: usize,
    },

    /// Frame send failed.
    #[error("frame send failed: {0}")]
    Send(#[source] io::Error),

    /// Peer stopped accepting bytes.
    #[error("connection closed by peer")]
    Closed,

    /// Too many values for the 16-bit count field.
    #[error("{count} values exceed the frame limit of {limit}", limit = MAX_VALUES)]
    TooMany {
        /// Requested values.
        count: usize,
    },
}

impl Classify for SinkError {
    fn severity(&self) -> Severity {
        Severity::Recoverable
    }
}

/// Write header then payload, retrying short writes until both are out.
pub fn write_frame<W: Write>(w: &mut W, header: &[u8; HEADER_LEN], payload: &[u8]) -> Result<(), SinkError> {
    let (mut h, mut p) = (0usize, 0usize);
    while h < header.len() || p < payload.len() {
        let bufs = [IoSlice::new(&header[h..]), IoSlice::new(&payload[p..])];
        match w.write_vectored(&bufs) {
            Ok(0) => return Err(SinkError::Closed),
            Ok(n) => {
                let from_header = n.min(header.len() - h);
                h += from_header;
                p += n - from_header;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(SinkError::Send(e)),
        }
    }
    Ok(())
}

/// Length word sent ahead of the prefix bytes.
fn prefix_header(len: usize) -> Result<[u8; 4], SinkError> {
    u32::try_from(len)
        .map(u32::to_le_bytes)
        .map_err(|_| SinkError::PrefixTooLong { len })
}

/// Connected actuator stream.
pub struct TcpSink {
    stream: TcpStream,
    peer: SocketAddr,
    frames: u64,
}

impl TcpSink {
    /// Connect to `host:port`.
    ///
    /// `timeout` bounds each connect attempt; `None` blocks. When `prefix`
    /// is given it is sent once, right after connecting.
    pub fn connect(
        host: &str,
        port: u16,
        timeout: Option<Duration>,
        prefix: Option<&[u8]>,
    ) -> Result<Self, SinkError> {
        let prefix = prefix
            .map(|p| prefix_header(p.len()).map(|len| (len, p)))
            .transpose()?;
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| SinkError::Resolve {
                host: host.to_string(),
                port,
                reason: e.to_string(),
            })?
            .collect();

        let mut last = io::Error::new(io::ErrorKind::NotFound, "no addresses");
        let mut stream = None;
        for addr in &addrs {
            let attempt = match timeout {
                Some(t) => TcpStream::connect_timeout(addr, t),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => {
                    debug!(%addr, "connect attempt failed: {e}");
                    last = e;
                }
            }
        }
        let Some(mut stream) = stream else {
            return Err(SinkError::Connect {
                host: host.to_string(),
                port,
                source: last,
            });
        };

        if let Err(e) = stream.set_nodelay(true) {
            warn!("TCP_NODELAY not set: {e}");
        }
        let peer = stream.peer_addr().map_err(SinkError::Send)?;

        if let Some((len, prefix)) = prefix {
            stream
                .write_all(&len)
                .and_then(|()| stream.write_all(prefix))
                .map_err(SinkError::Prefix)?;
        }

        info!(%peer, "actuator socket connected");
        Ok(Self {
            stream,
            peer,
            frames: 0,
        })
    }

    /// Send `payload` (encoded `u16` values) as frame `frame`.
    pub fn send_frame(&mut self, frame: u32, payload: &[u8]) -> Result<(), SinkError> {
        let count = payload.len() / size_of::<u16>();
        let header = FrameHeader::new(count, frame).ok_or(SinkError::TooMany { count })?;
        write_frame(&mut self.stream, &header.to_bytes(), payload)?;
        self.frames += 1;
        Ok(())
    }

    /// Remote address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Frames sent so far.
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    /// Accepts at most three bytes per call.
    struct Trickle(Vec<u8>);

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(3);
            self.0.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct Full;

    impl Write for Full {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn short_writes_are_resumed() {
        let header = FrameHeader::new(2, 9).unwrap().to_bytes();
        let mut w = Trickle(Vec::new());
        write_frame(&mut w, &header, &[1, 0, 2, 0]).unwrap();
        assert_eq!(w.0.len(), HEADER_LEN + 4);
        assert_eq!(&w.0[..HEADER_LEN], &header);
        assert_eq!(&w.0[HEADER_LEN..], &[1, 0, 2, 0]);
    }

    #[test]
    fn zero_write_is_closed() {
        let header = FrameHeader::new(0, 0).unwrap().to_bytes();
        assert!(matches!(write_frame(&mut Full, &header, &[]), Err(SinkError::Closed)));
    }

    #[test]
    fn prefix_then_frame() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let reader = std::thread::spawn(move || {
            let (mut s, _) = listener.accept().unwrap();
            let mut buf = vec![0u8; 4 + 3 + HEADER_LEN + 2];
            s.read_exact(&mut buf).unwrap();
            buf
        });

        let mut sink =
            TcpSink::connect("127.0.0.1", port, Some(Duration::from_secs(2)), Some(&b"dm0"[..])).unwrap();
        sink.send_frame(77, &[0x34, 0x12]).unwrap();
        assert_eq!(sink.frames(), 1);

        let buf = reader.join().unwrap();
        assert_eq!(&buf[..4], &3u32.to_le_bytes());
        assert_eq!(&buf[4..7], b"dm0");
        let header: [u8; HEADER_LEN] = buf[7..15].try_into().unwrap();
        assert_eq!(
            FrameHeader::parse(&header),
            Some(FrameHeader { count: 1, frame: 77 })
        );
        assert_eq!(&buf[15..], &[0x34, 0x12]);
    }

    #[test]
    fn prefix_length_word() {
        assert_eq!(prefix_header(3).unwrap(), [3, 0, 0, 0]);
        assert_eq!(prefix_header(u32::MAX as usize).unwrap(), [0xff; 4]);
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn oversized_prefix_is_refused() {
        let len = u32::MAX as usize + 1;
        assert!(matches!(
            prefix_header(len),
            Err(SinkError::PrefixTooLong { len: l }) if l == len
        ));
    }

    #[test]
    fn refused_connect_is_reported() {
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        assert!(matches!(
            TcpSink::connect("127.0.0.1", port, Some(Duration::from_millis(200)), None),
            Err(SinkError::Connect { .. })
        ));
    }
}
