use std::io::{self, ErrorKind};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{info, warn};

use super::{Channel, Publication, Subscription, TransportError};
use crate::config::ChannelSpec;
use crate::event::{EventCode, EventLog};

/// Stream id prefix carried by every datagram.
pub const STREAM_HEADER_LENGTH: usize = 4;
/// Largest datagram a subscription reads in one go.
pub const MAX_DATAGRAM_LENGTH: usize = 65536;
const SOCKET_BUFFER_SIZE: usize = 1024 * 1024;

fn resolve_endpoint(spec: &ChannelSpec, log: EventLog) -> Result<SocketAddr, TransportError> {
    let endpoint = match &spec.channel {
        Channel::Udp { endpoint } => endpoint,
        Channel::Ipc => return Err(TransportError::InvalidChannel(spec.channel.to_string())),
    };

    let resolved = endpoint.to_socket_addrs().and_then(|mut addrs| {
        addrs
            .next()
            .ok_or_else(|| io::Error::new(ErrorKind::NotFound, "no addresses"))
    });
    resolved.map_err(|source| {
        log.log(
            EventCode::CouldNotFindInterface,
            format_args!("could not resolve {}: {}", endpoint, source),
        );
        TransportError::AddressResolution {
            endpoint: endpoint.clone(),
            source,
        }
    })
}

fn new_socket(addr: &SocketAddr) -> io::Result<Socket> {
    Socket::new(Domain::for_address(*addr), Type::DGRAM, Some(Protocol::UDP))
}

fn encode_frame(frame: &mut Vec<u8>, stream_id: i32, payload: &[u8]) {
    frame.clear();
    frame.extend_from_slice(&stream_id.to_le_bytes());
    frame.extend_from_slice(payload);
}

/// Sends each offered message as one datagram to the channel endpoint.
#[derive(Debug)]
pub struct UdpPublication {
    socket: UdpSocket,
    endpoint: SocketAddr,
    stream_id: i32,
    frame: Vec<u8>,
    log: EventLog,
    closed: bool,
}

impl UdpPublication {
    pub fn open(spec: &ChannelSpec, log: EventLog) -> Result<Self, TransportError> {
        let endpoint = resolve_endpoint(spec, log)?;
        let socket = new_socket(&endpoint).map_err(TransportError::io("create publication socket"))?;

        if let Err(e) = socket.set_send_buffer_size(SOCKET_BUFFER_SIZE) {
            warn!("Failed to set send buffer for {}: {}", spec, e);
        }

        let local: IpAddr = if endpoint.is_ipv4() {
            Ipv4Addr::UNSPECIFIED.into()
        } else {
            Ipv6Addr::UNSPECIFIED.into()
        };
        socket
            .bind(&SocketAddr::new(local, 0).into())
            .map_err(TransportError::io("bind publication socket"))?;
        socket
            .connect(&endpoint.into())
            .map_err(TransportError::io("connect publication socket"))?;
        socket
            .set_nonblocking(true)
            .map_err(TransportError::io("set publication non-blocking"))?;

        log.log(
            EventCode::CmdInAddPublication,
            format_args!("publication {} -> {}", spec, endpoint),
        );
        info!("Publishing on {} (resolved {})", spec, endpoint);

        Ok(Self {
            socket: socket.into(),
            endpoint,
            stream_id: spec.stream_id,
            frame: Vec::with_capacity(MAX_DATAGRAM_LENGTH),
            log,
            closed: false,
        })
    }
}

impl Publication for UdpPublication {
    fn offer(&mut self, buffer: &[u8]) -> Result<bool, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        encode_frame(&mut self.frame, self.stream_id, buffer);

        match self.socket.send(&self.frame) {
            Ok(sent) if sent == self.frame.len() => {
                self.log.log(
                    EventCode::FrameOut,
                    format_args!("{} bytes to {} stream {}", sent, self.endpoint, self.stream_id),
                );
                Ok(true)
            }
            Ok(_) => Ok(false),
            // nobody bound on the far side yet counts as not connected
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::Interrupted | ErrorKind::ConnectionRefused
                ) =>
            {
                Ok(false)
            }
            Err(e) => {
                self.log.log(
                    EventCode::Exception,
                    format_args!("send to {} failed: {}", self.endpoint, e),
                );
                Err(TransportError::Io {
                    context: "send datagram",
                    source: e,
                })
            }
        }
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            self.closed = true;
            self.log.log(
                EventCode::RemovePublicationCleanup,
                format_args!("publication to {} stream {}", self.endpoint, self.stream_id),
            );
        }
        Ok(())
    }
}

/// Binds the channel endpoint and delivers datagrams carrying its stream id.
#[derive(Debug)]
pub struct UdpSubscription {
    socket: UdpSocket,
    endpoint: SocketAddr,
    stream_id: i32,
    buffer: Box<[u8]>,
    log: EventLog,
    closed: bool,
}

impl UdpSubscription {
    pub fn open(spec: &ChannelSpec, log: EventLog) -> Result<Self, TransportError> {
        let endpoint = resolve_endpoint(spec, log)?;
        let socket = new_socket(&endpoint).map_err(TransportError::io("create subscription socket"))?;

        socket
            .set_reuse_address(true)
            .map_err(TransportError::io("set SO_REUSEADDR"))?;
        if let Err(e) = socket.set_recv_buffer_size(SOCKET_BUFFER_SIZE) {
            warn!("Failed to set large receive buffer for {}: {}", spec, e);
        }
        socket
            .bind(&endpoint.into())
            .map_err(TransportError::io("bind subscription socket"))?;
        socket
            .set_nonblocking(true)
            .map_err(TransportError::io("set subscription non-blocking"))?;

        log.log(
            EventCode::CmdInAddSubscription,
            format_args!("subscription {} bound to {}", spec, endpoint),
        );
        info!("Subscribed to {} (bound {})", spec, endpoint);

        Ok(Self {
            socket: socket.into(),
            endpoint,
            stream_id: spec.stream_id,
            buffer: vec![0u8; MAX_DATAGRAM_LENGTH].into_boxed_slice(),
            log,
            closed: false,
        })
    }
}

impl Subscription for UdpSubscription {
    fn poll<F>(&mut self, fragment_limit: usize, mut handler: F) -> Result<usize, TransportError>
    where
        F: FnMut(&[u8]),
    {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let log = self.log;
        let mut fragments = 0;

        while fragments < fragment_limit {
            let length = match self.socket.recv(&mut self.buffer) {
                Ok(length) => length,
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::WouldBlock | ErrorKind::Interrupted | ErrorKind::ConnectionReset
                    ) =>
                {
                    break;
                }
                Err(e) => {
                    log.log(
                        EventCode::Exception,
                        format_args!("receive on {} failed: {}", self.endpoint, e),
                    );
                    return Err(TransportError::Io {
                        context: "receive datagram",
                        source: e,
                    });
                }
            };

            let Some((header, payload)) = self.buffer[..length].split_first_chunk::<STREAM_HEADER_LENGTH>() else {
                log.log(
                    EventCode::MalformedFrameLength,
                    format_args!("{} byte datagram on {}", length, self.endpoint),
                );
                continue;
            };
            let stream_id = i32::from_le_bytes(*header);
            if stream_id != self.stream_id {
                log.log(
                    EventCode::UnknownHeaderType,
                    format_args!(
                        "stream {} on {} (subscribed to {})",
                        stream_id, self.endpoint, self.stream_id
                    ),
                );
                continue;
            }

            log.log(
                EventCode::FrameIn,
                format_args!("{} bytes on {} stream {}", length, self.endpoint, stream_id),
            );
            handler(payload);
            fragments += 1;
        }

        Ok(fragments)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            self.closed = true;
            self.log.log(
                EventCode::RemoveSubscriptionCleanup,
                format_args!("subscription on {} stream {}", self.endpoint, self.stream_id),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn spec(port: u16, stream_id: i32) -> ChannelSpec {
        ChannelSpec::new(&format!("udp://127.0.0.1:{}", port), stream_id).unwrap()
    }

    fn poll_until<S: Subscription>(subscription: &mut S, want: usize) -> Vec<Vec<u8>> {
        let mut received = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while received.len() < want && Instant::now() < deadline {
            subscription
                .poll(10, |fragment| received.push(fragment.to_vec()))
                .unwrap();
        }
        received
    }

    #[test]
    fn test_datagram_round_trip() {
        let mut subscription = UdpSubscription::open(&spec(46201, 7), EventLog::disabled()).unwrap();
        let mut publication = UdpPublication::open(&spec(46201, 7), EventLog::disabled()).unwrap();

        while !publication.offer(b"hello pong").unwrap() {}
        let received = poll_until(&mut subscription, 1);

        assert_eq!(received, vec![b"hello pong".to_vec()]);
    }

    #[test]
    fn test_other_streams_are_dropped() {
        let mut subscription = UdpSubscription::open(&spec(46202, 1), EventLog::disabled()).unwrap();
        let mut stranger = UdpPublication::open(&spec(46202, 2), EventLog::disabled()).unwrap();
        let mut friend = UdpPublication::open(&spec(46202, 1), EventLog::disabled()).unwrap();

        while !stranger.offer(b"ignored").unwrap() {}
        while !friend.offer(b"kept").unwrap() {}
        let received = poll_until(&mut subscription, 1);

        assert_eq!(received, vec![b"kept".to_vec()]);
    }

    #[test]
    fn test_closed_handles_fail() {
        let mut subscription = UdpSubscription::open(&spec(46203, 1), EventLog::disabled()).unwrap();
        let mut publication = UdpPublication::open(&spec(46203, 1), EventLog::disabled()).unwrap();
        publication.close().unwrap();
        subscription.close().unwrap();

        assert!(matches!(publication.offer(b"x"), Err(TransportError::Closed)));
        assert!(matches!(subscription.poll(1, |_| {}), Err(TransportError::Closed)));
    }

    #[test]
    fn test_encode_frame_prefixes_stream_id() {
        let mut frame = Vec::new();
        encode_frame(&mut frame, 0x0A0B0C0D, b"ab");
        assert_eq!(frame, vec![0x0D, 0x0C, 0x0B, 0x0A, b'a', b'b']);
    }
}
