use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use osc::{Framing, OscArg, OscMessage};
use tokio::net::UdpSocket;

use crate::error::TransportError;
use crate::signal::{Parameter, Subchannel};

pub const SYSTEM_ADDRESS_ROOT: &str = "brain";
pub const CHANNEL_IN: &str = "in";
pub const CHANNEL_OUT: &str = "out";

/// A structured event before it is framed for a particular transport.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEvent {
    pub path: Vec<String>,
    pub value: Option<OscArg>,
}

impl OutboundEvent {
    pub fn new<S: AsRef<str>>(path: &[S], value: Option<OscArg>) -> Self {
        Self {
            path: path.iter().map(|s| s.as_ref().to_string()).collect(),
            value,
        }
    }

    fn system(name: &str, value: Option<OscArg>) -> Self {
        Self::new(&[SYSTEM_ADDRESS_ROOT, name], value)
    }

    pub fn node(id: &str) -> Self {
        Self::system("node", Some(OscArg::from(id)))
    }

    pub fn density(density: f64) -> Self {
        Self::system("density", Some(OscArg::Float(density as f32)))
    }

    pub fn trigger() -> Self {
        Self::system("trigger", None)
    }

    pub fn onset(participant: &str) -> Self {
        Self::system("onset", Some(OscArg::from(participant)))
    }

    /// `{id}/out/{parameter}/{subchannel}` carrying the sample just received.
    pub fn echo(participant: &str, parameter: Parameter, subchannel: Subchannel, value: f64) -> Self {
        Self::new(
            &[participant, CHANNEL_OUT, parameter.as_str(), subchannel.as_str()],
            Some(OscArg::Float(value as f32)),
        )
    }

    pub fn address(&self, framing: Framing) -> String {
        framing.join(self.path.as_slice())
    }

    pub fn to_message(&self, framing: Framing) -> OscMessage {
        OscMessage::new(self.address(framing), self.value.iter().cloned().collect())
    }

    pub fn encode(&self, framing: Framing) -> Result<Vec<u8>, TransportError> {
        osc::encode(&self.to_message(framing)).map_err(TransportError::Encode)
    }
}

/// Who an event is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Every participant with a known endpoint and every visualization client.
    Everyone,
    /// One participant device only.
    Participant(SocketAddr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    pub event: OutboundEvent,
    pub audience: Audience,
}

impl Dispatch {
    pub fn everyone(event: OutboundEvent) -> Self {
        Self {
            event,
            audience: Audience::Everyone,
        }
    }

    pub fn to(endpoint: SocketAddr, event: OutboundEvent) -> Self {
        Self {
            event,
            audience: Audience::Participant(endpoint),
        }
    }
}

/// One way of reaching recipients. Each transport frames the event its own way
/// and reports failures per recipient instead of giving up.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    /// `participants` are the learned participant endpoints at send time.
    async fn deliver(&self, dispatch: &Dispatch, participants: &[SocketAddr]) -> Delivery;
}

#[derive(Debug, Default)]
pub struct Delivery {
    pub sent: usize,
    pub failures: Vec<TransportError>,
}

impl Delivery {
    fn merge(&mut self, other: Delivery) {
        self.sent += other.sent;
        self.failures.extend(other.failures);
    }
}

/// Sends to participant devices over the controller's UDP socket.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    /// Port participants listen on. 0 replies to the port they sent from.
    participant_port: u16,
}

impl UdpTransport {
    pub fn new(socket: Arc<UdpSocket>, participant_port: u16) -> Self {
        Self {
            socket,
            participant_port,
        }
    }

    fn target(&self, endpoint: SocketAddr) -> SocketAddr {
        if self.participant_port == 0 {
            endpoint
        } else {
            SocketAddr::new(endpoint.ip(), self.participant_port)
        }
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn name(&self) -> &'static str {
        "udp"
    }

    async fn deliver(&self, dispatch: &Dispatch, participants: &[SocketAddr]) -> Delivery {
        let mut delivery = Delivery::default();
        let packet = match dispatch.event.encode(Framing::Relative) {
            Ok(p) => p,
            Err(e) => {
                delivery.failures.push(e);
                return delivery;
            }
        };

        let targets: Vec<SocketAddr> = match &dispatch.audience {
            Audience::Everyone => participants.iter().map(|p| self.target(*p)).collect(),
            Audience::Participant(endpoint) => vec![self.target(*endpoint)],
        };

        for peer in targets {
            match self.socket.send_to(&packet, peer).await {
                Ok(_) => delivery.sent += 1,
                Err(source) => delivery.failures.push(TransportError::Udp { peer, source }),
            }
        }
        delivery
    }
}

/// Fans every dispatch out over all transports.
#[derive(Default)]
pub struct Broadcaster {
    transports: Vec<Box<dyn Transport>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, transport: impl Transport + 'static) -> Self {
        self.transports.push(Box::new(transport));
        self
    }

    pub async fn send(&self, dispatch: &Dispatch, participants: &[SocketAddr]) -> Delivery {
        let mut total = Delivery::default();
        for transport in &self.transports {
            let delivery = transport.deliver(dispatch, participants).await;
            for failure in &delivery.failures {
                log::warn!(
                    "{} {}: {failure}",
                    transport.name(),
                    dispatch.event.address(Framing::Relative)
                );
            }
            total.merge(delivery);
        }
        total
    }

    pub async fn send_all(&self, dispatches: &[Dispatch], participants: &[SocketAddr]) {
        for dispatch in dispatches {
            self.send(dispatch, participants).await;
        }
    }
}
