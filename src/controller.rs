use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::broadcast::{Broadcaster, Dispatch, UdpTransport};
use crate::error::{BrainError, GraphError};
use crate::inbound::Inbound;
use crate::score::ScoreSource;
use crate::session::{Session, SessionConfig, SessionSnapshot};
use crate::settings::Settings;
use crate::visualization::{self, VisualizationHub};

/// Largest datagram we accept.
const MAX_DATAGRAM: usize = 65_536;

enum Command {
    Reset,
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown,
}

/// The session controller: owns the socket, the session and every transport.
pub struct Controller {
    settings: Settings,
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    source: Box<dyn ScoreSource>,
    session: Session,
    broadcaster: Broadcaster,
    visualization: Option<(TcpListener, VisualizationHub)>,
    hub: Option<VisualizationHub>,
    visualization_addr: Option<SocketAddr>,
    // Produced by the initial reset, sent once the loop starts.
    pending: Vec<Dispatch>,
}

impl Controller {
    /// Bind every socket and enter the score's start node.
    pub async fn bind(
        settings: Settings,
        source: impl ScoreSource + 'static,
    ) -> Result<Self, BrainError> {
        settings.validate()?;

        let socket = Arc::new(UdpSocket::bind(settings.udp_addr()).await?);
        let local_addr = socket.local_addr()?;
        log::info!("Listening for participants on {local_addr}");

        let mut broadcaster = Broadcaster::new().with(UdpTransport::new(
            socket.clone(),
            settings.participant_port,
        ));

        let (visualization, visualization_addr) = match settings.visualization_addr() {
            Some(addr) => {
                let listener = TcpListener::bind(addr).await?;
                let bound = listener.local_addr()?;
                log::info!("Serving visualization clients on ws://{bound}");
                let hub = VisualizationHub::new();
                broadcaster = broadcaster.with(hub.clone());
                (Some((listener, hub)), Some(bound))
            }
            None => (None, None),
        };

        let hub = visualization.as_ref().map(|(_, hub)| hub.clone());
        let mut session = Session::new(SessionConfig::from(&settings));
        let pending = session.reset(&source, Instant::now())?;

        Ok(Self {
            settings,
            socket,
            local_addr,
            source: Box::new(source),
            session,
            broadcaster,
            visualization,
            hub,
            visualization_addr,
            pending,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn visualization_addr(&self) -> Option<SocketAddr> {
        self.visualization_addr
    }

    /// Run the controller on its own task.
    pub fn spawn(self) -> ControllerHandle {
        let (tx, rx) = mpsc::channel(16);
        let local_addr = self.local_addr;
        let visualization_addr = self.visualization_addr;
        let task = tokio::spawn(self.run(rx));
        ControllerHandle {
            tx,
            local_addr,
            visualization_addr,
            task,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> Result<(), BrainError> {
        let viz_task = self
            .visualization
            .take()
            .map(|(listener, hub)| tokio::spawn(visualization::serve(listener, hub)));

        let pending = std::mem::take(&mut self.pending);
        self.publish(&pending).await;

        let period = self.settings.analysis_interval();
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let socket = self.socket.clone();
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            let deadline = self.session.pulse_deadline();
            tokio::select! {
                received = socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, from)) => self.handle_datagram(&buf[..len], from).await,
                        // ICMP errors from earlier sends can surface here; keep going.
                        Err(e) => log::warn!("udp receive failed: {e}"),
                    }
                }
                _ = ticker.tick() => self.analyse().await,
                _ = async {
                    match deadline {
                        Some(at) => time::sleep_until(at).await,
                        None => std::future::pending().await,
                    }
                } => {
                    let out = self.session.fire_pulse(Instant::now());
                    self.publish(&out).await;
                }
                command = commands.recv() => match command {
                    Some(Command::Reset) => self.reset().await,
                    Some(Command::Snapshot(reply)) => {
                        let _ = reply.send(self.session.snapshot());
                    }
                    Some(Command::Shutdown) | None => break,
                }
            }
        }

        self.session.halt();
        if let Some(task) = viz_task {
            task.abort();
        }
        log::info!("Controller stopped");
        Ok(())
    }

    async fn handle_datagram(&mut self, bytes: &[u8], from: SocketAddr) {
        let message = match osc::decode(bytes) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("malformed datagram from {from}: {e}");
                return;
            }
        };

        let mut out = Vec::new();
        if let Some(id) = Inbound::sender(&message) {
            out.extend(self.session.learn(id, from));
        }

        match Inbound::classify(&message) {
            Ok(Inbound::Sample {
                participant,
                parameter,
                subchannel,
                value,
            }) => match self.session.record(&participant, &parameter, &subchannel, value) {
                Ok(echo) => out.extend(echo),
                Err(e) => log::warn!("{} from {from}: {e}", message.address),
            },
            Ok(Inbound::Reset) => {
                self.publish(&out).await;
                self.reset().await;
                return;
            }
            Err(e) => log::warn!("{} from {from}: {e}", message.address),
        }

        self.publish(&out).await;
    }

    async fn analyse(&mut self) {
        let out = self.session.analyse();
        self.publish(&out).await;
        match self.session.advance(Instant::now()) {
            Ok(out) => self.publish(&out).await,
            Err(e) => self.halt(e),
        }
    }

    async fn reset(&mut self) {
        log::info!("Reset session");
        if let Some(hub) = &self.hub {
            hub.clear_retained();
        }
        match self.session.reset(self.source.as_ref(), Instant::now()) {
            Ok(out) => self.publish(&out).await,
            Err(e) => self.halt(e),
        }
    }

    fn halt(&mut self, error: GraphError) {
        log::error!("{error}; halting until the next reset");
        self.session.halt();
        if let Some(hub) = &self.hub {
            hub.clear_retained();
        }
    }

    async fn publish(&self, dispatches: &[Dispatch]) {
        if dispatches.is_empty() {
            return;
        }
        let endpoints = self.session.endpoints();
        self.broadcaster.send_all(dispatches, &endpoints).await;
    }
}

/// Talks to a running [`Controller`].
pub struct ControllerHandle {
    tx: mpsc::Sender<Command>,
    local_addr: SocketAddr,
    visualization_addr: Option<SocketAddr>,
    task: JoinHandle<Result<(), BrainError>>,
}

impl ControllerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn visualization_addr(&self) -> Option<SocketAddr> {
        self.visualization_addr
    }

    /// Same as a `brain/reset` message.
    pub async fn reset(&self) {
        let _ = self.tx.send(Command::Reset).await;
    }

    /// Current session state, or `None` once the controller has stopped.
    pub async fn snapshot(&self) -> Option<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Command::Snapshot(reply)).await.ok()?;
        rx.await.ok()
    }

    /// Stop the controller and wait for it to finish.
    pub async fn shutdown(self) -> Result<(), BrainError> {
        let _ = self.tx.send(Command::Shutdown).await;
        self.task.await?
    }
}
