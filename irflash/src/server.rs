//! TCP upload server.
//!
//! A client connects and writes a complete hex file, then closes its side.
//! For every connection the server:
//!
//! 1. transmits the wake command so the target jumps into its bootloader,
//! 2. waits for the target to settle,
//! 3. reads and parses the hex stream until end of stream,
//! 4. transmits every non-erased page, pausing after each one,
//! 5. closes the connection.
//!
//! Connections are served strictly one at a time on a single background
//! thread, which also owns the transmitter. Nothing is sent back to the
//! client. A failed upload is logged and the server moves on to the next
//! connection; only a listener failure or [`ServerHandle::stop`] ends the
//! `Listening` state.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::host::local_ipv4_address;
use crate::image::hex::{FlashGeometry, LoadOptions, load_flash_pages};
use crate::protocol::frame::{FirmwareSender, FrameConfig, PAGE_WRITE_DELAY};
use crate::protocol::pulse::BIT_UNIT_US;
use crate::protocol::wake::{BOOT_COMMAND, WakeSignaler, WakeTiming};
use crate::transmit::{CARRIER_FREQUENCY_HZ, IrTransmitter};
use log::{debug, error, info, warn};
use std::fmt;
use std::io::{self, BufReader};
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default TCP port.
pub const DEFAULT_PORT: u16 = 12345;

/// Time the target needs to leave its main loop and start the bootloader.
pub const SETTLE_DELAY: Duration = Duration::from_millis(6000);

/// How often a pending accept re-checks for a stop request.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Externally visible server state.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(tag = "state", rename_all = "snake_case")
)]
pub enum ServerState {
    /// Not accepting connections.
    Stopped,
    /// Accepting connections.
    Listening {
        /// Address to give to upload clients (`"?"` if unknown).
        ip: String,
        /// Bound TCP port.
        port: u16,
    },
}

impl ServerState {
    /// Whether the server is accepting connections.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        matches!(self, Self::Listening { .. })
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "Stopped"),
            Self::Listening { ip, port } => write!(f, "Listening on {ip}:{port}"),
        }
    }
}

/// Full status snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServerStatus {
    /// Listener state.
    pub state: ServerState,
    /// Uploads that transmitted every page.
    pub completed_uploads: u64,
    /// Most recent upload or listener error.
    pub last_error: Option<String>,
}

impl Default for ServerStatus {
    fn default() -> Self {
        Self {
            state: ServerState::Stopped,
            completed_uploads: 0,
            last_error: None,
        }
    }
}

/// Status cell written by the server task and observed by anyone.
#[derive(Debug, Default)]
pub struct StateCell {
    status: Mutex<ServerStatus>,
    changed: Condvar,
}

impl StateCell {
    /// Current listener state.
    pub fn state(&self) -> ServerState {
        self.snapshot().state
    }

    /// Current full status.
    pub fn snapshot(&self) -> ServerStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Block until `pred` holds or `timeout` expires.
    ///
    /// Returns the matching snapshot, or `None` on timeout.
    pub fn wait_for<F>(&self, timeout: Duration, mut pred: F) -> Option<ServerStatus>
    where
        F: FnMut(&ServerStatus) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut status = self
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        loop {
            if pred(&status) {
                return Some(status.clone());
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            status = self
                .changed
                .wait_timeout(status, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn update<F: FnOnce(&mut ServerStatus)>(&self, f: F) {
        let mut status = self
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut status);
        self.changed.notify_all();
    }

    fn set_state(&self, state: ServerState) {
        self.update(|status| status.state = state);
    }
}

/// Events reported while serving a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadProgress {
    /// A client connected.
    Connected {
        /// Client address.
        peer: SocketAddr,
    },
    /// The wake command was transmitted.
    Woke,
    /// The hex stream was read and split into pages.
    Loaded {
        /// Pages to transmit.
        pages: usize,
    },
    /// One page was transmitted.
    PageSent {
        /// Pages sent so far.
        sent: usize,
        /// Pages in this upload.
        total: usize,
        /// Address of the page just sent.
        address: u32,
    },
    /// Every page was transmitted.
    Finished {
        /// Pages sent.
        pages: usize,
    },
    /// The upload was aborted.
    Failed {
        /// Why.
        reason: String,
    },
}

/// Progress observer.
pub type ProgressCallback = Box<dyn FnMut(&UploadProgress) + Send>;

/// Upload server settings.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Local address to bind.
    pub bind: IpAddr,
    /// TCP port (0 picks a free one).
    pub port: u16,
    /// Message that wakes the target's bootloader.
    pub wake_command: String,
    /// Wake message symbol timing.
    pub wake_timing: WakeTiming,
    /// Wait between wake command and first page.
    pub settle_delay: Duration,
    /// Wait after every page.
    pub page_delay: Duration,
    /// Target flash layout.
    pub geometry: FlashGeometry,
    /// Hex record checking.
    pub load_options: LoadOptions,
    /// Bootloader bit length in microseconds.
    pub bit_unit_us: u32,
    /// IR carrier frequency.
    pub frequency_hz: u32,
    /// Read timeout for a client's hex stream; `None` waits forever.
    pub client_timeout: Option<Duration>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            wake_command: BOOT_COMMAND.to_string(),
            wake_timing: WakeTiming::default(),
            settle_delay: SETTLE_DELAY,
            page_delay: PAGE_WRITE_DELAY,
            geometry: FlashGeometry::default(),
            load_options: LoadOptions::default(),
            bit_unit_us: BIT_UNIT_US,
            frequency_hz: CARRIER_FREQUENCY_HZ,
            client_timeout: None,
        }
    }
}

impl UploadConfig {
    /// Frame sender settings derived from this config.
    pub fn frame_config(&self) -> FrameConfig {
        FrameConfig {
            page_size: self.geometry.page_size,
            bit_unit_us: self.bit_unit_us,
            frequency_hz: self.frequency_hz,
            page_delay: self.page_delay,
        }
    }

    /// Wake signaler derived from this config.
    pub fn wake_signaler(&self) -> WakeSignaler {
        WakeSignaler::new(self.wake_timing).with_frequency(self.frequency_hz)
    }
}

/// Upload server, not yet running.
pub struct UploadServer {
    config: UploadConfig,
    transmitter: Box<dyn IrTransmitter>,
    progress: Option<ProgressCallback>,
}

impl UploadServer {
    /// Create a server that transmits through `transmitter`.
    pub fn new<T: IrTransmitter + 'static>(config: UploadConfig, transmitter: T) -> Self {
        Self {
            config,
            transmitter: Box::new(transmitter),
            progress: None,
        }
    }

    /// Report upload progress to `callback`.
    #[must_use]
    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&UploadProgress) + Send + 'static,
    {
        self.progress = Some(Box::new(callback));
        self
    }

    /// Bind the listener and start serving on a background thread.
    ///
    /// The state is `Listening` by the time this returns.
    pub fn start(self) -> Result<ServerHandle> {
        self.config.geometry.validate()?;

        let addr = SocketAddr::new(self.config.bind, self.config.port);
        let listener = TcpListener::bind(addr)
            .map_err(|e| Error::ListenerFailure(format!("bind {addr}: {e}")))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| Error::ListenerFailure(format!("configure listener: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::ListenerFailure(format!("query listener address: {e}")))?;

        let ip = if self.config.bind.is_unspecified() {
            local_ipv4_address()
        } else {
            self.config.bind.to_string()
        };

        let status = Arc::new(StateCell::default());
        let stopper = ServerStopper {
            cancel: CancelToken::new(),
            client: Arc::new(Mutex::new(None)),
            status: Arc::clone(&status),
        };

        info!("Upload server listening on {ip}:{}", local_addr.port());
        status.update(|s| {
            s.state = ServerState::Listening {
                ip,
                port: local_addr.port(),
            };
            s.last_error = None;
        });

        let worker = Worker {
            config: self.config,
            transmitter: self.transmitter,
            progress: self.progress,
            stopper: stopper.clone(),
        };
        let thread = match thread::Builder::new()
            .name("irflash-server".into())
            .spawn(move || worker.run(&listener))
        {
            Ok(thread) => thread,
            Err(e) => {
                status.set_state(ServerState::Stopped);
                return Err(Error::ListenerFailure(format!("spawn server thread: {e}")));
            },
        };

        Ok(ServerHandle {
            stopper,
            local_addr,
            thread: Some(thread),
        })
    }
}

/// Cloneable stop switch, e.g. for a signal handler.
#[derive(Clone)]
pub struct ServerStopper {
    cancel: CancelToken,
    client: Arc<Mutex<Option<TcpStream>>>,
    status: Arc<StateCell>,
}

impl ServerStopper {
    /// Stop accepting, interrupt any delay and drop the current client.
    ///
    /// A transfer in progress is left incomplete on the target.
    pub fn stop(&self) {
        self.cancel.cancel();
        if let Some(stream) = self
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.status.set_state(ServerState::Stopped);
    }
}

/// Handle to a running server.
pub struct ServerHandle {
    stopper: ServerStopper,
    local_addr: SocketAddr,
    thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Current listener state.
    pub fn state(&self) -> ServerState {
        self.stopper.status.state()
    }

    /// Shared status cell for observers.
    pub fn status(&self) -> Arc<StateCell> {
        Arc::clone(&self.stopper.status)
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A stop switch usable from other threads.
    pub fn stopper(&self) -> ServerStopper {
        self.stopper.clone()
    }

    /// Stop the server and wait for its thread to exit.
    pub fn stop(&mut self) {
        self.stopper.stop();
        self.join_thread();
        info!("Upload server stopped");
    }

    /// Block until the server stops by itself or via a [`ServerStopper`].
    pub fn wait(mut self) {
        self.join_thread();
    }

    fn join_thread(&mut self) {
        if let Some(thread) = self.thread.take() {
            // A panicking thread has already published Stopped
            let _ = thread.join();
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop();
        }
    }
}

/// Publishes `Stopped` when the server thread exits, including by panic.
struct StopOnExit(Arc<StateCell>);

impl Drop for StopOnExit {
    fn drop(&mut self) {
        let panicked = thread::panicking();
        if panicked {
            error!("Upload server thread panicked");
        }
        self.0.update(|s| {
            s.state = ServerState::Stopped;
            if panicked {
                s.last_error = Some("Upload server thread panicked".to_string());
            }
        });
    }
}

struct Worker {
    config: UploadConfig,
    transmitter: Box<dyn IrTransmitter>,
    progress: Option<ProgressCallback>,
    stopper: ServerStopper,
}

fn report(progress: &mut Option<ProgressCallback>, event: UploadProgress) {
    if let Some(callback) = progress {
        callback(&event);
    }
}

impl Worker {
    fn run(mut self, listener: &TcpListener) {
        let _guard = StopOnExit(Arc::clone(&self.stopper.status));
        let cancel = self.stopper.cancel.clone();

        while !cancel.is_cancelled() {
            match listener.accept() {
                Ok((stream, peer)) => self.serve(stream, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if cancel.sleep(ACCEPT_POLL_INTERVAL).is_err() {
                        break;
                    }
                },
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => {
                    let err = Error::ListenerFailure(format!("accept: {e}"));
                    error!("{err}");
                    self.stopper
                        .status
                        .update(|s| s.last_error = Some(err.to_string()));
                    break;
                },
            }
        }

        debug!("Server thread exiting");
    }

    fn serve(&mut self, stream: TcpStream, peer: SocketAddr) {
        info!("Client connected: {peer}");
        report(&mut self.progress, UploadProgress::Connected { peer });

        let result = self
            .register_client(&stream)
            .and_then(|()| self.upload(&stream))
            .map_err(Error::aborted);

        self.stopper
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let _ = stream.shutdown(Shutdown::Both);

        match result {
            Ok(pages) => {
                info!("Upload from {peer} finished: {pages} pages sent");
                self.stopper
                    .status
                    .update(|s| s.completed_uploads += 1);
                report(&mut self.progress, UploadProgress::Finished { pages });
            },
            Err(Error::Cancelled) => {
                warn!("Upload from {peer} cancelled by server stop");
                report(
                    &mut self.progress,
                    UploadProgress::Failed {
                        reason: Error::Cancelled.to_string(),
                    },
                );
            },
            Err(e) => {
                warn!("Upload from {peer} failed: {e}");
                self.stopper
                    .status
                    .update(|s| s.last_error = Some(e.to_string()));
                report(
                    &mut self.progress,
                    UploadProgress::Failed {
                        reason: e.to_string(),
                    },
                );
            },
        }
    }

    /// Make the client stream reachable from `stop()`.
    fn register_client(&self, stream: &TcpStream) -> Result<()> {
        // Accepted sockets may inherit the listener's non-blocking mode
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(self.config.client_timeout)?;

        let mut slot = self
            .stopper
            .client
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(stream.try_clone()?);
        drop(slot);

        self.stopper.cancel.check()
    }

    fn upload(&mut self, stream: &TcpStream) -> Result<usize> {
        let Self {
            config,
            transmitter,
            progress,
            stopper,
        } = self;
        let cancel = &stopper.cancel;

        config
            .wake_signaler()
            .send(transmitter.as_mut(), &config.wake_command)?;
        report(progress, UploadProgress::Woke);

        debug!("Waiting {:?} for the bootloader to start", config.settle_delay);
        cancel.sleep(config.settle_delay)?;

        let flash = load_flash_pages(BufReader::new(stream), config.geometry, config.load_options)?;
        cancel.check()?;
        info!("Image has {} non-empty pages", flash.len());
        report(progress, UploadProgress::Loaded { pages: flash.len() });

        FirmwareSender::with_config(transmitter.as_mut(), config.frame_config()).send_flash(
            &flash,
            cancel,
            |sent, total, address| {
                report(
                    progress,
                    UploadProgress::PageSent {
                        sent,
                        total,
                        address,
                    },
                );
            },
        )?;

        Ok(flash.len())
    }
}
