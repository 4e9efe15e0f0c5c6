// Evmaprs Control Channel
// Rescan, reconfigure and shutdown requests from signals and the control socket

use std::io::{self, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::{UnixDatagram, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

/// Default location of the control socket
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/evmaprs.socket";

/// Largest datagram accepted on the control socket
const MAX_DATAGRAM: usize = 64 * 1024;

/// Errors of the control channel and its clients
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("control socket {path}: {source}")]
    Socket {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("control channel: {0}")]
    Io(#[from] io::Error),

    #[error("malformed control request: {0}")]
    Request(#[from] serde_json::Error),

    #[error("control channel closed")]
    Closed,
}

/// Requests understood by the daemon, as sent over the control socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum Request {
    /// Switch `device` to `file`, or back to its default configuration
    Config {
        device: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file: Option<String>,
    },
    List,
    Rescan,
    Shutdown,
}

/// Messages processed by the event loop between dispatch cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Rescan,
    Shutdown,
    Reconfigure { device: PathBuf, file: Option<String> },
    /// Send the handled device list back to this socket address
    List { reply_to: PathBuf },
}

impl ControlMessage {
    /// Translate a socket request; `sender` is where replies go.
    fn from_request(request: Request, sender: Option<&Path>) -> Option<Self> {
        match request {
            Request::Config { device, file } => Some(ControlMessage::Reconfigure { device, file }),
            Request::Rescan => Some(ControlMessage::Rescan),
            Request::Shutdown => Some(ControlMessage::Shutdown),
            Request::List => match sender {
                Some(path) => Some(ControlMessage::List {
                    reply_to: path.to_path_buf(),
                }),
                None => {
                    log::warn!("list request from an unbound socket, no way to reply");
                    None
                }
            },
        }
    }
}

/// Cloneable sending side of the control channel, usable from any thread.
#[derive(Clone)]
pub struct ControlHandle {
    sender: Sender<ControlMessage>,
    waker: Arc<UnixStream>,
}

impl ControlHandle {
    pub fn send(&self, message: ControlMessage) -> Result<(), ControlError> {
        self.sender.send(message).map_err(|_| ControlError::Closed)?;
        match (&*self.waker).write(&[1]) {
            Ok(_) => Ok(()),
            // A full pipe already guarantees a wakeup
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(ControlError::Io(e)),
        }
    }
}

/// Unix datagram socket accepting JSON requests. The socket file is
/// removed when this is dropped.
pub struct ControlSocket {
    socket: UnixDatagram,
    path: PathBuf,
}

impl ControlSocket {
    pub fn bind(path: impl Into<PathBuf>) -> Result<Self, ControlError> {
        let path = path.into();
        let fail = |source: io::Error| ControlError::Socket {
            path: path.clone(),
            source,
        };
        // A stale socket from a crashed daemon would make bind fail
        match std::fs::remove_file(&path) {
            Ok(()) => log::debug!("removed stale socket {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(fail(e)),
        }
        let socket = UnixDatagram::bind(&path).map_err(fail)?;
        socket.set_nonblocking(true).map_err(fail)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).map_err(fail)?;
        log::info!("listening on {}", path.display());
        Ok(Self { socket, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every pending request
    fn drain(&self, into: &mut Vec<ControlMessage>) -> Result<(), ControlError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, addr) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ControlError::Io(e)),
            };
            match serde_json::from_slice::<Request>(&buf[..len]) {
                Ok(request) => {
                    log::debug!("control request: {:?}", request);
                    into.extend(ControlMessage::from_request(request, addr.as_pathname()));
                }
                Err(e) => log::warn!("{}", ControlError::Request(e)),
            }
        }
    }

    pub fn reply(&self, to: &Path, payload: &[u8]) -> Result<(), ControlError> {
        self.socket.send_to(payload, to)?;
        Ok(())
    }
}

impl AsRawFd for ControlSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

impl Drop for ControlSocket {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            log::debug!("cannot remove {}: {}", self.path.display(), e);
        }
    }
}

/// Receiving side of the control channel, owned by the event loop.
///
/// In-process senders go through an mpsc queue plus a socket pair whose
/// readable end wakes poll(2); external clients use the optional socket.
pub struct ControlChannel {
    receiver: Receiver<ControlMessage>,
    wake: UnixStream,
    handle: ControlHandle,
    socket: Option<ControlSocket>,
}

impl ControlChannel {
    pub fn new() -> Result<Self, ControlError> {
        let (wake, waker) = UnixStream::pair()?;
        wake.set_nonblocking(true)?;
        waker.set_nonblocking(true)?;
        let (sender, receiver) = mpsc::channel();
        Ok(Self {
            receiver,
            wake,
            handle: ControlHandle {
                sender,
                waker: Arc::new(waker),
            },
            socket: None,
        })
    }

    /// Also accept requests on a control socket at `path`
    pub fn with_socket(mut self, path: impl Into<PathBuf>) -> Result<Self, ControlError> {
        self.socket = Some(ControlSocket::bind(path)?);
        Ok(self)
    }

    pub fn handle(&self) -> ControlHandle {
        self.handle.clone()
    }

    pub fn socket(&self) -> Option<&ControlSocket> {
        self.socket.as_ref()
    }

    /// Descriptors that become readable when a message is waiting
    pub fn raw_fds(&self) -> Vec<RawFd> {
        let mut fds = vec![self.wake.as_raw_fd()];
        fds.extend(self.socket.as_ref().map(AsRawFd::as_raw_fd));
        fds
    }

    /// Take every pending message, in-process ones first
    pub fn drain(&mut self) -> Result<Vec<ControlMessage>, ControlError> {
        let mut buf = [0u8; 64];
        loop {
            match self.wake.read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ControlError::Io(e)),
            }
        }

        let mut messages = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(message) => messages.push(message),
                Err(TryRecvError::Empty) => break,
                // The channel keeps its own handle, so this cannot happen
                Err(TryRecvError::Disconnected) => return Err(ControlError::Closed),
            }
        }
        if let Some(socket) = &self.socket {
            socket.drain(&mut messages)?;
        }
        Ok(messages)
    }
}

/// Thread translating process signals into control messages: SIGHUP
/// requests a rescan, SIGINT and SIGTERM a shutdown.
pub struct SignalBridge {
    handle: signal_hook::iterator::Handle,
    thread: Option<JoinHandle<()>>,
}

impl SignalBridge {
    pub fn spawn(control: ControlHandle) -> Result<Self, ControlError> {
        let mut signals = Signals::new([SIGHUP, SIGINT, SIGTERM])?;
        let handle = signals.handle();
        let thread = std::thread::Builder::new()
            .name("evmaprs-signals".into())
            .spawn(move || {
                for signal in signals.forever() {
                    let message = match signal {
                        SIGHUP => ControlMessage::Rescan,
                        _ => ControlMessage::Shutdown,
                    };
                    log::debug!("signal {} received", signal);
                    if control.send(message).is_err() {
                        break;
                    }
                }
            })?;
        Ok(Self {
            handle,
            thread: Some(thread),
        })
    }
}

impl Drop for SignalBridge {
    fn drop(&mut self) {
        self.handle.close();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Send one request to a running daemon.
pub fn send_request(socket: &Path, request: &Request) -> Result<(), ControlError> {
    let client = UnixDatagram::unbound()?;
    let payload = serde_json::to_vec(request)?;
    client
        .send_to(&payload, socket)
        .map_err(|source| ControlError::Socket {
            path: socket.to_path_buf(),
            source,
        })?;
    Ok(())
}

/// Send a request and wait for the daemon's reply.
pub fn query(socket: &Path, request: &Request, timeout: Duration) -> Result<Vec<u8>, ControlError> {
    // Replies need an address to go to
    let reply_path = std::env::temp_dir().join(format!("evmaprs-client.{}", std::process::id()));
    let _ = std::fs::remove_file(&reply_path);
    let client = UnixDatagram::bind(&reply_path)?;
    let result = (|| -> Result<Vec<u8>, ControlError> {
        client.set_read_timeout(Some(timeout))?;
        let payload = serde_json::to_vec(request)?;
        client
            .send_to(&payload, socket)
            .map_err(|source| ControlError::Socket {
                path: socket.to_path_buf(),
                source,
            })?;
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let len = client.recv(&mut buf)?;
        buf.truncate(len);
        Ok(buf)
    })();
    let _ = std::fs::remove_file(&reply_path);
    result
}
