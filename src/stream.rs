//! Live image streaming session.
//!
//! `DeviceSession` sequences control calls to open the camera's raw byte
//! stream, requests images on it, and restores the device on teardown.
//!
//! States: `Idle -> Starting -> Streaming -> Stopping -> Idle`.
//!
//! - Start: reserve the stream port, switch the working mode on, remember
//!   the active program (once per control session), select the live-image
//!   program and open the byte stream.
//! - Acquire: send one command string, then read and decode one frame per
//!   requested image in request order.
//! - Stop: restore the remembered program, send the quit token and close the
//!   byte stream. Stop always ends in `Idle`.
//!
//! Frame reads are bounded by a per-frame deadline; a stalled connection
//! surfaces as [`O3dError::IncompleteFrame`] instead of blocking forever.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use crate::control::{ControlChannel, DeviceInfo, RpcTransport, WorkingMode};
use crate::error::{IncompleteReason, O3dError, Result};
use crate::frame::{DecodedImage, ImageKind, FRAME_BYTES};

/// Program id reserved for live image streaming.
pub const LIVE_IMAGE_PROGRAM: i32 = 7;

/// Token that ends a byte-stream session.
pub const QUIT_TOKEN: &[u8] = b"q";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of the byte stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Starting,
    Streaming,
    Stopping,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Streaming => "streaming",
            SessionState::Stopping => "stopping",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Addresses and timeouts for a session.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Camera address; the byte stream connects here.
    pub device_addr: IpAddr,
    /// Address this host advertises on connect/disconnect.
    pub client_addr: String,
    pub connect_timeout: Duration,
    /// Upper bound for accumulating one frame.
    pub frame_timeout: Duration,
}

impl SessionOptions {
    pub fn new(device_addr: IpAddr, client_addr: impl Into<String>) -> Self {
        Self {
            device_addr,
            client_addr: client_addr.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            frame_timeout: DEFAULT_FRAME_TIMEOUT,
        }
    }
}

/// Counters for a session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_received: u64,
    /// Completed acquire calls.
    pub acquisitions: u64,
    /// Successful transitions into `Streaming`.
    pub starts: u64,
}

/// What a stop call did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Program that restoration targeted, if one was remembered.
    pub restored_program: Option<i32>,
    /// Status of the restore call; `Some(0)` on success.
    pub restore_status: Option<i32>,
    /// The quit token went out before the connection closed.
    pub quit_sent: bool,
}

/// Build the command string for a list of images.
///
/// One letter per image in request order. Synchronized transfer uppercases
/// the first letter only.
pub fn encode_command(kinds: &[ImageKind], synchronized: bool) -> Result<String> {
    let mut letters = kinds.iter().map(|kind| kind.code());
    let first = letters.next().ok_or(O3dError::EmptyRequest)?;
    let mut command = String::with_capacity(kinds.len());
    command.push(if synchronized {
        first.to_ascii_uppercase()
    } else {
        first
    });
    command.extend(letters);
    Ok(command)
}

/// Fill `buf` completely from `reader`.
///
/// Short reads are retried against the remaining byte count. A read of zero
/// bytes means the peer closed; a read timeout or an expired `deadline`
/// ends the attempt. Both surface as [`O3dError::IncompleteFrame`].
pub fn read_frame<R: Read>(reader: &mut R, buf: &mut [u8], deadline: Duration) -> Result<()> {
    let started = Instant::now();
    let expected = buf.len();
    let mut received = 0;
    let incomplete = |received, reason| O3dError::IncompleteFrame {
        received,
        expected,
        reason,
    };

    while received < expected {
        if started.elapsed() > deadline {
            return Err(incomplete(received, IncompleteReason::TimedOut));
        }
        match reader.read(&mut buf[received..]) {
            Ok(0) => return Err(incomplete(received, IncompleteReason::Closed)),
            Ok(n) => received += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                return Err(incomplete(received, IncompleteReason::TimedOut));
            }
            Err(e) => return Err(O3dError::Io(e)),
        }
    }
    Ok(())
}

/// Control and streaming session with one camera.
///
/// Not thread-safe; callers serialize access. Dropping a streaming session
/// runs the stop sequence.
pub struct DeviceSession<T: RpcTransport> {
    control: ControlChannel<T>,
    options: SessionOptions,
    state: SessionState,
    active_program: Option<i32>,
    restore_program: Option<i32>,
    connection: Option<TcpStream>,
    stats: SessionStats,
}

impl<T: RpcTransport> DeviceSession<T> {
    pub fn new(transport: T, options: SessionOptions) -> Self {
        let control = ControlChannel::new(transport, options.client_addr.clone());
        Self {
            control,
            options,
            state: SessionState::Idle,
            active_program: None,
            restore_program: None,
            connection: None,
            stats: SessionStats::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_streaming(&self) -> bool {
        self.state == SessionState::Streaming
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.clone()
    }

    /// Program the device was running when the session took over.
    pub fn remembered_program(&self) -> Option<i32> {
        self.restore_program
    }

    /// Program the session last switched the device to.
    pub fn active_program(&self) -> Option<i32> {
        self.active_program
    }

    /// Direct access to the control calls, e.g. for imager settings.
    ///
    /// Working mode and program are owned by the session while streaming;
    /// changing them here bypasses restoration.
    pub fn control(&mut self) -> &mut ControlChannel<T> {
        &mut self.control
    }

    pub fn connect(&mut self) -> Result<DeviceInfo> {
        self.control.connect()
    }

    /// Stop streaming if needed, then close the control session.
    pub fn disconnect(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            self.stop_live_image_server();
        }
        self.restore_program = None;
        self.active_program = None;
        self.control.disconnect().map_err(|err| {
            log::warn!("disconnect failed: {}", err);
            err
        })
    }

    /// Open the live image stream. Connects the control channel first if
    /// this session has not connected yet.
    pub fn start_live_image_server(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(O3dError::InvalidState {
                operation: "start",
                state: self.state.as_str(),
            });
        }
        self.state = SessionState::Starting;
        match self.start_inner() {
            Ok(stream) => {
                self.connection = Some(stream);
                self.state = SessionState::Streaming;
                self.stats.starts += 1;
                log::info!("live image stream open");
                Ok(())
            }
            Err(err) => {
                self.state = SessionState::Idle;
                log::warn!("start failed: {}", err);
                Err(err)
            }
        }
    }

    fn start_inner(&mut self) -> Result<TcpStream> {
        if !self.control.is_connected() {
            self.control.connect()?;
        }

        let port = self.control.stream_port().map_err(|err| match err {
            O3dError::Rpc { code, .. } => O3dError::PortUnavailable { code },
            other => other,
        })?;

        let ack = self.control.set_working_mode(WorkingMode::On)?;
        if ack.is_quirk_suspect() {
            log::debug!(
                "working mode status {} ignored (known firmware misreport)",
                ack.status
            );
        } else if !ack.should_treat_as_success() {
            log::warn!("working mode reported status {}; continuing", ack.status);
        }

        if self.restore_program.is_none() {
            match self.control.program() {
                Ok(program) => {
                    log::debug!("remembering program {}", program);
                    self.restore_program = Some(program);
                }
                Err(err) => log::warn!("could not read active program: {}", err),
            }
        }

        match self.control.set_program(LIVE_IMAGE_PROGRAM) {
            Ok(()) => self.active_program = Some(LIVE_IMAGE_PROGRAM),
            Err(err) => log::warn!("could not select live image program: {}", err),
        }

        let addr = SocketAddr::new(self.options.device_addr, port);
        match open_stream(addr, &self.options) {
            Ok(stream) => Ok(stream),
            Err(err) => {
                self.restore_best_effort();
                Err(err)
            }
        }
    }

    /// Request images and decode one frame per entry of `kinds`, in order.
    ///
    /// On failure the session stays `Streaming`; the caller may retry or stop.
    pub fn acquire(&mut self, kinds: &[ImageKind], synchronized: bool) -> Result<Vec<DecodedImage>> {
        let command = encode_command(kinds, synchronized)?;
        let frame_timeout = self.options.frame_timeout;
        let stream = match (self.state, self.connection.as_mut()) {
            (SessionState::Streaming, Some(stream)) => stream,
            _ => {
                return Err(O3dError::InvalidState {
                    operation: "acquire",
                    state: self.state.as_str(),
                })
            }
        };

        stream.write_all(command.as_bytes())?;
        stream.flush()?;
        log::debug!("sent image request {:?}", command);

        let mut buf = vec![0u8; FRAME_BYTES];
        let mut images = Vec::with_capacity(kinds.len());
        for &kind in kinds {
            read_frame(stream, &mut buf, frame_timeout)?;
            let image = DecodedImage::decode(kind, &buf)?;
            log::debug!(
                "{} frame: min {} max {} unambiguous range {}",
                kind,
                image.min,
                image.max,
                image.unambiguous_range()
            );
            self.stats.frames_received += 1;
            images.push(image);
        }
        self.stats.acquisitions += 1;
        Ok(images)
    }

    /// Close the live image stream and restore the remembered program.
    ///
    /// Best-effort throughout: failures are logged and reported, never
    /// returned. A session that is not streaming is left untouched. If the
    /// restore fails, the program stays remembered and the next stop retries it.
    pub fn stop_live_image_server(&mut self) -> StopReport {
        let mut report = StopReport::default();
        if self.state == SessionState::Idle {
            return report;
        }
        self.state = SessionState::Stopping;

        if let Some(program) = self.restore_program {
            report.restored_program = Some(program);
            report.restore_status = Some(self.restore_program_to(program));
        }

        if let Some(mut stream) = self.connection.take() {
            match stream.write_all(QUIT_TOKEN).and_then(|_| stream.flush()) {
                Ok(()) => report.quit_sent = true,
                Err(err) => log::warn!("could not send quit token: {}", err),
            }
            if let Err(err) = stream.shutdown(Shutdown::Both) {
                log::debug!("stream shutdown: {}", err);
            }
        }

        self.state = SessionState::Idle;
        log::info!("live image stream closed");
        report
    }

    fn restore_best_effort(&mut self) {
        if let Some(program) = self.restore_program {
            self.restore_program_to(program);
        }
    }

    // Returns the raw status. The remembered program is released only once
    // the device confirms it is running again.
    fn restore_program_to(&mut self, program: i32) -> i32 {
        match self.control.set_program(program) {
            Ok(()) => {
                self.active_program = Some(program);
                self.restore_program = None;
                0
            }
            Err(err) => {
                log::warn!("could not restore program {}: {}", program, err);
                err.status_code().unwrap_or(-1)
            }
        }
    }
}

impl<T: RpcTransport> Drop for DeviceSession<T> {
    fn drop(&mut self) {
        if self.state != SessionState::Idle {
            self.stop_live_image_server();
        }
    }
}

fn open_stream(addr: SocketAddr, options: &SessionOptions) -> Result<TcpStream> {
    let stream = TcpStream::connect_timeout(&addr, options.connect_timeout).map_err(|source| {
        if matches!(
            source.kind(),
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
        ) {
            O3dError::ConnectTimeout {
                addr,
                timeout: options.connect_timeout,
            }
        } else {
            O3dError::ConnectionFailed { addr, source }
        }
    })?;
    stream.set_read_timeout(Some(options.frame_timeout))?;
    stream.set_nodelay(true)?;
    log::debug!("byte stream connected to {}", addr);
    Ok(stream)
}
