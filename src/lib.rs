//! O3D time-of-flight camera client
//!
//! This crate drives the live image stream of an O3D range camera.
//!
//! # Architecture
//!
//! The camera has two endpoints:
//!
//! 1. **Control**: a request/response RPC service used to connect, read and
//!    write imager settings, switch the working mode and select programs.
//!    The RPC client itself is supplied by the caller through
//!    [`RpcTransport`].
//! 2. **Byte stream**: a raw TCP connection on which the camera answers each
//!    image request with fixed-size big-endian float frames.
//!
//! A [`DeviceSession`] sequences the control calls that open the byte
//! stream, requests images on it, and restores the device's original
//! program when the stream is closed.
//!
//! # Module Structure
//!
//! - `frame`: frame codec, image kinds, metadata fields
//! - `control`: typed control calls over an [`RpcTransport`]
//! - `stream`: the streaming session state machine
//! - `config`: client configuration (JSON file + environment)
//! - `error`: error taxonomy
//!
//! # Example
//!
//! ```no_run
//! use o3d_client::control::stub::StubDevice;
//! use o3d_client::{DeviceSession, ImageKind, SessionOptions};
//!
//! # fn main() -> o3d_client::Result<()> {
//! let options = SessionOptions::new("192.168.0.69".parse().unwrap(), "192.168.0.10");
//! let mut session = DeviceSession::new(StubDevice::new(), options);
//!
//! session.start_live_image_server()?;
//! let images = session.acquire(&[ImageKind::Amplitude, ImageKind::Distance], true)?;
//! println!("distance range: {}..{}", images[1].min, images[1].max);
//! session.stop_live_image_server();
//! session.disconnect()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod control;
pub mod error;
pub mod frame;
pub mod stream;

pub use control::{
    ControlChannel, DeviceInfo, ImagerSettings, ModulationFrequency, RpcTransport, SamplingMode,
    WorkingMode, WorkingModeAck,
};
pub use error::{IncompleteReason, O3dError, Result};
pub use frame::{
    decode_frame, DecodedImage, FrameData, ImageKind, MetaField, FRAME_BYTES, HEIGHT, META_COUNT,
    WIDTH,
};
pub use stream::{
    encode_command, read_frame, DeviceSession, SessionOptions, SessionState, SessionStats,
    StopReport, LIVE_IMAGE_PROGRAM, QUIT_TOKEN,
};
