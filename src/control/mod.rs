//! Control channel to the camera.
//!
//! The camera exposes its configuration through a request/response RPC
//! service. Every reply is a tuple whose first element is an integer status
//! (`0` = success) followed by method-specific payload. This module wraps
//! that untyped surface:
//!
//! - `RpcTransport`: the seam to whatever RPC client carries the calls.
//! - `ControlChannel`: one typed method per remote procedure.
//! - `ImagerSettings`, `WorkingMode`, `WorkingModeAck`: typed payloads.
//!
//! The control channel never retries. A nonzero status is surfaced as
//! [`O3dError::Rpc`] with the device's code untouched.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{O3dError, Result};

pub mod stub;

/// Remote procedure names fixed by the camera firmware.
pub mod methods {
    pub const CONNECT: &str = "MDAXMLConnectCP";
    pub const DISCONNECT: &str = "MDAXMLDisconnectCP";
    pub const GET_FRONTEND_DATA: &str = "MDAXMLGetFrontendData";
    pub const SET_FRONTEND_DATA: &str = "MDAXMLSetFrontendData";
    pub const SET_WORKING_MODE: &str = "MDAXMLSetWorkingMode";
    pub const GET_WORKING_MODE: &str = "MDAXMLGetWorkingMode";
    pub const SET_PROGRAM: &str = "MDAXMLSetProgram";
    pub const GET_PROGRAM: &str = "MDAXMLGetProgram";
    pub const GET_STREAM_PORT: &str = "MDAXMLGetTCPPortCP";
}

/// Heartbeat flag sent with connect. Always enabled.
const HEARTBEAT_ENABLED: i64 = 1;

/// Inter-cycle reset time written with every frontend update.
pub const RESET_TIME: i64 = 20;

/// Firmware revision whose working-mode status cannot be trusted.
pub const QUIRKY_FIRMWARE: &str = "4041";

/// Carries one remote procedure call to the camera.
///
/// Implementations return the full reply tuple, status included. They fail
/// only when no reply could be obtained at all; a nonzero status is a
/// normal reply.
pub trait RpcTransport {
    fn call(&mut self, method: &'static str, params: &[Value]) -> Result<Vec<Value>>;
}

impl<T: RpcTransport + ?Sized> RpcTransport for Box<T> {
    fn call(&mut self, method: &'static str, params: &[Value]) -> Result<Vec<Value>> {
        (**self).call(method, params)
    }
}

impl<T: RpcTransport + ?Sized> RpcTransport for &mut T {
    fn call(&mut self, method: &'static str, params: &[Value]) -> Result<Vec<Value>> {
        (**self).call(method, params)
    }
}

// ----------------------------------------------------------------------------
// Typed payloads
// ----------------------------------------------------------------------------

/// Modulation frequency selector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModulationFrequency {
    #[default]
    SingleFirst,
    SingleSecond,
    SingleThird,
}

impl ModulationFrequency {
    pub const fn as_raw(self) -> i64 {
        match self {
            ModulationFrequency::SingleFirst => 0,
            ModulationFrequency::SingleSecond => 1,
            ModulationFrequency::SingleThird => 2,
        }
    }

    pub fn from_raw(raw: i64) -> Option<Self> {
        match raw {
            0 => Some(ModulationFrequency::SingleFirst),
            1 => Some(ModulationFrequency::SingleSecond),
            2 => Some(ModulationFrequency::SingleThird),
            _ => None,
        }
    }
}

/// Sampling mode selector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMode {
    #[default]
    Standard,
    HighDynamic,
}

impl SamplingMode {
    pub const fn as_raw(self) -> i64 {
        match self {
            SamplingMode::Standard => 0,
            SamplingMode::HighDynamic => 1,
        }
    }

    pub fn from_raw(raw: i64) -> Option<Self> {
        match raw {
            0 => Some(SamplingMode::Standard),
            1 => Some(SamplingMode::HighDynamic),
            _ => None,
        }
    }
}

/// Imager front-end configuration.
///
/// Integration times are in device time units; `delay_time` is the pause
/// between frames and therefore sets the frame rate.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ImagerSettings {
    pub modulation_frequency: ModulationFrequency,
    pub sampling_mode: SamplingMode,
    pub integration_time_short: i32,
    pub integration_time_long: i32,
    pub delay_time: i32,
}

/// Byte-stream server switch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkingMode {
    Off,
    On,
}

impl WorkingMode {
    pub const fn as_raw(self) -> i64 {
        match self {
            WorkingMode::Off => 0,
            WorkingMode::On => 1,
        }
    }

    pub fn from_raw(raw: i64) -> Option<Self> {
        match raw {
            0 => Some(WorkingMode::Off),
            1 => Some(WorkingMode::On),
            _ => None,
        }
    }
}

/// Identity reported by a successful connect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub firmware_version: String,
    pub device_type: String,
}

/// Advisory outcome of a working-mode change.
///
/// One firmware revision reports a failure status here even when the mode
/// was applied, so the raw status alone does not decide success.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkingModeAck {
    pub mode: WorkingMode,
    /// Raw status as reported by the device.
    pub status: i32,
    /// Port from the reply payload, present only with status 0 and a valid
    /// port number.
    pub port: Option<u16>,
    quirk_possible: bool,
}

impl WorkingModeAck {
    /// The device reported success.
    pub fn is_confirmed(&self) -> bool {
        self.status == 0
    }

    /// A nonzero status may be the known firmware misreport.
    pub fn is_quirk_suspect(&self) -> bool {
        self.status != 0 && self.quirk_possible
    }

    /// Success, or a failure status from firmware that is known to (or may)
    /// misreport this call.
    pub fn should_treat_as_success(&self) -> bool {
        self.is_confirmed() || self.quirk_possible
    }
}

// ----------------------------------------------------------------------------
// ControlChannel
// ----------------------------------------------------------------------------

/// Typed wrapper over the camera's RPC surface.
pub struct ControlChannel<T> {
    transport: T,
    client_addr: String,
    device_info: Option<DeviceInfo>,
}

impl<T: RpcTransport> ControlChannel<T> {
    /// `client_addr` is the address this host advertises to the camera.
    pub fn new(transport: T, client_addr: impl Into<String>) -> Self {
        Self {
            transport,
            client_addr: client_addr.into(),
            device_info: None,
        }
    }

    pub fn client_addr(&self) -> &str {
        &self.client_addr
    }

    /// Identity from the last successful connect.
    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.device_info.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.device_info.is_some()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Open the control session. Returns firmware version and device type.
    pub fn connect(&mut self) -> Result<DeviceInfo> {
        let params = [
            Value::from(self.client_addr.clone()),
            Value::from(HEARTBEAT_ENABLED),
        ];
        let reply = self.checked(methods::CONNECT, &params)?;
        let info = DeviceInfo {
            firmware_version: str_at(methods::CONNECT, &reply, 1)?,
            device_type: str_at(methods::CONNECT, &reply, 2)?,
        };
        log::info!(
            "connected to {} (firmware {})",
            info.device_type,
            info.firmware_version
        );
        self.device_info = Some(info.clone());
        Ok(info)
    }

    /// Close the control session.
    pub fn disconnect(&mut self) -> Result<()> {
        let params = [Value::from(self.client_addr.clone())];
        self.checked(methods::DISCONNECT, &params)?;
        self.device_info = None;
        log::info!("disconnected from camera");
        Ok(())
    }

    /// Read the current imager front-end settings.
    pub fn imager_settings(&mut self) -> Result<ImagerSettings> {
        let method = methods::GET_FRONTEND_DATA;
        let reply = self.checked(method, &[])?;

        let raw_freq = int_at(method, &reply, 2)?;
        let raw_sampling = int_at(method, &reply, 3)?;
        Ok(ImagerSettings {
            modulation_frequency: ModulationFrequency::from_raw(raw_freq).ok_or_else(|| {
                invalid(method, format!("unknown modulation frequency {}", raw_freq))
            })?,
            sampling_mode: SamplingMode::from_raw(raw_sampling)
                .ok_or_else(|| invalid(method, format!("unknown sampling mode {}", raw_sampling)))?,
            integration_time_short: i32_at(method, &reply, 5)?,
            integration_time_long: i32_at(method, &reply, 6)?,
            delay_time: i32_at(method, &reply, 8)?,
        })
    }

    /// Write imager front-end settings. Applied by the device on the next frame.
    pub fn set_imager_settings(&mut self, settings: &ImagerSettings) -> Result<()> {
        let params = [
            Value::from(0),
            Value::from(settings.modulation_frequency.as_raw()),
            Value::from(settings.sampling_mode.as_raw()),
            Value::from(0),
            Value::from(settings.integration_time_long),
            Value::from(settings.integration_time_short),
            Value::from(RESET_TIME),
            Value::from(settings.delay_time),
        ];
        self.checked(methods::SET_FRONTEND_DATA, &params)?;
        Ok(())
    }

    /// Switch the byte-stream server on or off.
    ///
    /// Never fails on a nonzero status or an unusable port payload; the
    /// status is returned inside the advisory [`WorkingModeAck`]. Transport
    /// failures and a missing status still propagate.
    pub fn set_working_mode(&mut self, mode: WorkingMode) -> Result<WorkingModeAck> {
        let method = methods::SET_WORKING_MODE;
        let (status, reply) = self.invoke(method, &[Value::from(mode.as_raw())])?;
        let port = match reply.get(1) {
            Some(_) if status == 0 => match port_at(method, &reply, 1) {
                Ok(port) => Some(port),
                Err(err) => {
                    log::warn!("ignoring port in working mode reply: {}", err);
                    None
                }
            },
            _ => None,
        };
        let quirk_possible = match &self.device_info {
            Some(info) => info.firmware_version.contains(QUIRKY_FIRMWARE),
            None => true,
        };
        Ok(WorkingModeAck {
            mode,
            status,
            port,
            quirk_possible,
        })
    }

    pub fn working_mode(&mut self) -> Result<WorkingMode> {
        let method = methods::GET_WORKING_MODE;
        let reply = self.checked(method, &[])?;
        let raw = int_at(method, &reply, 1)?;
        WorkingMode::from_raw(raw).ok_or_else(|| invalid(method, format!("unknown mode {}", raw)))
    }

    /// Active acquisition program id.
    pub fn program(&mut self) -> Result<i32> {
        let reply = self.checked(methods::GET_PROGRAM, &[])?;
        i32_at(methods::GET_PROGRAM, &reply, 1)
    }

    pub fn set_program(&mut self, program: i32) -> Result<()> {
        let params = [Value::from(0), Value::from(0), Value::from(program)];
        self.checked(methods::SET_PROGRAM, &params)?;
        Ok(())
    }

    /// Port of the byte-stream server.
    pub fn stream_port(&mut self) -> Result<u16> {
        let reply = self.checked(methods::GET_STREAM_PORT, &[])?;
        port_at(methods::GET_STREAM_PORT, &reply, 1)
    }

    fn invoke(&mut self, method: &'static str, params: &[Value]) -> Result<(i32, Vec<Value>)> {
        let reply = self.transport.call(method, params)?;
        let status = i32_at(method, &reply, 0)?;
        log::debug!("{} -> status {}", method, status);
        Ok((status, reply))
    }

    fn checked(&mut self, method: &'static str, params: &[Value]) -> Result<Vec<Value>> {
        let (status, reply) = self.invoke(method, params)?;
        if status != 0 {
            return Err(O3dError::Rpc {
                method,
                code: status,
            });
        }
        Ok(reply)
    }
}

fn invalid(method: &'static str, reason: String) -> O3dError {
    O3dError::InvalidResponse { method, reason }
}

fn int_at(method: &'static str, reply: &[Value], idx: usize) -> Result<i64> {
    let value = reply
        .get(idx)
        .ok_or_else(|| invalid(method, format!("missing element {}", idx)))?;
    value
        .as_i64()
        .ok_or_else(|| invalid(method, format!("element {} is not an integer: {}", idx, value)))
}

fn i32_at(method: &'static str, reply: &[Value], idx: usize) -> Result<i32> {
    let raw = int_at(method, reply, idx)?;
    i32::try_from(raw).map_err(|_| invalid(method, format!("element {} out of range: {}", idx, raw)))
}

fn port_at(method: &'static str, reply: &[Value], idx: usize) -> Result<u16> {
    let raw = int_at(method, reply, idx)?;
    u16::try_from(raw).map_err(|_| invalid(method, format!("invalid port {}", raw)))
}

fn str_at(method: &'static str, reply: &[Value], idx: usize) -> Result<String> {
    reply
        .get(idx)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| invalid(method, format!("element {} is not a string", idx)))
}

#[cfg(test)]
mod tests {
    use super::stub::StubDevice;
    use super::*;

    fn channel(device: &StubDevice) -> ControlChannel<StubDevice> {
        ControlChannel::new(device.clone(), "192.168.0.10")
    }

    #[test]
    fn connect_returns_identity_and_sends_heartbeat() {
        let device = StubDevice::new().with_firmware("4100");
        let mut ctl = channel(&device);

        let info = ctl.connect().expect("connect");
        assert_eq!(info.firmware_version, "4100");
        assert_eq!(info.device_type, "O3D201");
        assert!(ctl.is_connected());

        let calls = device.calls();
        assert_eq!(calls[0].method, methods::CONNECT);
        assert_eq!(
            calls[0].params,
            vec![Value::from("192.168.0.10"), Value::from(1)]
        );
    }

    #[test]
    fn connect_failure_surfaces_status() {
        let device = StubDevice::new();
        device.fail(methods::CONNECT, 5);
        let mut ctl = channel(&device);

        let err = ctl.connect().unwrap_err();
        assert!(matches!(
            err,
            O3dError::Rpc { method, code: 5 } if method == methods::CONNECT
        ));
        assert!(ctl.device_info().is_none());
    }

    #[test]
    fn frontend_settings_round_trip_through_device_layout() {
        let device = StubDevice::new();
        let mut ctl = channel(&device);
        let settings = ImagerSettings {
            modulation_frequency: ModulationFrequency::SingleThird,
            sampling_mode: SamplingMode::HighDynamic,
            integration_time_short: 150,
            integration_time_long: 1200,
            delay_time: 100,
        };

        ctl.set_imager_settings(&settings).expect("set");
        let calls = device.calls();
        assert_eq!(
            calls[0].params,
            [0, 2, 1, 0, 1200, 150, 20, 100]
                .iter()
                .map(|v| Value::from(*v))
                .collect::<Vec<_>>()
        );

        assert_eq!(ctl.imager_settings().expect("get"), settings);
    }

    #[test]
    fn frontend_read_failure_is_reported() {
        let device = StubDevice::new();
        device.fail(methods::GET_FRONTEND_DATA, 2);
        let mut ctl = channel(&device);
        assert_eq!(ctl.imager_settings().unwrap_err().status_code(), Some(2));
    }

    #[test]
    fn working_mode_ack_is_advisory() {
        let device = StubDevice::new().with_firmware("4041");
        device.simulate_working_mode_quirk(true);
        let mut ctl = channel(&device);
        ctl.connect().expect("connect");

        let ack = ctl.set_working_mode(WorkingMode::On).expect("ack");
        assert!(!ack.is_confirmed());
        assert!(ack.is_quirk_suspect());
        assert!(ack.should_treat_as_success());
        assert_eq!(ack.port, None);
        assert_eq!(ctl.working_mode().expect("mode"), WorkingMode::On);
    }

    #[test]
    fn working_mode_failure_on_trusted_firmware() {
        let device = StubDevice::new().with_firmware("4100");
        device.fail(methods::SET_WORKING_MODE, 7);
        let mut ctl = channel(&device);
        ctl.connect().expect("connect");

        let ack = ctl.set_working_mode(WorkingMode::On).expect("ack");
        assert_eq!(ack.status, 7);
        assert!(!ack.should_treat_as_success());
    }

    #[test]
    fn working_mode_success_carries_port() {
        let device = StubDevice::new().with_stream_port(50002);
        let mut ctl = channel(&device);
        let ack = ctl.set_working_mode(WorkingMode::On).expect("ack");
        assert!(ack.is_confirmed());
        assert_eq!(ack.port, Some(50002));
    }

    /// Answers the working-mode switch with status 0 and an unusable port.
    struct NegativePortReply(StubDevice);

    impl RpcTransport for NegativePortReply {
        fn call(&mut self, method: &'static str, params: &[Value]) -> Result<Vec<Value>> {
            let reply = self.0.call(method, params)?;
            if method == methods::SET_WORKING_MODE {
                return Ok(vec![Value::from(0), Value::from(-1)]);
            }
            Ok(reply)
        }
    }

    #[test]
    fn working_mode_ignores_unusable_port_payload() {
        let device = StubDevice::new();
        let mut ctl = ControlChannel::new(NegativePortReply(device.clone()), "192.168.0.10");

        let ack = ctl.set_working_mode(WorkingMode::On).expect("ack");
        assert!(ack.is_confirmed());
        assert_eq!(ack.port, None);
        assert_eq!(device.working_mode(), 1);
    }

    #[test]
    fn frontend_write_failure_surfaces_status() {
        let device = StubDevice::new();
        device.fail(methods::SET_FRONTEND_DATA, 4);
        let mut ctl = channel(&device);

        let err = ctl.set_imager_settings(&ImagerSettings::default()).unwrap_err();
        assert!(matches!(
            err,
            O3dError::Rpc { method, code: 4 } if method == methods::SET_FRONTEND_DATA
        ));
    }

    #[test]
    fn disconnect_failure_keeps_session_identity() {
        let device = StubDevice::new();
        let mut ctl = channel(&device);
        ctl.connect().expect("connect");
        device.fail(methods::DISCONNECT, 2);

        let err = ctl.disconnect().unwrap_err();
        assert!(matches!(
            err,
            O3dError::Rpc { method, code: 2 } if method == methods::DISCONNECT
        ));
        assert!(ctl.is_connected());
        assert_eq!(
            ctl.device_info().map(|info| info.firmware_version.as_str()),
            Some("4100")
        );
    }

    #[test]
    fn working_mode_read_failure_surfaces_status() {
        let device = StubDevice::new();
        device.fail(methods::GET_WORKING_MODE, 9);
        let mut ctl = channel(&device);

        let err = ctl.working_mode().unwrap_err();
        assert!(matches!(
            err,
            O3dError::Rpc { method, code: 9 } if method == methods::GET_WORKING_MODE
        ));
    }

    #[test]
    fn stream_port_failure_surfaces_status() {
        let device = StubDevice::new();
        device.fail(methods::GET_STREAM_PORT, 3);
        let mut ctl = channel(&device);

        let err = ctl.stream_port().unwrap_err();
        assert!(matches!(
            err,
            O3dError::Rpc { method, code: 3 } if method == methods::GET_STREAM_PORT
        ));
    }

    #[test]
    fn program_uses_compatibility_zeros() {
        let device = StubDevice::new().with_program(3);
        let mut ctl = channel(&device);

        assert_eq!(ctl.program().expect("program"), 3);
        ctl.set_program(7).expect("set program");
        assert_eq!(device.program(), 7);

        let calls = device.calls();
        assert_eq!(
            calls[1].params,
            vec![Value::from(0), Value::from(0), Value::from(7)]
        );
    }

    #[test]
    fn stream_port_rejects_out_of_range_values() {
        let reply = vec![Value::from(0), Value::from(70000)];
        let err = port_at(methods::GET_STREAM_PORT, &reply, 1).unwrap_err();
        assert!(matches!(err, O3dError::InvalidResponse { .. }));
    }

    #[test]
    fn malformed_status_is_invalid_response() {
        let reply = vec![Value::from("ok")];
        assert!(matches!(
            i32_at(methods::GET_PROGRAM, &reply, 0),
            Err(O3dError::InvalidResponse { .. })
        ));
        assert!(matches!(
            int_at(methods::GET_PROGRAM, &[], 0),
            Err(O3dError::InvalidResponse { .. })
        ));
    }
}
