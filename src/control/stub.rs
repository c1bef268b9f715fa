//! In-memory camera for exercising the control channel without hardware.
//!
//! `StubDevice` answers every firmware method from a small simulated state
//! (program, working mode, stream port, frontend registers) and records each
//! call. Clones share state, so a test can keep one handle for assertions
//! while the session owns another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use super::{methods, RpcTransport, RESET_TIME};
use crate::error::{O3dError, Result};

/// One recorded remote procedure call.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedCall {
    pub method: &'static str,
    pub params: Vec<Value>,
}

/// Simulated camera control endpoint.
#[derive(Clone)]
pub struct StubDevice {
    inner: Arc<Mutex<StubState>>,
}

struct StubState {
    firmware_version: String,
    device_type: String,
    program: i64,
    working_mode: i64,
    stream_port: u16,
    // [freq, sampling, long, short, delay]
    frontend: [i64; 5],
    failures: HashMap<&'static str, i32>,
    working_mode_quirk: bool,
    offline: bool,
    calls: Vec<RecordedCall>,
}

impl StubDevice {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(StubState {
                firmware_version: "4100".to_string(),
                device_type: "O3D201".to_string(),
                program: 1,
                working_mode: 0,
                stream_port: 50002,
                frontend: [0, 0, 1000, 200, 141],
                failures: HashMap::new(),
                working_mode_quirk: false,
                offline: false,
                calls: Vec::new(),
            })),
        }
    }

    pub fn with_firmware(self, version: &str) -> Self {
        self.state().firmware_version = version.to_string();
        self
    }

    pub fn with_program(self, program: i32) -> Self {
        self.state().program = program as i64;
        self
    }

    pub fn with_stream_port(self, port: u16) -> Self {
        self.state().stream_port = port;
        self
    }

    /// Answer every future call to `method` with `code` and no payload.
    pub fn fail(&self, method: &'static str, code: i32) {
        self.state().failures.insert(method, code);
    }

    pub fn clear_failure(&self, method: &'static str) {
        self.state().failures.remove(method);
    }

    /// Apply working-mode changes but report status 1, like firmware 4041.
    pub fn simulate_working_mode_quirk(&self, enabled: bool) {
        self.state().working_mode_quirk = enabled;
    }

    /// Make every call fail at the transport level.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state().calls.clone()
    }

    pub fn methods_called(&self) -> Vec<&'static str> {
        self.state().calls.iter().map(|c| c.method).collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn program(&self) -> i32 {
        self.state().program as i32
    }

    pub fn working_mode(&self) -> i32 {
        self.state().working_mode as i32
    }

    fn state(&self) -> MutexGuard<'_, StubState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for StubDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcTransport for StubDevice {
    fn call(&mut self, method: &'static str, params: &[Value]) -> Result<Vec<Value>> {
        let mut state = self.state();
        state.calls.push(RecordedCall {
            method,
            params: params.to_vec(),
        });
        if state.offline {
            return Err(O3dError::Transport(format!("{}: device offline", method)));
        }
        if let Some(&code) = state.failures.get(method) {
            return Ok(vec![Value::from(code)]);
        }

        let arg = |idx: usize| params.get(idx).and_then(Value::as_i64).unwrap_or_default();
        let ok = Value::from(0);
        let reply = match method {
            methods::CONNECT => vec![
                ok,
                Value::from(state.firmware_version.clone()),
                Value::from(state.device_type.clone()),
            ],
            methods::DISCONNECT => vec![ok],
            methods::GET_FRONTEND_DATA => {
                let [freq, sampling, long, short, delay] = state.frontend;
                // Readback lists the short integration time first.
                [0, freq, sampling, 0, short, long, RESET_TIME, delay]
                    .into_iter()
                    .fold(vec![ok], |mut reply, v| {
                        reply.push(Value::from(v));
                        reply
                    })
            }
            methods::SET_FRONTEND_DATA => {
                state.frontend = [arg(1), arg(2), arg(4), arg(5), arg(7)];
                vec![ok]
            }
            methods::SET_WORKING_MODE => {
                state.working_mode = arg(0);
                if state.working_mode_quirk {
                    vec![Value::from(1)]
                } else {
                    vec![ok, Value::from(state.stream_port)]
                }
            }
            methods::GET_WORKING_MODE => vec![ok, Value::from(state.working_mode)],
            methods::SET_PROGRAM => {
                state.program = arg(2);
                vec![ok]
            }
            methods::GET_PROGRAM => vec![ok, Value::from(state.program)],
            methods::GET_STREAM_PORT => vec![ok, Value::from(state.stream_port)],
            other => {
                return Err(O3dError::Transport(format!("unknown method {}", other)));
            }
        };
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state_and_call_log() {
        let device = StubDevice::new();
        let mut transport = device.clone();
        transport
            .call(methods::SET_PROGRAM, &[Value::from(0), Value::from(0), Value::from(7)])
            .expect("call");
        assert_eq!(device.program(), 7);
        assert_eq!(device.methods_called(), vec![methods::SET_PROGRAM]);
    }

    #[test]
    fn failures_return_status_only() {
        let device = StubDevice::new();
        device.fail(methods::GET_PROGRAM, 4);
        let reply = device.clone().call(methods::GET_PROGRAM, &[]).expect("call");
        assert_eq!(reply, vec![Value::from(4)]);

        device.clear_failure(methods::GET_PROGRAM);
        let reply = device.clone().call(methods::GET_PROGRAM, &[]).expect("call");
        assert_eq!(reply, vec![Value::from(0), Value::from(1)]);
    }

    #[test]
    fn offline_device_is_a_transport_error() {
        let device = StubDevice::new();
        device.set_offline(true);
        let err = device.clone().call(methods::GET_PROGRAM, &[]).unwrap_err();
        assert!(matches!(err, O3dError::Transport(_)));
    }
}
