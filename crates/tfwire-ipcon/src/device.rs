use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tfwire_frame::uid::uid_from_field;
use tfwire_frame::GET_IDENTITY;

use crate::connection::{IpConnection, Shared};
use crate::error::{IpconError, Result};
use crate::registry::{DeviceEntry, ListenerId, ListenerResult, ResponseExpected};

const IDENTITY_SIZE: usize = 25;

/// Identity record every device answers to function 255.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub uid: String,
    /// Uid of the brick or bricklet this device is attached to.
    pub connected_uid: String,
    /// Port (`'a'`..) or stack position (`'0'`..) on the parent.
    pub position: char,
    pub hardware_version: [u8; 3],
    pub firmware_version: [u8; 3],
    pub device_identifier: u16,
}

impl Identity {
    /// Parse a get-identity response payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        if payload.len() < IDENTITY_SIZE {
            return Err(IpconError::InvalidResponse {
                function_id: GET_IDENTITY,
                expected: IDENTITY_SIZE,
                actual: payload.len(),
            });
        }

        Ok(Self {
            uid: uid_from_field(&payload[0..8]),
            connected_uid: uid_from_field(&payload[8..16]),
            position: char::from(payload[16]),
            hardware_version: [payload[17], payload[18], payload[19]],
            firmware_version: [payload[20], payload[21], payload[22]],
            device_identifier: u16::from_le_bytes([payload[23], payload[24]]),
        })
    }
}

fn version(v: [u8; 3]) -> String {
    format!("{}.{}.{}", v[0], v[1], v[2])
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (device {}) at {}:{} hw {} fw {}",
            self.uid,
            self.device_identifier,
            self.connected_uid,
            self.position,
            version(self.hardware_version),
            version(self.firmware_version)
        )
    }
}

/// Handle to one device on a connection.
///
/// Handles are cheap to clone; every handle for a uid shares the same
/// listeners and response-expected settings. A handle does not keep the
/// connection alive: once it is dropped, calls fail with `NotConnected`.
#[derive(Clone)]
pub struct Device {
    entry: Arc<DeviceEntry>,
    connection: Weak<Shared>,
}

impl Device {
    /// Register `uid` on `ipcon`. Same as [`IpConnection::register`].
    pub fn new(uid: &str, ipcon: &IpConnection) -> Result<Self> {
        ipcon.register(uid)
    }

    pub(crate) fn from_parts(entry: Arc<DeviceEntry>, connection: Weak<Shared>) -> Self {
        Self { entry, connection }
    }

    pub fn uid(&self) -> u32 {
        self.entry.uid()
    }

    pub fn uid_text(&self) -> &str {
        self.entry.uid_text()
    }

    fn shared(&self) -> Result<Arc<Shared>> {
        self.connection.upgrade().ok_or(IpconError::NotConnected)
    }

    /// Call `function_id` with the configured response timeout and the
    /// function's response-expected setting.
    pub fn call(&self, function_id: u8, payload: &[u8]) -> Result<Bytes> {
        let shared = self.shared()?;
        let response_expected = self.entry.response_expected(function_id).as_bool();
        let timeout = shared.config().response_timeout;
        shared.call(
            self.uid(),
            function_id,
            payload,
            response_expected,
            timeout,
        )
    }

    /// Call with an explicit response flag and timeout.
    pub fn call_with(
        &self,
        function_id: u8,
        payload: &[u8],
        response_expected: bool,
        timeout: Duration,
    ) -> Result<Bytes> {
        self.shared()?
            .call(self.uid(), function_id, payload, response_expected, timeout)
    }

    /// Like [`call`](Self::call), but fails when the response is shorter than `expected`.
    pub(crate) fn call_expecting(
        &self,
        function_id: u8,
        payload: &[u8],
        expected: usize,
    ) -> Result<Bytes> {
        let response = self.call(function_id, payload)?;
        if response.len() < expected {
            return Err(IpconError::InvalidResponse {
                function_id,
                expected,
                actual: response.len(),
            });
        }
        Ok(response)
    }

    /// Ask the device to start sending a notification. A plain request/response call.
    pub fn enable_notification(&self, function_id: u8) -> Result<()> {
        let shared = self.shared()?;
        let timeout = shared.config().response_timeout;
        shared.call(self.uid(), function_id, &[], true, timeout)?;
        Ok(())
    }

    /// Register a listener for callbacks with `function_id`.
    ///
    /// Listeners run on the callback thread, in registration order. A
    /// listener that blocks delays later callbacks but never a `call`.
    pub fn add_listener<F>(&self, function_id: u8, listener: F) -> ListenerId
    where
        F: Fn(&[u8]) -> ListenerResult + Send + Sync + 'static,
    {
        let id = ListenerId::next();
        self.entry.push_listener(id, function_id, Arc::new(listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.entry.remove_listener(id)
    }

    pub fn get_identity(&self) -> Result<Identity> {
        let payload = self.call_expecting(GET_IDENTITY, &[], IDENTITY_SIZE)?;
        Identity::from_payload(&payload)
    }

    /// Whether calls to `function_id` wait for a response.
    pub fn get_response_expected(&self, function_id: u8) -> bool {
        self.entry.response_expected(function_id).as_bool()
    }

    /// Choose whether calls to `function_id` wait for a response.
    ///
    /// Getters always answer; clearing the flag for one is an error.
    pub fn set_response_expected(&self, function_id: u8, response_expected: bool) -> Result<()> {
        let mut table = self.entry.response_expected_table();
        if table.get(&function_id) == Some(&ResponseExpected::AlwaysTrue) {
            return Err(IpconError::ResponseAlwaysExpected(function_id));
        }
        table.insert(function_id, flag(response_expected));
        Ok(())
    }

    /// Set the flag for every known function that is not always answered.
    pub fn set_response_expected_all(&self, response_expected: bool) {
        let mut table = self.entry.response_expected_table();
        for value in table.values_mut() {
            if *value != ResponseExpected::AlwaysTrue {
                *value = flag(response_expected);
            }
        }
    }

    /// Seed the response-expected table; settings already made are kept.
    pub(crate) fn declare_functions(&self, functions: &[(u8, ResponseExpected)]) {
        let mut table = self.entry.response_expected_table();
        for &(function_id, value) in functions {
            table.entry(function_id).or_insert(value);
        }
    }
}

fn flag(response_expected: bool) -> ResponseExpected {
    if response_expected {
        ResponseExpected::True
    } else {
        ResponseExpected::False
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("uid", &self.uid_text())
            .field("listeners", &self.entry.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_payload() -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(b"XYZ\0\0\0\0\0");
        payload.extend_from_slice(b"6qUNbz\0\0");
        payload.push(b'c');
        payload.extend_from_slice(&[1, 0, 0]);
        payload.extend_from_slice(&[2, 0, 4]);
        payload.extend_from_slice(&2108u16.to_le_bytes());
        payload
    }

    #[test]
    fn identity_parses_all_fields() {
        let identity = Identity::from_payload(&identity_payload()).unwrap();
        assert_eq!(identity.uid, "XYZ");
        assert_eq!(identity.connected_uid, "6qUNbz");
        assert_eq!(identity.position, 'c');
        assert_eq!(identity.hardware_version, [1, 0, 0]);
        assert_eq!(identity.firmware_version, [2, 0, 4]);
        assert_eq!(identity.device_identifier, 2108);
        assert_eq!(
            identity.to_string(),
            "XYZ (device 2108) at 6qUNbz:c hw 1.0.0 fw 2.0.4"
        );
    }

    #[test]
    fn short_identity_is_invalid() {
        let err = Identity::from_payload(&identity_payload()[..20]).unwrap_err();
        assert!(matches!(
            err,
            IpconError::InvalidResponse {
                function_id: GET_IDENTITY,
                expected: 25,
                actual: 20
            }
        ));
    }

    #[test]
    fn response_expected_settings() {
        let ipcon = IpConnection::default();
        let device = ipcon.register("XYZ").unwrap();
        device.declare_functions(&[(1, ResponseExpected::AlwaysTrue), (3, ResponseExpected::True)]);

        assert!(device.get_response_expected(3));
        device.set_response_expected(3, false).unwrap();
        assert!(!device.get_response_expected(3));

        assert!(matches!(
            device.set_response_expected(1, false),
            Err(IpconError::ResponseAlwaysExpected(1))
        ));
        assert!(matches!(
            device.set_response_expected(GET_IDENTITY, false),
            Err(IpconError::ResponseAlwaysExpected(GET_IDENTITY))
        ));

        device.set_response_expected_all(true);
        assert!(device.get_response_expected(3));
        device.set_response_expected_all(false);
        assert!(!device.get_response_expected(3));
        assert!(device.get_response_expected(1));
    }

    #[test]
    fn handles_share_listeners_and_settings() {
        let ipcon = IpConnection::default();
        let first = ipcon.register("XYZ").unwrap();
        let second = Device::new("XYZ", &ipcon).unwrap();

        let id = first.add_listener(12, |_| Ok(()));
        second.set_response_expected(4, false).unwrap();

        assert!(!first.get_response_expected(4));
        assert!(second.remove_listener(id));
        assert!(!first.remove_listener(id));
    }

    #[test]
    fn calls_fail_after_connection_dropped() {
        let ipcon = IpConnection::default();
        let device = ipcon.register("XYZ").unwrap();
        drop(ipcon);
        assert!(matches!(device.call(1, &[]), Err(IpconError::NotConnected)));
        assert!(matches!(
            device.get_identity(),
            Err(IpconError::NotConnected)
        ));
    }
}
