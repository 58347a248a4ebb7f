use std::time::Duration;

use crate::error::RaceError;

/// Size of the serialized setup stage of a control transfer
pub const SETUP_PACKET_LEN: usize = 8;

/// The control endpoint
pub const CONTROL_ENDPOINT: u8 = 0;

const REQUEST_DIR_IN: u8 = 1 << 7;

/// Data stage direction, from bit 7 of `bmRequestType`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Out,
    In,
}

/// Request type, from bits 6..5 of `bmRequestType`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Standard,
    Class,
    Vendor,
    Reserved,
}

/// Request recipient, from bits 4..0 of `bmRequestType`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestRecipient {
    Device,
    Interface,
    Endpoint,
    Other,
    Reserved(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Control,
}

/// Symbolic description of a control request, without its data stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

impl ControlRequest {
    pub const fn new(
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
    ) -> Self {
        ControlRequest {
            request_type,
            request,
            value,
            index,
        }
    }

    /// Setup stage for this request carrying `payload_len` bytes of data.
    pub fn setup(&self, payload_len: usize) -> Result<SetupPacket, RaceError> {
        build_setup(
            self.request_type,
            self.request,
            self.value,
            self.index,
            payload_len,
        )
    }
}

/// USB setup packet (USB 2.0, section 9.3)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    /// Wire representation. Multi-byte fields are little-endian.
    pub fn to_bytes(&self) -> [u8; SETUP_PACKET_LEN] {
        let value = self.value.to_le_bytes();
        let index = self.index.to_le_bytes();
        let length = self.length.to_le_bytes();
        [
            self.request_type,
            self.request,
            value[0],
            value[1],
            index[0],
            index[1],
            length[0],
            length[1],
        ]
    }

    #[doc(alias = "bmRequestType")]
    pub fn direction(&self) -> Direction {
        if self.request_type & REQUEST_DIR_IN != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }

    #[doc(alias = "bmRequestType")]
    pub fn kind(&self) -> RequestKind {
        match (self.request_type >> 5) & 0b11 {
            0 => RequestKind::Standard,
            1 => RequestKind::Class,
            2 => RequestKind::Vendor,
            _ => RequestKind::Reserved,
        }
    }

    #[doc(alias = "bmRequestType")]
    pub fn recipient(&self) -> RequestRecipient {
        match self.request_type & 0b1_1111 {
            0 => RequestRecipient::Device,
            1 => RequestRecipient::Interface,
            2 => RequestRecipient::Endpoint,
            3 => RequestRecipient::Other,
            r => RequestRecipient::Reserved(r),
        }
    }
}

/// Serialize a setup stage announcing `payload_len` bytes of data.
///
/// `wLength` is 16 bits wide: longer payloads are rejected here, before
/// anything can reach the device.
pub fn build_setup(
    request_type: u8,
    request: u8,
    value: u16,
    index: u16,
    payload_len: usize,
) -> Result<SetupPacket, RaceError> {
    let length = u16::try_from(payload_len)
        .map_err(|_| RaceError::PayloadTooLarge(payload_len))?;
    Ok(SetupPacket {
        request_type,
        request,
        value,
        index,
        length,
    })
}

/// A control transfer ready for asynchronous submission
///
/// The descriptor owns the request buffer (setup stage followed by the data
/// stage). Submitting it moves the buffer to the host, which releases it on
/// whichever terminal state the transfer reaches. There is no completion
/// callback: the outcome is only observed when the transfer is cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferDescriptor {
    endpoint: u8,
    kind: TransferKind,
    timeout: Option<Duration>,
    buffer: Vec<u8>,
}

impl TransferDescriptor {
    pub fn endpoint(&self) -> u8 {
        self.endpoint
    }

    pub fn kind(&self) -> TransferKind {
        self.kind
    }

    /// `None` when the transfer should never time out on its own.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Setup stage, decoded back from the buffer.
    pub fn setup(&self) -> SetupPacket {
        let b = &self.buffer;
        SetupPacket {
            request_type: b[0],
            request: b[1],
            value: u16::from_le_bytes([b[2], b[3]]),
            index: u16::from_le_bytes([b[4], b[5]]),
            length: u16::from_le_bytes([b[6], b[7]]),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer[SETUP_PACKET_LEN..]
    }

    /// The whole request as it is laid out for the host.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }
}

/// Concatenate the setup stage and `payload` into a control transfer on
/// endpoint 0. A `timeout_ms` of zero disables the timeout.
pub fn build_transfer(
    setup: &SetupPacket,
    payload: &[u8],
    timeout_ms: u32,
) -> TransferDescriptor {
    let mut buffer = Vec::with_capacity(SETUP_PACKET_LEN + payload.len());
    buffer.extend_from_slice(&setup.to_bytes());
    buffer.extend_from_slice(payload);
    TransferDescriptor {
        endpoint: CONTROL_ENDPOINT,
        kind: TransferKind::Control,
        timeout: (timeout_ms > 0)
            .then(|| Duration::from_millis(timeout_ms as u64)),
        buffer,
    }
}

/// Upper-case hex dump without separators, as logged for transfers.
pub fn to_hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02X}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_layout() {
        let setup = build_setup(0x80, 6, 0x0304, 0x040A, 0xC0).unwrap();
        assert_eq!(
            setup.to_bytes(),
            [0x80, 0x06, 0x04, 0x03, 0x0A, 0x04, 0xC0, 0x00]
        );
        assert_eq!(setup.direction(), Direction::In);
        assert_eq!(setup.kind(), RequestKind::Standard);
        assert_eq!(setup.recipient(), RequestRecipient::Device);
    }

    #[test]
    fn test_length_field() {
        for len in [0usize, 1, 0xC1, 0x800, 0x1234, u16::MAX as usize] {
            let setup = build_setup(0x21, 1, 0, 0, len).unwrap();
            let bytes = setup.to_bytes();
            assert_eq!(bytes.len(), SETUP_PACKET_LEN);
            assert_eq!(&bytes[6..], &(len as u16).to_le_bytes());
        }
    }

    #[test]
    fn test_payload_too_large() {
        let err = build_setup(0x21, 1, 0, 0, 65536).unwrap_err();
        assert!(matches!(err, RaceError::PayloadTooLarge(65536)));
    }

    #[test]
    fn test_request_type_decoding() {
        let out = build_setup(0x02, 3, 0, 0x80, 0).unwrap();
        assert_eq!(out.direction(), Direction::Out);
        assert_eq!(out.kind(), RequestKind::Standard);
        assert_eq!(out.recipient(), RequestRecipient::Endpoint);

        let class = build_setup(0x21, 1, 0, 0, 0).unwrap();
        assert_eq!(class.kind(), RequestKind::Class);
        assert_eq!(class.recipient(), RequestRecipient::Interface);

        let odd = build_setup(0xE5, 0, 0, 0, 0).unwrap();
        assert_eq!(odd.kind(), RequestKind::Reserved);
        assert_eq!(odd.recipient(), RequestRecipient::Reserved(5));
    }

    #[test]
    fn test_transfer_descriptor() {
        let payload = vec![b'A'; 0xC0];
        let setup =
            build_setup(0x80, 6, 0x0304, 0x040A, payload.len()).unwrap();
        let xfer = build_transfer(&setup, &payload, 0);

        assert_eq!(xfer.len(), SETUP_PACKET_LEN + payload.len());
        assert_eq!(xfer.endpoint(), CONTROL_ENDPOINT);
        assert_eq!(xfer.kind(), TransferKind::Control);
        assert_eq!(xfer.timeout(), None);
        assert_eq!(xfer.setup(), setup);
        assert_eq!(xfer.payload(), payload.as_slice());

        let setup = build_setup(0, 0, 0, 0, 0).unwrap();
        let empty = build_transfer(&setup, &[], 10);
        assert_eq!(empty.len(), SETUP_PACKET_LEN);
        assert_eq!(empty.timeout(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&[]), "");
        let setup = build_setup(0x80, 6, 0x0304, 0x040A, 0xC0).unwrap();
        assert_eq!(to_hex(&setup.to_bytes()), "800604030A04C000");
    }
}
