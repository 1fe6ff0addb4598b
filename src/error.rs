//! Error taxonomy for the protocol engine (§7).

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = core::result::Result<T, ModbusError>;

/// Closed error taxonomy shared by framing, PDU, and state-machine layers.
///
/// Success is represented by `Ok(T)`, not a variant of this enum (§7 calls
/// out `Ok` as "success" but Rust already gives us that via `Result`).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModbusError {
    /// NULL, out-of-range argument, or destination buffer too small.
    #[error("invalid argument")]
    InvalidArgument,

    /// Deadline expired, or no bytes were available this tick.
    #[error("timeout")]
    Timeout,

    /// I/O failure reported by the transport.
    #[error("transport failure")]
    Transport,

    /// RTU CRC or ASCII LRC mismatch.
    #[error("checksum mismatch")]
    Crc,

    /// Structural framing error (bad `:`, CRLF, hex digits, MBAP protocol id).
    #[error("malformed frame")]
    InvalidRequest,

    /// Operation cancelled by the caller or a poison pill.
    #[error("cancelled")]
    Cancelled,

    /// Transaction pool or high-priority queue exhausted.
    #[error("no resources available")]
    NoResources,

    /// Normal-priority queue full; caller should back off.
    #[error("busy")]
    Busy,

    /// A Modbus protocol exception was returned by the peer.
    #[error("modbus exception {0:#04x}")]
    Exception(u8),

    /// Catch-all for unmapped platform failures.
    #[error("other failure")]
    Other,
}

impl ModbusError {
    /// True for the success case. Provided for parity with implementations
    /// that model `Ok` as an explicit taxonomy member (§7).
    pub fn is_ok<T>(result: &Result<T>) -> bool {
        result.is_ok()
    }

    /// True if this error is a Modbus protocol exception.
    pub fn is_exception(&self) -> bool {
        matches!(self, Self::Exception(_))
    }

    /// The wrapped exception code, if this is an `Exception`.
    pub fn exception_code(&self) -> Option<u8> {
        match self {
            Self::Exception(code) => Some(*code),
            _ => None,
        }
    }

    /// Whether this error class is safe to retry without caller intervention.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::Crc | Self::InvalidRequest | Self::Busy
        )
    }
}

/// Modbus exception codes (§4.2, §8 scenario 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    SlaveDeviceFailure = 0x04,
    Acknowledge = 0x05,
    SlaveDeviceBusy = 0x06,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetFailedToRespond = 0x0B,
}

impl ExceptionCode {
    /// Parses a raw exception byte, rejecting codes outside the valid set
    /// (§3 PDU invariant: code in `{1..8, 10, 11}`).
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x01 => Self::IllegalFunction,
            0x02 => Self::IllegalDataAddress,
            0x03 => Self::IllegalDataValue,
            0x04 => Self::SlaveDeviceFailure,
            0x05 => Self::Acknowledge,
            0x06 => Self::SlaveDeviceBusy,
            0x08 => Self::MemoryParityError,
            0x0A => Self::GatewayPathUnavailable,
            0x0B => Self::GatewayTargetFailedToRespond,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_round_trip() {
        assert_eq!(
            ExceptionCode::from_u8(0x02),
            Some(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(ExceptionCode::from_u8(0x09), None);
        assert_eq!(ExceptionCode::from_u8(0x0B), Some(ExceptionCode::GatewayTargetFailedToRespond));
    }

    #[test]
    fn recoverable_classes() {
        assert!(ModbusError::Timeout.is_recoverable());
        assert!(ModbusError::Crc.is_recoverable());
        assert!(!ModbusError::NoResources.is_recoverable());
        assert!(ModbusError::Exception(0x02).is_exception());
    }
}
