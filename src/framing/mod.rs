//! Framing codecs: byte-exact encode/decode for RTU, ASCII and MBAP ADUs
//! (§4.1), plus the RTU resync scanner (§4.1.5).

#[cfg(feature = "rtu")]
pub mod rtu;

#[cfg(feature = "ascii")]
pub mod ascii;

#[cfg(feature = "tcp")]
pub mod mbap;

#[cfg(feature = "rtu")]
pub mod resync;

use crate::error::ModbusError;
use crate::types::AduView;

/// Common interface implemented by every wire framer. Encoding writes into a
/// caller-supplied buffer and returns the number of bytes written; decoding
/// borrows from the caller's buffer and returns an [`AduView`].
pub trait Framer {
    /// Encodes `adu` into `out`, returning the number of bytes written.
    fn encode(&mut self, adu: AduView<'_>, out: &mut [u8]) -> Result<usize, ModbusError>;

    /// Decodes a complete frame out of `input`, returning the view and the
    /// number of input bytes consumed.
    fn decode<'a>(&mut self, input: &'a [u8]) -> Result<(AduView<'a>, usize), ModbusError>;
}

/// Which wire framing a client/server instance speaks. Fixed at
/// construction: one serial port or TCP socket never mixes framings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramingMode {
    #[cfg(feature = "rtu")]
    Rtu,
    #[cfg(feature = "ascii")]
    Ascii,
    #[cfg(feature = "tcp")]
    Tcp,
}

/// Outcome of attempting to decode a frame out of an accumulator buffer
/// that may not yet hold a complete frame.
pub enum FrameResult<'a> {
    /// Not enough bytes yet; keep accumulating.
    Incomplete,
    /// Enough bytes for a candidate frame, but it didn't validate
    /// (CRC/LRC mismatch or malformed structure). The caller should
    /// decide whether to resync or drop and keep waiting.
    Invalid,
    /// A complete, valid frame. `tid` is `Some` only for MBAP/TCP; `consumed`
    /// is the number of leading bytes of the accumulator this frame used.
    Frame {
        tid: Option<u16>,
        adu: AduView<'a>,
        consumed: usize,
    },
}

/// Encodes `adu` under `mode`, using `tid` only for [`FramingMode::Tcp`].
pub fn encode_frame(mode: FramingMode, tid: u16, adu: AduView<'_>, out: &mut [u8]) -> Result<usize, ModbusError> {
    match mode {
        #[cfg(feature = "rtu")]
        FramingMode::Rtu => rtu::encode(adu, out),
        #[cfg(feature = "ascii")]
        FramingMode::Ascii => ascii::encode(adu, out),
        #[cfg(feature = "tcp")]
        FramingMode::Tcp => mbap::encode(tid, adu, out),
    }
}

/// Attempts to decode one frame out of the leading bytes of `buf`, which may
/// hold a partial frame, exactly one frame, or one frame plus the start of
/// the next.
pub fn try_decode_frame(mode: FramingMode, buf: &[u8]) -> FrameResult<'_> {
    match mode {
        #[cfg(feature = "rtu")]
        FramingMode::Rtu => {
            if buf.len() < rtu::MIN_RTU_FRAME {
                return FrameResult::Incomplete;
            }
            match rtu::decode(buf) {
                Ok(adu) => FrameResult::Frame {
                    tid: None,
                    adu,
                    consumed: buf.len(),
                },
                Err(ModbusError::Crc) => FrameResult::Invalid,
                Err(_) => FrameResult::Incomplete,
            }
        }
        #[cfg(feature = "ascii")]
        FramingMode::Ascii => {
            if !buf.ends_with(b"\r\n") {
                return FrameResult::Incomplete;
            }
            match ascii::decode(buf) {
                Ok(adu) => FrameResult::Frame {
                    tid: None,
                    adu,
                    consumed: buf.len(),
                },
                Err(_) => FrameResult::Invalid,
            }
        }
        #[cfg(feature = "tcp")]
        FramingMode::Tcp => {
            let expected = mbap::expected_length(buf);
            if expected == 0 || buf.len() < expected {
                return FrameResult::Incomplete;
            }
            match mbap::decode(&buf[..expected]) {
                Ok((header, adu)) => FrameResult::Frame {
                    tid: Some(header.transaction_id),
                    adu,
                    consumed: expected,
                },
                Err(_) => FrameResult::Invalid,
            }
        }
    }
}
