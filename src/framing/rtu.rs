//! Modbus RTU framing: `unit | function | payload | CRC16_LE` (§4.1.2).

use crate::checksum::crc16;
use crate::error::ModbusError;
use crate::types::AduView;

/// Minimum valid RTU frame length: unit + function + 2-byte CRC.
pub const MIN_RTU_FRAME: usize = 4;

/// Encodes `adu` as an RTU frame into `out`. Returns the number of bytes
/// written. Fails with [`ModbusError::InvalidArgument`] if the PDU would
/// exceed the 253-byte limit or `out` is too small.
pub fn encode(adu: AduView<'_>, out: &mut [u8]) -> Result<usize, ModbusError> {
    let pdu_len = 1 + adu.payload.len();
    if pdu_len > crate::types::MAX_PDU_LEN {
        return Err(ModbusError::InvalidArgument);
    }
    let total = 1 + pdu_len + 2;
    if out.len() < total {
        return Err(ModbusError::InvalidArgument);
    }

    out[0] = adu.unit_id;
    out[1] = adu.function;
    out[2..2 + adu.payload.len()].copy_from_slice(adu.payload);

    let crc = crc16(&out[..1 + pdu_len]);
    let crc_bytes = crc.to_le_bytes();
    out[1 + pdu_len] = crc_bytes[0];
    out[1 + pdu_len + 1] = crc_bytes[1];

    Ok(total)
}

/// Decodes an RTU frame from `input`. The entire slice is treated as one
/// candidate frame (callers that need resync should run [`super::resync`]
/// first). Fails with [`ModbusError::InvalidArgument`] if too short, or
/// [`ModbusError::Crc`] on checksum mismatch.
pub fn decode(input: &[u8]) -> Result<AduView<'_>, ModbusError> {
    if input.len() < MIN_RTU_FRAME {
        return Err(ModbusError::InvalidArgument);
    }

    let body_len = input.len() - 2;
    let computed = crc16(&input[..body_len]);
    let wire = u16::from_le_bytes([input[body_len], input[body_len + 1]]);
    if computed != wire {
        return Err(ModbusError::Crc);
    }

    Ok(AduView::new(input[0], input[1], &input[2..body_len]))
}

/// Inter-character and inter-frame silence timing, in microseconds (§4.1.2).
///
/// Above 19200 baud the Modbus specification fixes T1.5/T3.5 at 750us/1.75ms
/// regardless of baud rate; below that they scale with the character time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtuTiming {
    pub t1_5_us: u32,
    pub t3_5_us: u32,
}

impl RtuTiming {
    /// Derives silence timing from a baud rate.
    pub fn from_baud(baud: u32) -> Self {
        if baud > 19_200 {
            Self {
                t1_5_us: 750,
                t3_5_us: 1_750,
            }
        } else {
            // character time = 11 bits / baud, in seconds; convert to us.
            let char_time_us = (11_000_000u64) / baud as u64;
            Self {
                t1_5_us: ((char_time_us * 3) / 2) as u32,
                t3_5_us: ((char_time_us * 7) / 2) as u32,
            }
        }
    }
}

/// Tracks inter-byte silence to decide whether enough quiet time has passed
/// to treat the next byte as the start of a new frame (§4.1.2).
#[derive(Debug, Clone, Copy)]
pub struct SilenceTracker {
    timing: RtuTiming,
    last_byte_us: Option<u64>,
}

impl SilenceTracker {
    pub fn new(timing: RtuTiming) -> Self {
        Self {
            timing,
            last_byte_us: None,
        }
    }

    /// Records that a byte arrived at `now_us`. Returns `true` if the gap
    /// since the previous byte was at least T3.5 (frame boundary).
    pub fn on_byte(&mut self, now_us: u64) -> bool {
        let boundary = match self.last_byte_us {
            Some(prev) => now_us.saturating_sub(prev) >= self.timing.t3_5_us as u64,
            None => true,
        };
        self.last_byte_us = Some(now_us);
        boundary
    }

    /// True if `now_us` is already at least T3.5 past the last observed byte
    /// (i.e. the line has gone idle and a pending frame can be accepted).
    pub fn is_idle(&self, now_us: u64) -> bool {
        match self.last_byte_us {
            Some(prev) => now_us.saturating_sub(prev) >= self.timing.t3_5_us as u64,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let adu = AduView::new(0x20, 0x03, &[0x00, 0x00, 0x00, 0x04]);
        let mut buf = [0u8; 16];
        let n = encode(adu, &mut buf).unwrap();
        assert_eq!(n, 8);
        let decoded = decode(&buf[..n]).unwrap();
        assert_eq!(decoded, adu);
    }

    #[test]
    fn scenario_1_wire_bytes() {
        // §8 scenario 1: FC03 unit 0x20, addr 0, qty 4.
        let adu = AduView::new(0x20, 0x03, &[0x00, 0x00, 0x00, 0x04]);
        let mut buf = [0u8; 16];
        let n = encode(adu, &mut buf).unwrap();
        assert_eq!(&buf[..n - 2], &[0x20, 0x03, 0x00, 0x00, 0x00, 0x04]);
    }

    #[test]
    fn rejects_short_frame() {
        assert_eq!(decode(&[0x01, 0x02, 0x03]), Err(ModbusError::InvalidArgument));
    }

    #[test]
    fn rejects_bad_crc() {
        let adu = AduView::new(0x20, 0x03, &[0x00, 0x00, 0x00, 0x04]);
        let mut buf = [0u8; 16];
        let n = encode(adu, &mut buf).unwrap();
        buf[n - 1] ^= 0xFF;
        assert_eq!(decode(&buf[..n]), Err(ModbusError::Crc));
    }

    #[test]
    fn rejects_oversized_buffer() {
        let mut out = [0u8; 2];
        let adu = AduView::new(1, 3, &[0, 0, 0, 4]);
        assert_eq!(encode(adu, &mut out), Err(ModbusError::InvalidArgument));
    }

    #[test]
    fn above_19200_uses_fixed_timing() {
        let t = RtuTiming::from_baud(115_200);
        assert_eq!(t.t1_5_us, 750);
        assert_eq!(t.t3_5_us, 1_750);
    }

    #[test]
    fn silence_tracker_detects_boundary() {
        let mut tracker = SilenceTracker::new(RtuTiming::from_baud(9600));
        assert!(tracker.on_byte(0));
        assert!(!tracker.on_byte(100)); // well within T1.5
        assert!(tracker.on_byte(100 + tracker.timing.t3_5_us as u64 + 1));
    }
}
