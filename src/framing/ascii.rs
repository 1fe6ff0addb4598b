//! Modbus ASCII framing: `':' | hex(unit+fn+payload) | hex(LRC) | CR | LF`
//! (§4.1.3).

use crate::checksum::lrc;
use crate::error::ModbusError;
use crate::types::AduView;

const COLON: u8 = b':';
const CR: u8 = b'\r';
const LF: u8 = b'\n';

fn hex_nibble(n: u8) -> u8 {
    match n {
        0..=9 => b'0' + n,
        10..=15 => b'A' + (n - 10),
        _ => unreachable!(),
    }
}

fn write_hex_byte(byte: u8, out: &mut [u8]) {
    out[0] = hex_nibble(byte >> 4);
    out[1] = hex_nibble(byte & 0x0F);
}

fn hex_digit_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'F' => Some(c - b'A' + 10),
        b'a'..=b'f' => Some(c - b'a' + 10), // lowercase tolerated on decode
        _ => None,
    }
}

fn read_hex_byte(hi: u8, lo: u8) -> Option<u8> {
    Some((hex_digit_value(hi)? << 4) | hex_digit_value(lo)?)
}

/// Encodes `adu` as an ASCII frame into `out`. Returns bytes written.
pub fn encode(adu: AduView<'_>, out: &mut [u8]) -> Result<usize, ModbusError> {
    let pdu_len = 1 + adu.payload.len();
    if pdu_len > crate::types::MAX_PDU_LEN {
        return Err(ModbusError::InvalidArgument);
    }
    // 1 (':') + 2 hex chars per raw byte (unit+fn+payload+lrc) + CRLF
    let raw_len = 1 + pdu_len; // unit+fn+payload, not counting lrc yet
    let total = 1 + (raw_len + 1) * 2 + 2;
    if out.len() < total {
        return Err(ModbusError::InvalidArgument);
    }

    out[0] = COLON;
    let mut cursor = 1;

    write_hex_byte(adu.unit_id, &mut out[cursor..cursor + 2]);
    cursor += 2;
    write_hex_byte(adu.function, &mut out[cursor..cursor + 2]);
    cursor += 2;
    for &b in adu.payload {
        write_hex_byte(b, &mut out[cursor..cursor + 2]);
        cursor += 2;
    }

    let mut raw = [0u8; crate::types::MAX_PDU_LEN];
    raw[0] = adu.unit_id;
    raw[1] = adu.function;
    raw[2..2 + adu.payload.len()].copy_from_slice(adu.payload);
    let checksum = lrc(&raw[..raw_len]);
    write_hex_byte(checksum, &mut out[cursor..cursor + 2]);
    cursor += 2;

    out[cursor] = CR;
    out[cursor + 1] = LF;
    cursor += 2;

    Ok(cursor)
}

/// Decodes an ASCII frame from `input`. Fails with
/// [`ModbusError::InvalidRequest`] on structural errors (bad leading `:`,
/// missing CRLF, odd/invalid hex digits, too short) and [`ModbusError::Crc`]
/// on LRC mismatch.
pub fn decode(input: &[u8]) -> Result<AduView<'_>, ModbusError> {
    if input.len() < 1 + 6 + 2 {
        return Err(ModbusError::InvalidRequest);
    }
    if input[0] != COLON {
        return Err(ModbusError::InvalidRequest);
    }
    let tail = &input[input.len() - 2..];
    if tail[0] != CR || tail[1] != LF {
        return Err(ModbusError::InvalidRequest);
    }

    let hex = &input[1..input.len() - 2];
    if hex.len() % 2 != 0 || hex.len() < 6 {
        return Err(ModbusError::InvalidRequest);
    }

    let raw_len = hex.len() / 2;
    let mut raw = [0u8; crate::types::MAX_PDU_LEN + 1];
    if raw_len > raw.len() {
        return Err(ModbusError::InvalidRequest);
    }
    for i in 0..raw_len {
        raw[i] = read_hex_byte(hex[2 * i], hex[2 * i + 1]).ok_or(ModbusError::InvalidRequest)?;
    }

    // Last decoded byte is the LRC; everything before it is unit+fn+payload.
    let body = &raw[..raw_len - 1];
    let wire_lrc = raw[raw_len - 1];
    if lrc(body) != wire_lrc {
        return Err(ModbusError::Crc);
    }

    Ok(AduView::new(body[0], body[1], &body[2..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let adu = AduView::new(0x20, 0x03, &[0x00, 0x00, 0x00, 0x04]);
        let mut buf = [0u8; 32];
        let n = encode(adu, &mut buf).unwrap();
        assert_eq!(&buf[..1], b":");
        assert_eq!(&buf[n - 2..n], b"\r\n");
        let decoded = decode(&buf[..n]).unwrap();
        assert_eq!(decoded, adu);
    }

    #[test]
    fn lowercase_hex_tolerated() {
        let adu = AduView::new(0x20, 0x03, &[0x00, 0x00, 0x00, 0x04]);
        let mut buf = [0u8; 32];
        let n = encode(adu, &mut buf).unwrap();
        let mut lower = buf;
        for b in &mut lower[..n] {
            if b.is_ascii_uppercase() {
                *b = b.to_ascii_lowercase();
            }
        }
        let decoded = decode(&lower[..n]).unwrap();
        assert_eq!(decoded, adu);
    }

    #[test]
    fn rejects_missing_colon() {
        let mut buf = *b"20030000000409\r\n";
        assert_eq!(decode(&mut buf), Err(ModbusError::InvalidRequest));
    }

    #[test]
    fn rejects_bad_lrc() {
        let adu = AduView::new(0x20, 0x03, &[0x00, 0x00, 0x00, 0x04]);
        let mut buf = [0u8; 32];
        let n = encode(adu, &mut buf).unwrap();
        buf[5] = b'F'; // corrupt a payload hex digit, keeps framing intact
        buf[6] = b'F';
        assert_eq!(decode(&buf[..n]), Err(ModbusError::Crc));
    }
}
