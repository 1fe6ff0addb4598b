//! Modbus TCP (MBAP) framing: `{transaction_id, protocol_id=0, length, unit_id}`
//! followed by the PDU, all big-endian (§4.1.4).

use crate::error::ModbusError;
use crate::types::AduView;

/// MBAP header length in bytes.
pub const MBAP_HEADER_LEN: usize = 7;

/// Encodes `adu` as an MBAP frame into `out`, using `transaction_id` as
/// supplied by the caller (the client FSM mints a fresh one per request;
/// the server echoes the one it received).
pub fn encode(
    transaction_id: u16,
    adu: AduView<'_>,
    out: &mut [u8],
) -> Result<usize, ModbusError> {
    let pdu_len = 1 + adu.payload.len();
    if pdu_len > crate::types::MAX_PDU_LEN {
        return Err(ModbusError::InvalidArgument);
    }
    let total = MBAP_HEADER_LEN + pdu_len;
    if out.len() < total {
        return Err(ModbusError::InvalidArgument);
    }

    let length = (1 + pdu_len) as u16; // unit_id + PDU
    out[0..2].copy_from_slice(&transaction_id.to_be_bytes());
    out[2..4].copy_from_slice(&0u16.to_be_bytes()); // protocol_id
    out[4..6].copy_from_slice(&length.to_be_bytes());
    out[6] = adu.unit_id;
    out[7] = adu.function;
    out[8..8 + adu.payload.len()].copy_from_slice(adu.payload);

    Ok(total)
}

/// Decoded MBAP header plus the transaction id, which callers need for
/// request/response matching but which has no place in an [`AduView`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub length: u16,
}

/// Decodes an MBAP frame from `input`. Fails with
/// [`ModbusError::InvalidArgument`] if too short, and
/// [`ModbusError::InvalidRequest`] if `protocol_id != 0` or the declared
/// `length` doesn't match the available bytes.
pub fn decode(input: &[u8]) -> Result<(MbapHeader, AduView<'_>), ModbusError> {
    if input.len() < MBAP_HEADER_LEN + 1 {
        return Err(ModbusError::InvalidArgument);
    }

    let transaction_id = u16::from_be_bytes([input[0], input[1]]);
    let protocol_id = u16::from_be_bytes([input[2], input[3]]);
    let length = u16::from_be_bytes([input[4], input[5]]);
    let unit_id = input[6];

    if protocol_id != 0 {
        return Err(ModbusError::InvalidRequest);
    }

    if length == 0 || (length as usize) > 1 + crate::types::MAX_PDU_LEN {
        return Err(ModbusError::InvalidRequest);
    }
    let expected_len = MBAP_HEADER_LEN + (length as usize - 1);
    if input.len() < expected_len {
        return Err(ModbusError::InvalidArgument);
    }

    let pdu = &input[MBAP_HEADER_LEN..expected_len];
    let header = MbapHeader {
        transaction_id,
        length,
    };
    Ok((
        header,
        AduView::new(unit_id, pdu[0], &pdu[1..]),
    ))
}

/// Computes the total frame length implied by a partial MBAP header, per
/// §4.1.4: `6 + length` once 6 bytes have been observed, else 0. This lets a
/// stream reader know exactly how many more bytes to wait for.
pub fn expected_length(partial: &[u8]) -> usize {
    if partial.len() < 6 {
        return 0;
    }
    let length = u16::from_be_bytes([partial[4], partial[5]]) as usize;
    6 + length
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let adu = AduView::new(0x01, 0x03, &[0x00, 0x00, 0x00, 0x04]);
        let mut buf = [0u8; 32];
        let n = encode(7, adu, &mut buf).unwrap();
        let (header, decoded) = decode(&buf[..n]).unwrap();
        assert_eq!(header.transaction_id, 7);
        assert_eq!(decoded, adu);
    }

    #[test]
    fn rejects_nonzero_protocol_id() {
        let adu = AduView::new(0x01, 0x03, &[0x00, 0x00, 0x00, 0x04]);
        let mut buf = [0u8; 32];
        let n = encode(7, adu, &mut buf).unwrap();
        buf[3] = 0x01; // protocol id low byte
        assert_eq!(decode(&buf[..n]), Err(ModbusError::InvalidRequest));
    }

    #[test]
    fn expected_length_waits_for_six_bytes() {
        let adu = AduView::new(0x01, 0x03, &[0x00, 0x00, 0x00, 0x04]);
        let mut buf = [0u8; 32];
        let n = encode(7, adu, &mut buf).unwrap();
        assert_eq!(expected_length(&buf[..5]), 0);
        assert_eq!(expected_length(&buf[..6]), n);
    }

    #[test]
    fn length_includes_unit_id_byte() {
        let adu = AduView::new(0x01, 0x03, &[0x00, 0x00, 0x00, 0x04]);
        let mut buf = [0u8; 32];
        let n = encode(7, adu, &mut buf).unwrap();
        let length = u16::from_be_bytes([buf[4], buf[5]]);
        let pdu_len = 1 + adu.payload.len();
        assert_eq!(length as usize, 1 + pdu_len);
        let _ = n;
    }
}
