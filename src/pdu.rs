//! Protocol Data Unit codec: builders/parsers for FC 01/02/03/04/05/06/0F/10/17
//! and exception responses, with the exhaustive bounds checks from §4.2.

use crate::error::ModbusError;
use crate::types::MAX_PAYLOAD_LEN;

/// Function code constants (§4.2 table).
pub mod fc {
    pub const READ_COILS: u8 = 0x01;
    pub const READ_DISCRETE_INPUTS: u8 = 0x02;
    pub const READ_HOLDING_REGISTERS: u8 = 0x03;
    pub const READ_INPUT_REGISTERS: u8 = 0x04;
    pub const WRITE_SINGLE_COIL: u8 = 0x05;
    pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
    pub const WRITE_MULTIPLE_COILS: u8 = 0x0F;
    pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;
    pub const READ_WRITE_MULTIPLE_REGISTERS: u8 = 0x17;

    /// True if `function` (with the exception bit cleared) is one of the
    /// mandatory FCs this crate implements.
    pub fn is_supported(function: u8) -> bool {
        matches!(
            function & 0x7F,
            READ_COILS
                | READ_DISCRETE_INPUTS
                | READ_HOLDING_REGISTERS
                | READ_INPUT_REGISTERS
                | WRITE_SINGLE_COIL
                | WRITE_SINGLE_REGISTER
                | WRITE_MULTIPLE_COILS
                | WRITE_MULTIPLE_REGISTERS
                | READ_WRITE_MULTIPLE_REGISTERS
        )
    }
}

fn be16(hi: u8, lo: u8) -> u16 {
    ((hi as u16) << 8) | lo as u16
}

fn push_be16(out: &mut [u8], value: u16) {
    let b = value.to_be_bytes();
    out[0] = b[0];
    out[1] = b[1];
}

// =========================================================================
// Exceptions
// =========================================================================

/// Builds an exception response payload: `function|0x80` + 1-byte code.
/// Returns the total PDU length written to `out` (always 2).
pub fn build_exception(function: u8, code: u8, out: &mut [u8]) -> Result<usize, ModbusError> {
    if out.len() < 2 {
        return Err(ModbusError::InvalidArgument);
    }
    out[0] = function | 0x80;
    out[1] = code;
    Ok(2)
}

/// Parses an exception PDU (`function` already stripped). Validates the
/// single-byte payload invariant (§3 PDU invariant).
pub fn parse_exception(payload: &[u8]) -> Result<u8, ModbusError> {
    if payload.len() != 1 {
        return Err(ModbusError::InvalidRequest);
    }
    let code = payload[0];
    if crate::error::ExceptionCode::from_u8(code).is_none() {
        return Err(ModbusError::InvalidRequest);
    }
    Ok(code)
}

// =========================================================================
// Read requests (FC 01/02/03/04)
// =========================================================================

/// Per-FC request/response quantity and address bounds (§4.2 table).
fn read_quantity_bounds(function: u8) -> (u16, u16) {
    match function {
        fc::READ_COILS | fc::READ_DISCRETE_INPUTS => (1, 2000),
        fc::READ_HOLDING_REGISTERS | fc::READ_INPUT_REGISTERS => (1, 125),
        _ => (0, 0),
    }
}

/// Validates address/quantity for a read request, returning the Modbus
/// exception code on violation (caller decides InvalidArgument vs wire
/// exception depending on whether it's building locally or dispatching).
fn validate_read(function: u8, address: u16, quantity: u16) -> Result<(), u8> {
    let (min, max) = read_quantity_bounds(function);
    if quantity < min || quantity > max {
        return Err(0x03); // IllegalDataValue
    }
    if (address as u32) + (quantity as u32) > 0x1_0000 {
        return Err(0x02); // IllegalDataAddress
    }
    Ok(())
}

/// Builds a read request payload (addr + qty, 4 bytes) for FC 01/02/03/04.
pub fn build_read_request(
    function: u8,
    address: u16,
    quantity: u16,
    out: &mut [u8],
) -> Result<usize, ModbusError> {
    validate_read(function, address, quantity).map_err(|_| ModbusError::InvalidArgument)?;
    if out.len() < 4 {
        return Err(ModbusError::InvalidArgument);
    }
    push_be16(&mut out[0..2], address);
    push_be16(&mut out[2..4], quantity);
    Ok(4)
}

/// Parses a read request payload, returning `(address, quantity)` or the
/// exception code to respond with.
pub fn parse_read_request(function: u8, payload: &[u8]) -> Result<(u16, u16), u8> {
    if payload.len() != 4 {
        return Err(0x03);
    }
    let address = be16(payload[0], payload[1]);
    let quantity = be16(payload[2], payload[3]);
    validate_read(function, address, quantity)?;
    Ok((address, quantity))
}

/// Packs `bits.len()` boolean values LSB-first into bytes (§4.3.2 point 4).
pub fn pack_bits(bits: &[bool], out: &mut [u8]) -> usize {
    let byte_count = bits.len().div_ceil(8);
    for chunk in out.iter_mut().take(byte_count) {
        *chunk = 0;
    }
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            out[i / 8] |= 1 << (i % 8);
        }
    }
    byte_count
}

/// Unpacks `count` LSB-first bits from `data` into `out`.
pub fn unpack_bits(data: &[u8], count: usize, out: &mut [bool]) {
    for i in 0..count {
        out[i] = data[i / 8] & (1 << (i % 8)) != 0;
    }
}

/// Builds a read-coils/discretes response: `byte_count` + packed bits.
pub fn build_bits_response(bits: &[bool], out: &mut [u8]) -> Result<usize, ModbusError> {
    let byte_count = bits.len().div_ceil(8);
    if byte_count > MAX_PAYLOAD_LEN - 1 || out.len() < 1 + byte_count {
        return Err(ModbusError::InvalidArgument);
    }
    out[0] = byte_count as u8;
    pack_bits(bits, &mut out[1..1 + byte_count]);
    Ok(1 + byte_count)
}

/// Parses a read-coils/discretes response payload, validating
/// `byte_count == ceil(quantity / 8)` and unpacking into `out`.
pub fn parse_bits_response(payload: &[u8], quantity: u16, out: &mut [bool]) -> Result<(), ModbusError> {
    if payload.is_empty() {
        return Err(ModbusError::InvalidRequest);
    }
    let byte_count = payload[0] as usize;
    let expected = (quantity as usize).div_ceil(8);
    if byte_count != expected || payload.len() != 1 + byte_count {
        return Err(ModbusError::InvalidRequest);
    }
    unpack_bits(&payload[1..], quantity as usize, out);
    Ok(())
}

/// Zero-copy view over a packed register response payload.
#[derive(Debug, Clone, Copy)]
pub struct Registers<'a> {
    data: &'a [u8],
}

impl<'a> Registers<'a> {
    pub fn len(&self) -> usize {
        self.data.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<u16> {
        let offset = index * 2;
        if offset + 1 >= self.data.len() {
            return None;
        }
        Some(be16(self.data[offset], self.data[offset + 1]))
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + 'a {
        let data = self.data;
        (0..data.len() / 2).map(move |i| be16(data[i * 2], data[i * 2 + 1]))
    }
}

/// Builds a read-registers response: `byte_count` + big-endian u16 values.
pub fn build_registers_response(values: &[u16], out: &mut [u8]) -> Result<usize, ModbusError> {
    let byte_count = values.len() * 2;
    if byte_count > MAX_PAYLOAD_LEN - 1 || out.len() < 1 + byte_count {
        return Err(ModbusError::InvalidArgument);
    }
    out[0] = byte_count as u8;
    for (i, &v) in values.iter().enumerate() {
        push_be16(&mut out[1 + i * 2..1 + i * 2 + 2], v);
    }
    Ok(1 + byte_count)
}

/// Parses a read-registers response payload into a zero-copy [`Registers`]
/// view, validating `byte_count == 2 * quantity`.
pub fn parse_registers_response(payload: &[u8], quantity: u16) -> Result<Registers<'_>, ModbusError> {
    if payload.is_empty() {
        return Err(ModbusError::InvalidRequest);
    }
    let byte_count = payload[0] as usize;
    if byte_count != quantity as usize * 2 || payload.len() != 1 + byte_count {
        return Err(ModbusError::InvalidRequest);
    }
    Ok(Registers {
        data: &payload[1..],
    })
}

// =========================================================================
// Write single coil / register (FC 05 / 06)
// =========================================================================

/// Builds a write-single-coil request payload. `value` becomes `0xFF00`
/// (on) or `0x0000` (off) per §4.2.
pub fn build_write_single_coil(address: u16, value: bool, out: &mut [u8]) -> Result<usize, ModbusError> {
    if out.len() < 4 {
        return Err(ModbusError::InvalidArgument);
    }
    push_be16(&mut out[0..2], address);
    push_be16(&mut out[2..4], if value { 0xFF00 } else { 0x0000 });
    Ok(4)
}

/// Parses a write-single-coil request/response payload, rejecting any
/// value other than `0x0000`/`0xFF00` (§4.2).
pub fn parse_write_single_coil(payload: &[u8]) -> Result<(u16, bool), u8> {
    if payload.len() != 4 {
        return Err(0x03);
    }
    let address = be16(payload[0], payload[1]);
    let raw = be16(payload[2], payload[3]);
    match raw {
        0xFF00 => Ok((address, true)),
        0x0000 => Ok((address, false)),
        _ => Err(0x03), // IllegalDataValue
    }
}

/// Builds a write-single-register request/response payload (echo shape).
pub fn build_write_single_register(address: u16, value: u16, out: &mut [u8]) -> Result<usize, ModbusError> {
    if out.len() < 4 {
        return Err(ModbusError::InvalidArgument);
    }
    push_be16(&mut out[0..2], address);
    push_be16(&mut out[2..4], value);
    Ok(4)
}

/// Parses a write-single-register request/response payload.
pub fn parse_write_single_register(payload: &[u8]) -> Result<(u16, u16), u8> {
    if payload.len() != 4 {
        return Err(0x03);
    }
    Ok((be16(payload[0], payload[1]), be16(payload[2], payload[3])))
}

// =========================================================================
// Write multiple coils (FC 0F)
// =========================================================================

fn validate_write_multiple_coils(address: u16, quantity: u16, byte_count: u8) -> Result<(), u8> {
    if quantity < 1 || quantity > 1968 {
        return Err(0x03);
    }
    if byte_count as usize != (quantity as usize).div_ceil(8) {
        return Err(0x03);
    }
    if (address as u32) + (quantity as u32) > 0x1_0000 {
        return Err(0x02);
    }
    Ok(())
}

/// Builds a write-multiple-coils request payload.
pub fn build_write_multiple_coils(
    address: u16,
    bits: &[bool],
    out: &mut [u8],
) -> Result<usize, ModbusError> {
    let quantity = bits.len() as u16;
    let byte_count = bits.len().div_ceil(8);
    validate_write_multiple_coils(address, quantity, byte_count as u8)
        .map_err(|_| ModbusError::InvalidArgument)?;
    if out.len() < 5 + byte_count {
        return Err(ModbusError::InvalidArgument);
    }
    push_be16(&mut out[0..2], address);
    push_be16(&mut out[2..4], quantity);
    out[4] = byte_count as u8;
    pack_bits(bits, &mut out[5..5 + byte_count]);
    Ok(5 + byte_count)
}

/// Parses a write-multiple-coils request payload, unpacking into `out`.
/// Returns the quantity on success, or the exception code on violation.
pub fn parse_write_multiple_coils(payload: &[u8], out: &mut [bool]) -> Result<(u16, u16), u8> {
    if payload.len() < 5 {
        return Err(0x03);
    }
    let address = be16(payload[0], payload[1]);
    let quantity = be16(payload[2], payload[3]);
    let byte_count = payload[4];
    validate_write_multiple_coils(address, quantity, byte_count)?;
    if payload.len() != 5 + byte_count as usize {
        return Err(0x03);
    }
    unpack_bits(&payload[5..], quantity as usize, out);
    Ok((address, quantity))
}

/// Builds the write-multiple-coils response (echoes address + quantity).
pub fn build_write_multiple_response(address: u16, quantity: u16, out: &mut [u8]) -> Result<usize, ModbusError> {
    if out.len() < 4 {
        return Err(ModbusError::InvalidArgument);
    }
    push_be16(&mut out[0..2], address);
    push_be16(&mut out[2..4], quantity);
    Ok(4)
}

/// Parses a write-multiple-{coils,registers} response (address + quantity echo).
pub fn parse_write_multiple_response(payload: &[u8]) -> Result<(u16, u16), ModbusError> {
    if payload.len() != 4 {
        return Err(ModbusError::InvalidRequest);
    }
    Ok((be16(payload[0], payload[1]), be16(payload[2], payload[3])))
}

// =========================================================================
// Write multiple registers (FC 10)
// =========================================================================

fn validate_write_multiple_registers(address: u16, quantity: u16, byte_count: u8) -> Result<(), u8> {
    if quantity < 1 || quantity > 123 {
        return Err(0x03);
    }
    if byte_count as usize != quantity as usize * 2 {
        return Err(0x03);
    }
    if (address as u32) + (quantity as u32) > 0x1_0000 {
        return Err(0x02);
    }
    Ok(())
}

/// Builds a write-multiple-registers request payload.
pub fn build_write_multiple_registers(
    address: u16,
    values: &[u16],
    out: &mut [u8],
) -> Result<usize, ModbusError> {
    let quantity = values.len() as u16;
    let byte_count = values.len() * 2;
    validate_write_multiple_registers(address, quantity, byte_count as u8)
        .map_err(|_| ModbusError::InvalidArgument)?;
    if out.len() < 5 + byte_count {
        return Err(ModbusError::InvalidArgument);
    }
    push_be16(&mut out[0..2], address);
    push_be16(&mut out[2..4], quantity);
    out[4] = byte_count as u8;
    for (i, &v) in values.iter().enumerate() {
        push_be16(&mut out[5 + i * 2..5 + i * 2 + 2], v);
    }
    Ok(5 + byte_count)
}

/// Parses a write-multiple-registers request payload into a zero-copy
/// [`Registers`] view.
pub fn parse_write_multiple_registers(payload: &[u8]) -> Result<(u16, Registers<'_>), u8> {
    if payload.len() < 5 {
        return Err(0x03);
    }
    let address = be16(payload[0], payload[1]);
    let quantity = be16(payload[2], payload[3]);
    let byte_count = payload[4];
    validate_write_multiple_registers(address, quantity, byte_count)?;
    if payload.len() != 5 + byte_count as usize {
        return Err(0x03);
    }
    Ok((address, Registers {
        data: &payload[5..],
    }))
}

// =========================================================================
// Read/Write multiple registers (FC 17)
// =========================================================================

/// Builds a read/write-multiple-registers request payload.
pub fn build_read_write_multiple_registers(
    read_address: u16,
    read_quantity: u16,
    write_address: u16,
    write_values: &[u16],
    out: &mut [u8],
) -> Result<usize, ModbusError> {
    if read_quantity < 1 || read_quantity > 125 {
        return Err(ModbusError::InvalidArgument);
    }
    let write_quantity = write_values.len() as u16;
    if write_quantity < 1 || write_quantity > 121 {
        return Err(ModbusError::InvalidArgument);
    }
    let byte_count = write_values.len() * 2;
    if out.len() < 9 + byte_count {
        return Err(ModbusError::InvalidArgument);
    }
    push_be16(&mut out[0..2], read_address);
    push_be16(&mut out[2..4], read_quantity);
    push_be16(&mut out[4..6], write_address);
    push_be16(&mut out[6..8], write_quantity);
    out[8] = byte_count as u8;
    for (i, &v) in write_values.iter().enumerate() {
        push_be16(&mut out[9 + i * 2..9 + i * 2 + 2], v);
    }
    Ok(9 + byte_count)
}

/// Parsed read/write-multiple-registers request.
pub struct ReadWriteRequest<'a> {
    pub read_address: u16,
    pub read_quantity: u16,
    pub write_address: u16,
    pub write_values: Registers<'a>,
}

/// Parses a read/write-multiple-registers request payload.
pub fn parse_read_write_multiple_registers(payload: &[u8]) -> Result<ReadWriteRequest<'_>, u8> {
    if payload.len() < 9 {
        return Err(0x03);
    }
    let read_address = be16(payload[0], payload[1]);
    let read_quantity = be16(payload[2], payload[3]);
    let write_address = be16(payload[4], payload[5]);
    let write_quantity = be16(payload[6], payload[7]);
    let byte_count = payload[8];

    if read_quantity < 1 || read_quantity > 125 {
        return Err(0x03);
    }
    if write_quantity < 1 || write_quantity > 121 {
        return Err(0x03);
    }
    if byte_count as usize != write_quantity as usize * 2 {
        return Err(0x03);
    }
    if payload.len() != 9 + byte_count as usize {
        return Err(0x03);
    }
    if (read_address as u32) + (read_quantity as u32) > 0x1_0000
        || (write_address as u32) + (write_quantity as u32) > 0x1_0000
    {
        return Err(0x02);
    }

    Ok(ReadWriteRequest {
        read_address,
        read_quantity,
        write_address,
        write_values: Registers {
            data: &payload[9..],
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_holding_registers_round_trip() {
        let mut req = [0u8; 8];
        let n = build_read_request(fc::READ_HOLDING_REGISTERS, 0, 4, &mut req).unwrap();
        let (addr, qty) = parse_read_request(fc::READ_HOLDING_REGISTERS, &req[..n]).unwrap();
        assert_eq!((addr, qty), (0, 4));

        let mut resp = [0u8; 16];
        let n = build_registers_response(&[0x1000, 0x1100, 0x1200, 0x1300], &mut resp).unwrap();
        assert_eq!(&resp[..n], &[0x08, 0x10, 0x00, 0x11, 0x00, 0x12, 0x00, 0x13, 0x00]);
        let regs = parse_registers_response(&resp[..n], 4).unwrap();
        let values: heapless::Vec<u16, 4> = regs.iter().collect();
        assert_eq!(values.as_slice(), [0x1000, 0x1100, 0x1200, 0x1300]);
    }

    #[test]
    fn read_quantity_out_of_range() {
        let mut req = [0u8; 8];
        assert!(build_read_request(fc::READ_HOLDING_REGISTERS, 0, 0, &mut req).is_err());
        assert!(build_read_request(fc::READ_HOLDING_REGISTERS, 0, 126, &mut req).is_err());
        assert!(build_read_request(fc::READ_COILS, 0, 2001, &mut req).is_err());
    }

    #[test]
    fn address_plus_quantity_overflow_is_illegal_address() {
        assert_eq!(
            parse_read_request(fc::READ_HOLDING_REGISTERS, &[0xFF, 0xFF, 0x00, 0x02]),
            Err(0x02)
        );
    }

    #[test]
    fn write_single_coil_rejects_bad_value() {
        assert_eq!(
            parse_write_single_coil(&[0x00, 0x00, 0x12, 0x34]),
            Err(0x03)
        );
        assert_eq!(
            parse_write_single_coil(&[0x00, 0x00, 0xFF, 0x00]),
            Ok((0, true))
        );
    }

    #[test]
    fn write_multiple_coils_round_trip() {
        let bits = [true, false, true, true, false, false, false, false, true];
        let mut req = [0u8; 16];
        let n = build_write_multiple_coils(0, &bits, &mut req).unwrap();
        assert_eq!(req[4], 2); // byte_count = ceil(9/8) = 2

        let mut out = [false; 9];
        let (addr, qty) = parse_write_multiple_coils(&req[..n], &mut out).unwrap();
        assert_eq!((addr, qty), (0, 9));
        assert_eq!(out, bits);
    }

    #[test]
    fn write_multiple_registers_round_trip() {
        let values = [0xAAAA, 0xBBBB, 0xCCCC];
        let mut req = [0u8; 16];
        let n = build_write_multiple_registers(10, &values, &mut req).unwrap();
        let (addr, regs) = parse_write_multiple_registers(&req[..n]).unwrap();
        assert_eq!(addr, 10);
        assert_eq!(regs.len(), 3);
        assert_eq!(regs.get(1), Some(0xBBBB));
    }

    #[test]
    fn read_write_multiple_registers_round_trip() {
        let write_values = [0x0001, 0x0002];
        let mut req = [0u8; 32];
        let n = build_read_write_multiple_registers(0, 4, 10, &write_values, &mut req).unwrap();
        let parsed = parse_read_write_multiple_registers(&req[..n]).unwrap();
        assert_eq!(parsed.read_address, 0);
        assert_eq!(parsed.read_quantity, 4);
        assert_eq!(parsed.write_address, 10);
        assert_eq!(parsed.write_values.get(0), Some(0x0001));
    }

    #[test]
    fn exception_round_trip() {
        let mut out = [0u8; 4];
        let n = build_exception(fc::WRITE_SINGLE_REGISTER, 0x02, &mut out).unwrap();
        assert_eq!(&out[..n], &[0x86, 0x02]);
        assert_eq!(parse_exception(&out[1..n]), Ok(0x02));
    }
}
