//! RTU frame codec: ADU parsing, typed request decoding, response encoding.
//!
//! An ADU is `slave(1) | function(1) | payload(var) | crc_lo(1) | crc_hi(1)`.
//! Parsing is two-staged: [`parse_adu`] strips and checks the envelope
//! (length, CRC, slave address), [`decode_body`] turns the PDU payload into
//! a typed [`Operation`] with the protocol limit checks applied.

use thiserror::Error;

use crate::codec;
use crate::crc::crc16;
use crate::store::BankKind;

/// Smallest possible ADU: slave address, function code, CRC.
pub const MIN_ADU_LEN: usize = 4;

/// Largest ADU allowed by Modbus RTU.
pub const MAX_ADU_LEN: usize = 256;

/// Limit on coils/discrete inputs per read (function codes 0x01/0x02).
pub const MAX_READ_BITS: u16 = 2000;
/// Limit on registers per read (function codes 0x03/0x04).
pub const MAX_READ_WORDS: u16 = 125;
/// Limit on coils per multi-write (function code 0x0F).
pub const MAX_WRITE_BITS: u16 = 1968;
/// Limit on registers per multi-write (function code 0x10).
pub const MAX_WRITE_WORDS: u16 = 123;

/// Reasons an ADU is dropped without any response on the wire.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("ADU of {0} bytes is shorter than the {MIN_ADU_LEN}-byte minimum")]
    TooShort(usize),

    #[error("CRC mismatch: received {received:#06x}, computed {computed:#06x}")]
    BadChecksum { received: u16, computed: u16 },

    #[error("slave address {0} is not served")]
    WrongSlave(u8),
}

/// Why a PDU failed to decode into an [`Operation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// PDU shorter than the minimum shape for its function code. The frame
    /// is dropped without a response.
    Malformed,
    /// Quantity, byte count, or write value outside the protocol limits.
    IllegalValue,
}

/// The function codes this slave implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionCode {
    ReadCoils = 0x01,
    ReadDiscreteInputs = 0x02,
    ReadHoldingRegisters = 0x03,
    ReadInputRegisters = 0x04,
    WriteSingleCoil = 0x05,
    WriteSingleRegister = 0x06,
    WriteMultipleCoils = 0x0F,
    WriteMultipleRegisters = 0x10,
}

impl FunctionCode {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0x01 => Some(Self::ReadCoils),
            0x02 => Some(Self::ReadDiscreteInputs),
            0x03 => Some(Self::ReadHoldingRegisters),
            0x04 => Some(Self::ReadInputRegisters),
            0x05 => Some(Self::WriteSingleCoil),
            0x06 => Some(Self::WriteSingleRegister),
            0x0F => Some(Self::WriteMultipleCoils),
            0x10 => Some(Self::WriteMultipleRegisters),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// The bank this function operates on.
    pub fn bank(self) -> BankKind {
        match self {
            Self::ReadCoils | Self::WriteSingleCoil | Self::WriteMultipleCoils => BankKind::Coil,
            Self::ReadDiscreteInputs => BankKind::DiscreteInput,
            Self::ReadHoldingRegisters | Self::WriteSingleRegister | Self::WriteMultipleRegisters => {
                BankKind::Holding
            }
            Self::ReadInputRegisters => BankKind::Input,
        }
    }

    pub fn is_write(self) -> bool {
        matches!(
            self,
            Self::WriteSingleCoil
                | Self::WriteSingleRegister
                | Self::WriteMultipleCoils
                | Self::WriteMultipleRegisters
        )
    }
}

/// Standard Modbus exception codes emitted by this slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExceptionCode {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    SlaveDeviceFailure = 0x04,
}

/// A CRC-checked request frame addressed to one of the served slaves.
///
/// `function` stays raw so the dispatcher can answer ILLEGAL_FUNCTION for
/// codes outside [`FunctionCode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub slave: u8,
    pub function: u8,
    /// Payload after the function byte, CRC stripped.
    pub pdu: Vec<u8>,
}

/// A fully decoded, limit-checked request operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    ReadCoils { start: u16, quantity: u16 },
    ReadDiscreteInputs { start: u16, quantity: u16 },
    ReadHoldingRegisters { start: u16, quantity: u16 },
    ReadInputRegisters { start: u16, quantity: u16 },
    WriteSingleCoil { address: u16, on: bool },
    WriteSingleRegister { address: u16, value: u16 },
    WriteMultipleCoils { start: u16, values: Vec<bool> },
    WriteMultipleRegisters { start: u16, values: Vec<u16> },
}

/// Check the envelope of a received ADU and strip it down to a [`Frame`].
pub fn parse_adu(adu: &[u8], served: &[u8]) -> Result<Frame, FrameError> {
    if adu.len() < MIN_ADU_LEN {
        return Err(FrameError::TooShort(adu.len()));
    }

    let split = adu.len() - 2;
    let received = u16::from_le_bytes([adu[split], adu[split + 1]]);
    let computed = crc16(&adu[..split]);
    if received != computed {
        return Err(FrameError::BadChecksum { received, computed });
    }

    let slave = adu[0];
    if !served.contains(&slave) {
        return Err(FrameError::WrongSlave(slave));
    }

    Ok(Frame {
        slave,
        function: adu[1],
        pdu: adu[2..split].to_vec(),
    })
}

/// Decode a PDU payload into a typed operation, enforcing quantity limits
/// and the write-single-coil value convention.
pub fn decode_body(function: FunctionCode, pdu: &[u8]) -> Result<Operation, DecodeError> {
    if pdu.len() < 4 {
        return Err(DecodeError::Malformed);
    }
    let start = u16::from_be_bytes([pdu[0], pdu[1]]);
    let word = u16::from_be_bytes([pdu[2], pdu[3]]);

    match function {
        FunctionCode::ReadCoils | FunctionCode::ReadDiscreteInputs => {
            if !(1..=MAX_READ_BITS).contains(&word) {
                return Err(DecodeError::IllegalValue);
            }
            Ok(match function {
                FunctionCode::ReadCoils => Operation::ReadCoils { start, quantity: word },
                _ => Operation::ReadDiscreteInputs { start, quantity: word },
            })
        }
        FunctionCode::ReadHoldingRegisters | FunctionCode::ReadInputRegisters => {
            if !(1..=MAX_READ_WORDS).contains(&word) {
                return Err(DecodeError::IllegalValue);
            }
            Ok(match function {
                FunctionCode::ReadHoldingRegisters => {
                    Operation::ReadHoldingRegisters { start, quantity: word }
                }
                _ => Operation::ReadInputRegisters { start, quantity: word },
            })
        }
        FunctionCode::WriteSingleCoil => {
            // only the two canonical patterns are valid coil states
            match word {
                0x0000 => Ok(Operation::WriteSingleCoil { address: start, on: false }),
                0xFF00 => Ok(Operation::WriteSingleCoil { address: start, on: true }),
                _ => Err(DecodeError::IllegalValue),
            }
        }
        FunctionCode::WriteSingleRegister => {
            Ok(Operation::WriteSingleRegister { address: start, value: word })
        }
        FunctionCode::WriteMultipleCoils => {
            let data = multi_write_data(pdu, word, MAX_WRITE_BITS, (word as usize + 7) / 8)?;
            Ok(Operation::WriteMultipleCoils {
                start,
                values: codec::unpack_bits(data, word as usize),
            })
        }
        FunctionCode::WriteMultipleRegisters => {
            let data = multi_write_data(pdu, word, MAX_WRITE_WORDS, word as usize * 2)?;
            Ok(Operation::WriteMultipleRegisters {
                start,
                values: codec::unpack_words(data),
            })
        }
    }
}

/// Validate the quantity and byte-count of a multi-write PDU and return its
/// data block.
fn multi_write_data(
    pdu: &[u8],
    quantity: u16,
    max_quantity: u16,
    expected_bytes: usize,
) -> Result<&[u8], DecodeError> {
    if pdu.len() < 5 {
        return Err(DecodeError::Malformed);
    }
    let byte_count = pdu[4] as usize;
    if !(1..=max_quantity).contains(&quantity) || byte_count != expected_bytes {
        return Err(DecodeError::IllegalValue);
    }
    if pdu.len() < 5 + byte_count {
        return Err(DecodeError::Malformed);
    }
    Ok(&pdu[5..5 + byte_count])
}

fn finish_adu(mut adu: Vec<u8>) -> Vec<u8> {
    let crc = crc16(&adu);
    adu.extend_from_slice(&crc.to_le_bytes());
    adu
}

/// Build a read response: `slave | func | byte_count | payload | crc`.
pub fn encode_read_response(slave: u8, function: FunctionCode, payload: &[u8]) -> Vec<u8> {
    let mut adu = Vec::with_capacity(3 + payload.len() + 2);
    adu.push(slave);
    adu.push(function.as_u8());
    adu.push(payload.len() as u8);
    adu.extend_from_slice(payload);
    finish_adu(adu)
}

/// Build a write echo: `slave | func | start | quantity-or-value | crc`.
pub fn encode_write_echo(slave: u8, function: FunctionCode, start: u16, word: u16) -> Vec<u8> {
    let mut adu = Vec::with_capacity(8);
    adu.push(slave);
    adu.push(function.as_u8());
    adu.extend_from_slice(&start.to_be_bytes());
    adu.extend_from_slice(&word.to_be_bytes());
    finish_adu(adu)
}

/// Build an exception: `slave | func|0x80 | code | crc`.
pub fn encode_exception(slave: u8, function: u8, code: ExceptionCode) -> Vec<u8> {
    finish_adu(vec![slave, function | 0x80, code as u8])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_crc(bytes: &[u8]) -> Vec<u8> {
        finish_adu(bytes.to_vec())
    }

    #[test]
    fn test_parse_valid_adu() {
        let adu = [0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B];
        let frame = parse_adu(&adu, &[1]).unwrap();
        assert_eq!(frame.slave, 0x01);
        assert_eq!(frame.function, 0x03);
        assert_eq!(frame.pdu, vec![0x00, 0x00, 0x00, 0x02]);
    }

    #[test]
    fn test_parse_rejects_short_adu() {
        assert_eq!(parse_adu(&[0x01, 0x03, 0x00], &[1]), Err(FrameError::TooShort(3)));
    }

    #[test]
    fn test_parse_rejects_bad_crc() {
        let mut adu = with_crc(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02]);
        let last = adu.len() - 1;
        adu[last] ^= 0xFF;
        assert!(matches!(
            parse_adu(&adu, &[1]),
            Err(FrameError::BadChecksum { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_foreign_slave() {
        let adu = with_crc(&[0x07, 0x03, 0x00, 0x00, 0x00, 0x02]);
        assert_eq!(parse_adu(&adu, &[1, 2]), Err(FrameError::WrongSlave(0x07)));
    }

    #[test]
    fn test_parse_accepts_any_served_address() {
        let adu = with_crc(&[0x02, 0x01, 0x00, 0x00, 0x00, 0x01]);
        assert_eq!(parse_adu(&adu, &[1, 2]).unwrap().slave, 0x02);
    }

    #[test]
    fn test_function_code_classification() {
        assert_eq!(FunctionCode::from_u8(0x01), Some(FunctionCode::ReadCoils));
        assert_eq!(FunctionCode::from_u8(0x10), Some(FunctionCode::WriteMultipleRegisters));
        assert_eq!(FunctionCode::from_u8(0x07), None);

        assert_eq!(FunctionCode::ReadCoils.bank(), BankKind::Coil);
        assert_eq!(FunctionCode::ReadDiscreteInputs.bank(), BankKind::DiscreteInput);
        assert_eq!(FunctionCode::WriteSingleRegister.bank(), BankKind::Holding);
        assert_eq!(FunctionCode::ReadInputRegisters.bank(), BankKind::Input);

        assert!(FunctionCode::WriteMultipleCoils.is_write());
        assert!(!FunctionCode::ReadHoldingRegisters.is_write());
    }

    #[test]
    fn test_decode_read_quantity_limits() {
        let decode = |function, quantity: u16| {
            let mut pdu = vec![0x00, 0x00];
            pdu.extend_from_slice(&quantity.to_be_bytes());
            decode_body(function, &pdu)
        };

        assert!(decode(FunctionCode::ReadCoils, 2000).is_ok());
        assert_eq!(decode(FunctionCode::ReadCoils, 2001), Err(DecodeError::IllegalValue));
        assert_eq!(decode(FunctionCode::ReadCoils, 0), Err(DecodeError::IllegalValue));
        assert!(decode(FunctionCode::ReadHoldingRegisters, 125).is_ok());
        assert_eq!(
            decode(FunctionCode::ReadInputRegisters, 126),
            Err(DecodeError::IllegalValue)
        );
    }

    #[test]
    fn test_decode_write_single_coil_values() {
        assert_eq!(
            decode_body(FunctionCode::WriteSingleCoil, &[0x00, 0x03, 0xFF, 0x00]),
            Ok(Operation::WriteSingleCoil { address: 3, on: true })
        );
        assert_eq!(
            decode_body(FunctionCode::WriteSingleCoil, &[0x00, 0x03, 0x00, 0x00]),
            Ok(Operation::WriteSingleCoil { address: 3, on: false })
        );
        assert_eq!(
            decode_body(FunctionCode::WriteSingleCoil, &[0x00, 0x03, 0x00, 0xAB]),
            Err(DecodeError::IllegalValue)
        );
    }

    #[test]
    fn test_decode_write_multiple_registers() {
        let pdu = [0x00, 0x10, 0x00, 0x02, 0x04, 0x01, 0x41, 0x00, 0x7B];
        assert_eq!(
            decode_body(FunctionCode::WriteMultipleRegisters, &pdu),
            Ok(Operation::WriteMultipleRegisters {
                start: 0x10,
                values: vec![0x0141, 0x007B],
            })
        );
    }

    #[test]
    fn test_decode_write_multiple_coils() {
        let pdu = [0x00, 0x00, 0x00, 0x05, 0x01, 0x0D];
        assert_eq!(
            decode_body(FunctionCode::WriteMultipleCoils, &pdu),
            Ok(Operation::WriteMultipleCoils {
                start: 0,
                values: vec![true, false, true, true, false],
            })
        );
    }

    #[test]
    fn test_decode_rejects_byte_count_mismatch() {
        // 2 registers announced, byte_count says 3
        let pdu = [0x00, 0x00, 0x00, 0x02, 0x03, 0x01, 0x41, 0x00];
        assert_eq!(
            decode_body(FunctionCode::WriteMultipleRegisters, &pdu),
            Err(DecodeError::IllegalValue)
        );
    }

    #[test]
    fn test_decode_rejects_truncated_data() {
        // byte_count says 4 but only 2 data bytes follow
        let pdu = [0x00, 0x00, 0x00, 0x02, 0x04, 0x01, 0x41];
        assert_eq!(
            decode_body(FunctionCode::WriteMultipleRegisters, &pdu),
            Err(DecodeError::Malformed)
        );
    }

    #[test]
    fn test_decode_rejects_short_pdu() {
        assert_eq!(
            decode_body(FunctionCode::ReadCoils, &[0x00, 0x00, 0x00]),
            Err(DecodeError::Malformed)
        );
    }

    #[test]
    fn test_encode_read_response() {
        let adu = encode_read_response(0x01, FunctionCode::ReadHoldingRegisters, &[0x01, 0x41, 0x00, 0x7B]);
        assert_eq!(adu, vec![0x01, 0x03, 0x04, 0x01, 0x41, 0x00, 0x7B, 0x7A, 0x33]);
    }

    #[test]
    fn test_encode_write_echo() {
        let adu = encode_write_echo(0x01, FunctionCode::WriteSingleCoil, 0x0003, 0xFF00);
        assert_eq!(adu, vec![0x01, 0x05, 0x00, 0x03, 0xFF, 0x00, 0x7D, 0xCA]);
    }

    #[test]
    fn test_encode_exception_sets_high_bit() {
        let adu = encode_exception(0x01, 0x05, ExceptionCode::IllegalDataValue);
        assert_eq!(&adu[..3], &[0x01, 0x85, 0x03]);
        // envelope must verify against its own CRC
        assert!(parse_adu(&adu, &[1]).is_ok());
    }
}
