//! SDP element payload (C2): a [`Record`] extended with descriptor-tagged
//! element encoding.
//!
//! Everything here is big-endian, matching `original_source`'s
//! `SDP::Payload : DataRecordBE`. SDP's on-wire UUID representation
//! reverses byte order relative to the UUID's internal device-order
//! storage — see [`push_uuid`]/[`pop_uuid`].
use crate::record::{Endian, Record, RecordError};
use crate::uuid::Uuid;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
pub enum SdpPayloadError {
    Record(RecordError),
    /// 32-bit UUIDs are not supported on read; see `original_source`'s
    /// `ReadDescriptor` assertion.
    Uuid32Unsupported,
    InvalidSizeClass,
    ValueTooLarge,
}

impl From<RecordError> for SdpPayloadError {
    fn from(e: RecordError) -> Self {
        SdpPayloadError::Record(e)
    }
}

pub type Result<T> = std::result::Result<T, SdpPayloadError>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum ElementType {
    Nil = 0x00,
    Uint = 0x08,
    Int = 0x10,
    Uuid = 0x18,
    Text = 0x20,
    Bool = 0x28,
    Seq = 0x30,
    Alt = 0x38,
    Url = 0x40,
}

impl ElementType {
    fn from_bits(bits: u8) -> Result<Self> {
        Ok(match bits & 0xF8 {
            0x00 => ElementType::Nil,
            0x08 => ElementType::Uint,
            0x10 => ElementType::Int,
            0x18 => ElementType::Uuid,
            0x20 => ElementType::Text,
            0x28 => ElementType::Bool,
            0x30 => ElementType::Seq,
            0x38 => ElementType::Alt,
            0x40 => ElementType::Url,
            _ => return Err(SdpPayloadError::InvalidSizeClass),
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum SizeClass {
    Size8 = 0,
    Size16 = 1,
    Size32 = 2,
    Size64 = 3,
    Size128 = 4,
    U8Follows = 5,
    U16Follows = 6,
    U32Follows = 7,
}

impl SizeClass {
    fn fixed_width(self) -> Option<usize> {
        match self {
            SizeClass::Size8 => Some(1),
            SizeClass::Size16 => Some(2),
            SizeClass::Size32 => Some(4),
            SizeClass::Size64 => Some(8),
            SizeClass::Size128 => Some(16),
            _ => None,
        }
    }

    fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => SizeClass::Size8,
            1 => SizeClass::Size16,
            2 => SizeClass::Size32,
            3 => SizeClass::Size64,
            4 => SizeClass::Size128,
            5 => SizeClass::U8Follows,
            6 => SizeClass::U16Follows,
            _ => SizeClass::U32Follows,
        }
    }
}

/// Which variable-length size class (of {U8,U16,U32}Follows) is the
/// smallest that fits `len`.
fn smallest_variable_class(len: usize) -> Result<SizeClass> {
    if len <= u8::MAX as usize {
        Ok(SizeClass::U8Follows)
    } else if len <= u16::MAX as usize {
        Ok(SizeClass::U16Follows)
    } else if len <= u32::MAX as usize {
        Ok(SizeClass::U32Follows)
    } else {
        Err(SdpPayloadError::ValueTooLarge)
    }
}

/// A single continuation state: an opaque blob of at most 16 bytes, coded
/// on the wire as a length byte (0 meaning "absent") plus that many bytes.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Continuation(pub Vec<u8>);

impl Continuation {
    pub const MAX_LEN: usize = 16;

    pub fn absent() -> Self {
        Self(Vec::new())
    }

    pub fn is_absent(&self) -> bool {
        self.0.is_empty()
    }
}

pub struct Payload {
    record: Record,
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Payload").field("record", &self.record).finish()
    }
}

impl Payload {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            record: Record::with_capacity(capacity),
        }
    }

    pub fn from_filled(data: &[u8]) -> Self {
        Self {
            record: Record::from_filled(data),
        }
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut Record {
        &mut self.record
    }

    pub fn available(&self) -> usize {
        self.record.available()
    }

    fn push_descriptor_fixed(&mut self, ty: ElementType, size: SizeClass) -> Result<()> {
        Ok(self.record.push_u8((ty as u8) | (size as u8))?)
    }

    fn push_descriptor_variable(&mut self, ty: ElementType, len: usize) -> Result<SizeClass> {
        let class = smallest_variable_class(len)?;
        self.record.push_u8((ty as u8) | (class as u8))?;
        match class {
            SizeClass::U8Follows => self.record.push_u8(len as u8)?,
            SizeClass::U16Follows => self.record.push_u16(len as u16, Endian::Big)?,
            SizeClass::U32Follows => self.record.push_u32(len as u32, Endian::Big)?,
            _ => unreachable!(),
        }
        Ok(class)
    }

    fn read_descriptor(&mut self) -> Result<(ElementType, usize)> {
        let first = self.record.pop_u8()?;
        let raw_ty = first & 0xF8;
        let ty = ElementType::from_bits(first)?;
        if raw_ty == ElementType::Nil as u8 {
            return Ok((ElementType::Nil, 0));
        }
        let class = SizeClass::from_bits(first);
        let size = match class.fixed_width() {
            Some(w) => w,
            None => match class {
                SizeClass::U8Follows => self.record.pop_u8()? as usize,
                SizeClass::U16Follows => self.record.pop_u16(Endian::Big)? as usize,
                SizeClass::U32Follows => self.record.pop_u32(Endian::Big)? as usize,
                _ => unreachable!(),
            },
        };
        Ok((ty, size))
    }

    pub fn push_nil(&mut self) -> Result<()> {
        self.push_descriptor_fixed(ElementType::Nil, SizeClass::Size8)
    }

    pub fn push_bool(&mut self, value: bool) -> Result<()> {
        self.push_descriptor_fixed(ElementType::Bool, SizeClass::Size8)?;
        Ok(self.record.push_bool(value)?)
    }

    pub fn pop_bool(&mut self) -> Result<bool> {
        let (ty, _) = self.read_descriptor()?;
        debug_assert!(matches!(ty, ElementType::Bool));
        Ok(self.record.pop_bool()?)
    }

    pub fn push_uint8(&mut self, value: u8) -> Result<()> {
        self.push_descriptor_fixed(ElementType::Uint, SizeClass::Size8)?;
        Ok(self.record.push_u8(value)?)
    }

    pub fn push_uint16(&mut self, value: u16) -> Result<()> {
        self.push_descriptor_fixed(ElementType::Uint, SizeClass::Size16)?;
        Ok(self.record.push_u16(value, Endian::Big)?)
    }

    pub fn push_uint32(&mut self, value: u32) -> Result<()> {
        self.push_descriptor_fixed(ElementType::Uint, SizeClass::Size32)?;
        Ok(self.record.push_u32(value, Endian::Big)?)
    }

    pub fn pop_uint32(&mut self) -> Result<u32> {
        let (ty, size) = self.read_descriptor()?;
        debug_assert!(matches!(ty, ElementType::Uint | ElementType::Int));
        match size {
            1 => Ok(self.record.pop_u8()? as u32),
            2 => Ok(self.record.pop_u16(Endian::Big)? as u32),
            4 => Ok(self.record.pop_u32(Endian::Big)?),
            _ => Err(SdpPayloadError::InvalidSizeClass),
        }
    }

    /// SDP UUID wire order reverses the byte order of the UUID's internal
    /// device-order storage.
    pub fn push_uuid(&mut self, uuid: &Uuid) -> Result<()> {
        if uuid.has_short() {
            self.push_descriptor_fixed(ElementType::Uuid, SizeClass::Size16)?;
            let short = uuid.short();
            self.record.push_u8((short & 0xFF) as u8)?;
            self.record.push_u8((short >> 8) as u8)?;
        } else {
            self.push_descriptor_fixed(ElementType::Uuid, SizeClass::Size128)?;
            let mut reversed = *uuid.as_bytes();
            reversed.reverse();
            self.record.push_bytes(&reversed)?;
        }
        Ok(())
    }

    pub fn pop_uuid(&mut self) -> Result<Uuid> {
        let (ty, size) = self.read_descriptor()?;
        debug_assert!(matches!(ty, ElementType::Uuid));
        match size {
            2 => {
                let hi = self.record.pop_u8()?;
                let lo = self.record.pop_u8()?;
                Ok(Uuid::from_short(((hi as u16) << 8) | lo as u16))
            }
            4 => Err(SdpPayloadError::Uuid32Unsupported),
            16 => {
                let mut bytes = [0u8; 16];
                let raw = self.record.pop_bytes(16)?;
                for (i, b) in raw.iter().enumerate() {
                    bytes[15 - i] = *b;
                }
                Ok(Uuid::from_bytes(bytes))
            }
            _ => Err(SdpPayloadError::InvalidSizeClass),
        }
    }

    pub fn push_text(&mut self, text: &[u8]) -> Result<()> {
        self.push_descriptor_variable(ElementType::Text, text.len())?;
        Ok(self.record.push_bytes(text)?)
    }

    pub fn pop_text(&mut self) -> Result<Vec<u8>> {
        let (ty, size) = self.read_descriptor()?;
        debug_assert!(matches!(ty, ElementType::Text | ElementType::Url));
        Ok(self.record.pop_bytes(size)?)
    }

    /// Allocates a scratch child record, invokes `builder` to populate it,
    /// then emits its length-prefixed contents under a SEQ descriptor.
    pub fn push_sequence(
        &mut self,
        capacity: usize,
        builder: impl FnOnce(&mut Payload) -> Result<()>,
    ) -> Result<()> {
        let mut child = Payload::with_capacity(capacity);
        builder(&mut child)?;
        let bytes = child.record.as_written().to_vec();
        self.push_descriptor_variable(ElementType::Seq, bytes.len())?;
        Ok(self.record.push_bytes(&bytes)?)
    }

    /// Reads the descriptor, constructs a borrowed child payload over the
    /// payload bytes, and invokes `inspector`.
    pub fn pop_sequence<T>(
        &mut self,
        inspector: impl FnOnce(&mut Payload) -> Result<T>,
    ) -> Result<T> {
        let (ty, size) = self.read_descriptor()?;
        debug_assert!(matches!(ty, ElementType::Seq | ElementType::Alt));
        let bytes = self.record.pop_bytes(size)?;
        let mut child = Payload::from_filled(&bytes);
        inspector(&mut child)
    }

    /// Reads one element's descriptor and returns its raw value bytes,
    /// unopinionated about its type. Used by callers that only need to
    /// carry an already-encoded element through untouched (e.g. SDP
    /// attribute values before application-level decoding).
    pub fn pop_element_raw(&mut self) -> Result<Vec<u8>> {
        let (_ty, size) = self.read_descriptor()?;
        Ok(self.record.pop_bytes(size)?)
    }

    pub fn push_continuation(&mut self, cont: &Continuation) -> Result<()> {
        if cont.is_absent() {
            return Ok(self.record.push_u8(0)?);
        }
        self.record.push_u8(cont.0.len() as u8)?;
        Ok(self.record.push_bytes(&cont.0)?)
    }

    pub fn pop_continuation(&mut self) -> Result<Continuation> {
        let n = self.record.pop_u8()? as usize;
        if n == 0 {
            return Ok(Continuation::absent());
        }
        Ok(Continuation(self.record.pop_bytes(n)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_round_trips() {
        let mut p = Payload::with_capacity(16);
        p.push_bool(true).unwrap();
        let bytes = p.record.as_written().to_vec();
        let mut r = Payload::from_filled(&bytes);
        assert!(r.pop_bool().unwrap());
    }

    #[test]
    fn nil_has_no_payload_bytes() {
        let mut p = Payload::with_capacity(16);
        p.push_nil().unwrap();
        assert_eq!(p.record.as_written().len(), 1);
    }

    #[test]
    fn uint_widths_round_trip() {
        for (push, expect) in [
            (8u32, 1),
            (300u32, 2),
            (70000u32, 4),
        ] {
            let mut p = Payload::with_capacity(16);
            if push <= u8::MAX as u32 {
                p.push_uint8(push as u8).unwrap();
            } else if push <= u16::MAX as u32 {
                p.push_uint16(push as u16).unwrap();
            } else {
                p.push_uint32(push).unwrap();
            }
            let _ = expect;
            let bytes = p.record.as_written().to_vec();
            let mut r = Payload::from_filled(&bytes);
            assert_eq!(r.pop_uint32().unwrap(), push);
        }
    }

    #[test]
    fn short_uuid_round_trips() {
        let mut p = Payload::with_capacity(16);
        let uuid = Uuid::from_short(0x110B);
        p.push_uuid(&uuid).unwrap();
        let bytes = p.record.as_written().to_vec();
        let mut r = Payload::from_filled(&bytes);
        let back = r.pop_uuid().unwrap();
        assert_eq!(back.short(), 0x110B);
    }

    #[test]
    fn full_uuid_round_trips_with_byte_reversal() {
        let mut p = Payload::with_capacity(24);
        let mut full = [0u8; 16];
        full.copy_from_slice(b"0123456789abcdef");
        let uuid = crate::uuid::Uuid::from_bytes(full);
        p.push_uuid(&uuid).unwrap();
        let bytes = p.record.as_written().to_vec();
        let mut r = Payload::from_filled(&bytes);
        let back = r.pop_uuid().unwrap();
        assert_eq!(back.as_bytes(), uuid.as_bytes());
    }

    #[test]
    fn text_round_trips() {
        let mut p = Payload::with_capacity(32);
        p.push_text(b"hello").unwrap();
        let bytes = p.record.as_written().to_vec();
        let mut r = Payload::from_filled(&bytes);
        assert_eq!(r.pop_text().unwrap(), b"hello");
    }

    #[test]
    fn sequence_of_mixed_types_round_trips() {
        let mut p = Payload::with_capacity(64);
        p.push_sequence(32, |seq| {
            seq.push_uint8(1)?;
            seq.push_bool(true)?;
            seq.push_text(b"x")?;
            Ok(())
        })
        .unwrap();
        let bytes = p.record.as_written().to_vec();
        let mut r = Payload::from_filled(&bytes);
        r.pop_sequence(|seq| {
            assert_eq!(seq.pop_uint32().unwrap(), 1);
            assert!(seq.pop_bool().unwrap());
            assert_eq!(seq.pop_text().unwrap(), b"x");
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn continuation_absent_is_single_zero_byte() {
        let mut p = Payload::with_capacity(4);
        p.push_continuation(&Continuation::absent()).unwrap();
        assert_eq!(p.record.as_written(), &[0]);
    }

    #[test]
    fn continuation_round_trips() {
        let mut p = Payload::with_capacity(32);
        let cont = Continuation(vec![1, 2, 3]);
        p.push_continuation(&cont).unwrap();
        let bytes = p.record.as_written().to_vec();
        let mut r = Payload::from_filled(&bytes);
        assert_eq!(r.pop_continuation().unwrap(), cont);
    }

    #[test]
    fn uuid32_is_unsupported_on_read() {
        let mut p = Payload::with_capacity(16);
        p.record.push_u8((ElementType::Uuid as u8) | (SizeClass::Size32 as u8)).unwrap();
        p.record.push_u32(0, Endian::Big).unwrap();
        let bytes = p.record.as_written().to_vec();
        let mut r = Payload::from_filled(&bytes);
        assert_eq!(r.pop_uuid(), Err(SdpPayloadError::Uuid32Unsupported));
    }
}
