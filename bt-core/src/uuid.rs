//! 16/128-bit Bluetooth UUID (C3).
//!
//! Stored internally as the full 16-byte value (plain MSB-first dashed-
//! string order, `bytes[0]` is the first hex pair of the string) plus a
//! `has_short` flag set when the bytes outside the short field equal the
//! Bluetooth base UUID (`0000xxxx-0000-1000-8000-00805F9B34FB`). The short
//! form lives in `bytes[2..4]` — the two bytes the `xxxx` placeholder
//! occupies once the dashed string is hand-expanded; see `DESIGN.md`.
use std::fmt;

const BASE: [u8; 16] = [
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0x80, 0x5F, 0x9B, 0x34, 0xFB,
];

#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct Uuid {
    bytes: [u8; 16],
    has_short: bool,
}

impl Uuid {
    /// Expands a 16-bit short UUID against the Bluetooth base.
    pub fn from_short(short: u16) -> Self {
        let mut bytes = BASE;
        bytes[2] = (short >> 8) as u8;
        bytes[3] = (short & 0xFF) as u8;
        Self {
            bytes,
            has_short: true,
        }
    }

    /// Builds from a full 16-byte value, auto-detecting short-capability.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        let has_short = bytes[0..2] == BASE[0..2] && bytes[4..16] == BASE[4..16];
        Self { bytes, has_short }
    }

    pub fn has_short(&self) -> bool {
        self.has_short
    }

    /// The 16-bit short form, read from `bytes[2..4]`. Caller must check
    /// [`Uuid::has_short`] first; returns `0` if not short-capable.
    pub fn short(&self) -> u16 {
        if !self.has_short {
            return 0;
        }
        u16::from_be_bytes([self.bytes[2], self.bytes[3]])
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.bytes
    }

    pub fn to_string_full(&self) -> String {
        format!(
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3],
            self.bytes[4], self.bytes[5],
            self.bytes[6], self.bytes[7],
            self.bytes[8], self.bytes[9],
            self.bytes[10], self.bytes[11], self.bytes[12], self.bytes[13], self.bytes[14], self.bytes[15],
        )
    }

    fn to_string_short(&self) -> String {
        format!("{:02x}{:02x}", self.bytes[2], self.bytes[3])
    }
}

impl fmt::Display for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.has_short {
            write!(f, "{}", self.to_string_short())
        } else {
            write!(f, "{}", self.to_string_full())
        }
    }
}

impl fmt::Debug for Uuid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Uuid({self})")
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
pub enum UuidError {
    InvalidLength,
    InvalidHexDigit,
    MissingDash,
}

pub type Result<T> = std::result::Result<T, UuidError>;

impl std::str::FromStr for Uuid {
    type Err = UuidError;

    /// Parses either the canonical 36-char dashed form or the 4-char short
    /// form.
    fn from_str(s: &str) -> Result<Self> {
        fn hex_pair(s: &str, idx: usize) -> Result<u8> {
            u8::from_str_radix(&s[idx..idx + 2], 16).map_err(|_| UuidError::InvalidHexDigit)
        }
        match s.len() {
            4 => {
                let short = u16::from_str_radix(s, 16).map_err(|_| UuidError::InvalidHexDigit)?;
                Ok(Self::from_short(short))
            }
            36 => {
                for pos in [8, 13, 18, 23] {
                    if s.as_bytes()[pos] != b'-' {
                        return Err(UuidError::MissingDash);
                    }
                }
                let groups: Vec<&str> = s.split('-').collect();
                if groups.len() != 5 {
                    return Err(UuidError::MissingDash);
                }
                let flat = groups.concat();
                if flat.len() != 32 {
                    return Err(UuidError::InvalidLength);
                }
                let mut bytes = [0u8; 16];
                for (i, byte) in bytes.iter_mut().enumerate() {
                    *byte = hex_pair(&flat, i * 2)?;
                }
                Ok(Self::from_bytes(bytes))
            }
            _ => Err(UuidError::InvalidLength),
        }
    }
}

impl std::cmp::PartialEq<u16> for Uuid {
    fn eq(&self, other: &u16) -> bool {
        self.has_short && self.short() == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_round_trips() {
        let u = Uuid::from_short(0x2A00);
        assert!(u.has_short());
        assert_eq!(u.short(), 0x2A00);
        assert_eq!(u.to_string(), "2a00");
    }

    #[test]
    fn full_round_trips_through_string() {
        let s = "0000110b-0000-1000-8000-00805f9b34fb";
        let u: Uuid = s.parse().unwrap();
        assert!(u.has_short());
        assert_eq!(u.short(), 0x110B);
        assert_eq!(u.to_string_full(), s);
    }

    #[test]
    fn non_base_uuid_has_no_short_form() {
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(b"0123456789abcdef");
        let u = Uuid::from_bytes(bytes);
        assert!(!u.has_short());
    }

    #[test]
    fn equality_for_short_capable_ignores_middle_bytes() {
        let a = Uuid::from_short(0x1800);
        let b = Uuid::from_short(0x1800);
        assert_eq!(a, b);
    }

    #[test]
    fn short_string_round_trips() {
        let u: Uuid = "2a00".parse().unwrap();
        assert_eq!(u.short(), 0x2A00);
    }
}
