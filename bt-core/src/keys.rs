//! Persistable pairing material (C5): link keys, long-term keys, identity
//! keys and signature keys.
//!
//! Each record is a fixed-size binary layout with an embedded
//! [`TypedAddress`], a 16-byte key value, and per-type metadata. Validity
//! predicates follow `original_source/Source/bluetooth/HCISocket.h`'s
//! `mgmt_link_key_info`/`mgmt_ltk_info`/`mgmt_irk_info`/`mgmt_csrk_info`
//! wrappers bit for bit.
use crate::addr::{Address, AddressType, TypedAddress};
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display)]
pub enum KeyError {
    InvalidLength,
    InvalidHexDigit,
    MalformedHeader,
}

pub type Result<T> = std::result::Result<T, KeyError>;

fn to_base16(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn from_base16(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(KeyError::InvalidLength);
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| KeyError::InvalidHexDigit))
        .collect()
}

/// BR/EDR link key, wrapping the on-wire layout of `mgmt_link_key_info`.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct LinkKey {
    pub addr: TypedAddress,
    pub key_type: u8,
    pub value: [u8; 16],
    pub pin_len: u8,
}

impl LinkKey {
    pub fn is_valid(&self) -> bool {
        self.pin_len <= 16 && self.key_type <= 8 && self.addr.address_type == AddressType::BrEdr
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(6 + 1 + 16 + 1);
        out.extend_from_slice(&self.addr.address.0);
        out.push(self.key_type);
        out.extend_from_slice(&self.value);
        out.push(self.pin_len);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 6 + 1 + 16 + 1 {
            return Err(KeyError::InvalidLength);
        }
        let mut address = [0u8; 6];
        address.copy_from_slice(&bytes[0..6]);
        let key_type = bytes[6];
        let mut value = [0u8; 16];
        value.copy_from_slice(&bytes[7..23]);
        let pin_len = bytes[23];
        Ok(Self {
            addr: TypedAddress {
                address: Address::new(address),
                address_type: AddressType::BrEdr,
            },
            key_type,
            value,
            pin_len,
        })
    }

    /// `'A' + pin_len` then `'A' + type` prepended to base16(bytes-after-address).
    pub fn to_string_form(&self) -> String {
        let mut s = String::new();
        s.push((b'A' + self.pin_len) as char);
        s.push((b'A' + self.key_type) as char);
        s.push_str(&to_base16(&self.value));
        s
    }

    pub fn from_string(addr: TypedAddress, s: &str) -> Result<Self> {
        if s.len() < 2 {
            return Err(KeyError::MalformedHeader);
        }
        let pin_len = (s.as_bytes()[0]).wrapping_sub(b'A');
        let key_type = (s.as_bytes()[1]).wrapping_sub(b'A');
        let value_bytes = from_base16(&s[2..])?;
        if value_bytes.len() != 16 {
            return Err(KeyError::InvalidLength);
        }
        let mut value = [0u8; 16];
        value.copy_from_slice(&value_bytes);
        Ok(Self {
            addr,
            key_type,
            value,
            pin_len,
        })
    }
}

impl fmt::Debug for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("LinkKey")
            .field("addr", &self.addr.address)
            .field("key_type", &self.key_type)
            .field("pin_len", &self.pin_len)
            .finish()
    }
}

/// LE long-term key, wrapping `mgmt_ltk_info`.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct LongTermKey {
    pub addr: TypedAddress,
    pub authenticated: u8,
    pub master: u8,
    pub encryption_size: u8,
    pub diversifier: u16,
    pub random: u64,
    pub value: [u8; 16],
}

impl LongTermKey {
    pub fn is_valid(&self) -> bool {
        self.encryption_size == 16
            && self.authenticated <= 4
            && self.master <= 1
            && (self.addr.address_type == AddressType::LePublic
                || self.addr.address_type.is_static_random(&self.addr.address))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(6 + 1 + 1 + 1 + 2 + 8 + 16);
        out.extend_from_slice(&self.addr.address.0);
        out.push(self.authenticated);
        out.push(self.master);
        out.push(self.encryption_size);
        out.extend_from_slice(&self.diversifier.to_le_bytes());
        out.extend_from_slice(&self.random.to_le_bytes());
        out.extend_from_slice(&self.value);
        out
    }

    pub fn from_bytes(bytes: &[u8], address_type: AddressType) -> Result<Self> {
        if bytes.len() < 6 + 1 + 1 + 1 + 2 + 8 + 16 {
            return Err(KeyError::InvalidLength);
        }
        let mut address = [0u8; 6];
        address.copy_from_slice(&bytes[0..6]);
        let authenticated = bytes[6];
        let master = bytes[7];
        let encryption_size = bytes[8];
        let diversifier = u16::from_le_bytes([bytes[9], bytes[10]]);
        let random = u64::from_le_bytes(bytes[11..19].try_into().unwrap());
        let mut value = [0u8; 16];
        value.copy_from_slice(&bytes[19..35]);
        Ok(Self {
            addr: TypedAddress {
                address: Address::new(address),
                address_type,
            },
            authenticated,
            master,
            encryption_size,
            diversifier,
            random,
            value,
        })
    }

    pub fn to_string_form(&self) -> String {
        to_base16(&self.to_bytes()[6..])
    }
}

impl fmt::Debug for LongTermKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("LongTermKey")
            .field("addr", &self.addr.address)
            .field("master", &self.master)
            .finish()
    }
}

/// LE identity resolving key, wrapping `mgmt_irk_info`.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct IdentityKey {
    pub addr: TypedAddress,
    pub value: [u8; 16],
}

impl IdentityKey {
    pub fn is_valid(&self) -> bool {
        self.addr.address_type == AddressType::LePublic
            || self.addr.address_type.is_static_random(&self.addr.address)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(6 + 16);
        out.extend_from_slice(&self.addr.address.0);
        out.extend_from_slice(&self.value);
        out
    }

    pub fn from_bytes(bytes: &[u8], address_type: AddressType) -> Result<Self> {
        if bytes.len() < 6 + 16 {
            return Err(KeyError::InvalidLength);
        }
        let mut address = [0u8; 6];
        address.copy_from_slice(&bytes[0..6]);
        let mut value = [0u8; 16];
        value.copy_from_slice(&bytes[6..22]);
        Ok(Self {
            addr: TypedAddress {
                address: Address::new(address),
                address_type,
            },
            value,
        })
    }

    pub fn to_string_form(&self) -> String {
        to_base16(&self.value)
    }
}

impl fmt::Debug for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("IdentityKey")
            .field("addr", &self.addr.address)
            .finish()
    }
}

/// LE connection signature resolving key, wrapping `mgmt_csrk_info`.
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct SignatureKey {
    pub addr: TypedAddress,
    pub key_type: u8,
    pub value: [u8; 16],
}

impl SignatureKey {
    pub fn is_valid(&self) -> bool {
        self.key_type <= 3
            && matches!(
                self.addr.address_type,
                AddressType::LePublic | AddressType::LeRandom
            )
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(6 + 1 + 16);
        out.extend_from_slice(&self.addr.address.0);
        out.push(self.key_type);
        out.extend_from_slice(&self.value);
        out
    }

    pub fn from_bytes(bytes: &[u8], address_type: AddressType) -> Result<Self> {
        if bytes.len() < 6 + 1 + 16 {
            return Err(KeyError::InvalidLength);
        }
        let mut address = [0u8; 6];
        address.copy_from_slice(&bytes[0..6]);
        let key_type = bytes[6];
        let mut value = [0u8; 16];
        value.copy_from_slice(&bytes[7..23]);
        Ok(Self {
            addr: TypedAddress {
                address: Address::new(address),
                address_type,
            },
            key_type,
            value,
        })
    }

    pub fn to_string_form(&self) -> String {
        to_base16(&self.to_bytes()[6..])
    }
}

impl fmt::Debug for SignatureKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SignatureKey")
            .field("addr", &self.addr.address)
            .field("key_type", &self.key_type)
            .finish()
    }
}

/// Generic loadable/persistable key list, grounded in the reference
/// implementation's `KeyListType<T>` pattern. Used to batch records for
/// the MGMT `LoadLinkKeys`/`LoadLongTermKeys`/`LoadIRKs` family.
#[derive(Clone, Debug, Default)]
pub struct KeyList<K> {
    entries: Vec<K>,
}

impl<K> KeyList<K> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn push(&mut self, key: K) {
        self.entries.push(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, K> {
        self.entries.iter()
    }
}

impl<K> FromIterator<K> for KeyList<K> {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_addr(address_type: AddressType) -> TypedAddress {
        TypedAddress {
            address: Address::new([1, 2, 3, 4, 5, 6]),
            address_type,
        }
    }

    #[test]
    fn link_key_round_trips_bytes_and_string() {
        let k = LinkKey {
            addr: sample_addr(AddressType::BrEdr),
            key_type: 3,
            value: [9u8; 16],
            pin_len: 4,
        };
        assert!(k.is_valid());
        let bytes = k.to_bytes();
        let back = LinkKey::from_bytes(&bytes).unwrap();
        assert_eq!(k.value, back.value);
        assert_eq!(k.pin_len, back.pin_len);
        assert_eq!(k.key_type, back.key_type);

        let s = k.to_string_form();
        let back2 = LinkKey::from_string(k.addr, &s).unwrap();
        assert_eq!(back2.value, k.value);
        assert_eq!(back2.pin_len, k.pin_len);
        assert_eq!(back2.key_type, k.key_type);
    }

    #[test]
    fn link_key_invalid_on_le_address() {
        let k = LinkKey {
            addr: sample_addr(AddressType::LePublic),
            key_type: 0,
            value: [0u8; 16],
            pin_len: 0,
        };
        assert!(!k.is_valid());
    }

    #[test]
    fn ltk_valid_requires_16_byte_encryption_and_le_static_random_or_public() {
        let mut addr = sample_addr(AddressType::LeRandom);
        addr.address = Address::new([0, 0, 0, 0, 0, 0xC0]);
        let ltk = LongTermKey {
            addr,
            authenticated: 1,
            master: 1,
            encryption_size: 16,
            diversifier: 0,
            random: 0,
            value: [1u8; 16],
        };
        assert!(ltk.is_valid());

        let mut bad = ltk;
        bad.encryption_size = 8;
        assert!(!bad.is_valid());
    }

    #[test]
    fn irk_round_trips() {
        let irk = IdentityKey {
            addr: sample_addr(AddressType::LePublic),
            value: [5u8; 16],
        };
        assert!(irk.is_valid());
        let bytes = irk.to_bytes();
        let back = IdentityKey::from_bytes(&bytes, AddressType::LePublic).unwrap();
        assert_eq!(irk.value, back.value);
    }

    #[test]
    fn csrk_valid_for_any_le_address_type() {
        let csrk = SignatureKey {
            addr: sample_addr(AddressType::LeRandom),
            key_type: 1,
            value: [2u8; 16],
        };
        assert!(csrk.is_valid());
    }
}
