//! Addressing bytes.
//!
//! An address byte packs a 5-bit host type and a 3-bit index:
//! `host | index << 5`. The codec treats it as an opaque identifier; the
//! split is only useful for logging and configuration.

use std::fmt;

/// One-byte sender/receiver identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address(u8);

impl Address {
    /// Default identity of the host application.
    pub const CLIENT: Address = Address(0x09);
    /// Default identity of the robot's SDK endpoint.
    pub const ROBOT: Address = Address(0x38);

    /// Build an address from host type and index.
    pub const fn new(host: u8, index: u8) -> Self {
        Self((host & 0x1f) | ((index & 0x07) << 5))
    }

    /// Wrap a raw address byte.
    pub const fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Raw address byte.
    pub const fn as_byte(self) -> u8 {
        self.0
    }

    /// Host type (low 5 bits).
    pub const fn host(self) -> u8 {
        self.0 & 0x1f
    }

    /// Index (high 3 bits).
    pub const fn index(self) -> u8 {
        self.0 >> 5
    }
}

impl From<u8> for Address {
    fn from(byte: u8) -> Self {
        Self(byte)
    }
}

impl From<Address> for u8 {
    fn from(address: Address) -> Self {
        address.0
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:#04x} host={} index={})", self.0, self.host(), self.index())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.host(), self.index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_host_and_index() {
        let addr = Address::new(24, 1);
        assert_eq!(addr.as_byte(), 0x38);
        assert_eq!(addr, Address::ROBOT);
        assert_eq!((addr.host(), addr.index()), (24, 1));
    }

    #[test]
    fn client_default_is_host_nine() {
        assert_eq!(Address::CLIENT, Address::new(9, 0));
        assert_eq!(Address::CLIENT.to_string(), "9.0");
    }
}
