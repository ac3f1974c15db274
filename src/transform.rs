//! Byte transforms applied to every received byte.
//!
//! A transform is a pure `u8 -> u8` mapping with no state. The core only ever
//! calls [`Transform::apply`] and never assumes anything else about it, so any
//! closure can be injected in place of the reference [`Rot13`] cipher.

/// A stateless, one-for-one byte mapping.
pub trait Transform {
    /// Maps a single byte.
    fn apply(&self, byte: u8) -> u8;

    /// Maps every byte of `bytes` into a new vector.
    fn apply_slice(&self, bytes: &[u8]) -> Vec<u8> {
        bytes.iter().map(|&b| self.apply(b)).collect()
    }
}

impl<F> Transform for F
where
    F: Fn(u8) -> u8,
{
    fn apply(&self, byte: u8) -> u8 {
        self(byte)
    }
}

/// The A↔N, B↔O, …, Z↔M substitution cipher.
///
/// Only ASCII letters are rotated; case is preserved and every other byte
/// passes through unchanged. Locale-dependent classification is deliberately
/// avoided so the mapping is the same everywhere.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rot13;

impl Transform for Rot13 {
    fn apply(&self, byte: u8) -> u8 {
        match byte {
            b'a'..=b'm' | b'A'..=b'M' => byte + 13,
            b'n'..=b'z' | b'N'..=b'Z' => byte - 13,
            _ => byte,
        }
    }
}

/// Passes every byte through unchanged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Identity;

impl Transform for Identity {
    fn apply(&self, byte: u8) -> u8 {
        byte
    }
}
