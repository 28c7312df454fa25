//! Prime field arithmetic over the BN254 scalar and base fields
//!
//! Elements are held as reduced `BigUint` values and encoded as fixed-width
//! 32-byte big-endian integers. Every operation takes the field explicitly so
//! values from different fields are never silently mixed.

use std::fmt;

use num_bigint::BigUint;
use num_traits::{One, Zero};
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ELEMENT_SIZE;

/// BN254 scalar field modulus r
const BN254_FR_MODULUS: [u8; 32] = [
    0x30, 0x64, 0x4e, 0x72, 0xe1, 0x31, 0xa0, 0x29, 0xb8, 0x50, 0x45, 0xb6, 0x81, 0x81, 0x58, 0x5d,
    0x28, 0x33, 0xe8, 0x48, 0x79, 0xb9, 0x70, 0x91, 0x43, 0xe1, 0xf5, 0x93, 0xf0, 0x00, 0x00, 0x01,
];

/// BN254 base field modulus q
const BN254_FQ_MODULUS: [u8; 32] = [
    0x30, 0x64, 0x4e, 0x72, 0xe1, 0x31, 0xa0, 0x29, 0xb8, 0x50, 0x45, 0xb6, 0x81, 0x81, 0x58, 0x5d,
    0x97, 0x81, 0x6a, 0x91, 0x68, 0x71, 0xca, 0x8d, 0x3c, 0x20, 0x8c, 0x16, 0xd8, 0x7c, 0xfd, 0x47,
];

/// Which prime field secrets are shared over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementType {
    /// BN254 base field
    Bn254Fq,
    /// BN254 scalar field
    #[default]
    Bn254Fr,
}

impl ElementType {
    /// Numeric identifier used in artifacts and settings
    pub fn id(self) -> u8 {
        match self {
            ElementType::Bn254Fq => 0,
            ElementType::Bn254Fr => 1,
        }
    }

    /// Look up an element type by identifier
    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0 => Ok(ElementType::Bn254Fq),
            1 => Ok(ElementType::Bn254Fr),
            other => Err(Error::UnsupportedAlgo(format!("element type {}", other))),
        }
    }

    /// Field modulus for this element type
    pub fn modulus(self) -> BigUint {
        match self {
            ElementType::Bn254Fq => BigUint::from_bytes_be(&BN254_FQ_MODULUS),
            ElementType::Bn254Fr => BigUint::from_bytes_be(&BN254_FR_MODULUS),
        }
    }

    /// Field context for this element type
    pub fn field(self) -> PrimeField {
        PrimeField::new(self)
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::Bn254Fq => write!(f, "bn254-fq"),
            ElementType::Bn254Fr => write!(f, "bn254-fr"),
        }
    }
}

/// An element of a prime field, always reduced below the modulus
#[derive(Clone, PartialEq, Eq)]
pub struct FieldElement(BigUint);

impl FieldElement {
    /// Whether this is the additive identity
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Underlying integer value
    pub fn value(&self) -> &BigUint {
        &self.0
    }
}

impl fmt::Debug for FieldElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldElement([REDACTED])")
    }
}

/// Arithmetic context for one prime field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimeField {
    element_type: ElementType,
    modulus: BigUint,
}

impl PrimeField {
    /// Create the field for an element type
    pub fn new(element_type: ElementType) -> Self {
        Self {
            element_type,
            modulus: element_type.modulus(),
        }
    }

    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    pub fn modulus(&self) -> &BigUint {
        &self.modulus
    }

    pub fn zero(&self) -> FieldElement {
        FieldElement(BigUint::zero())
    }

    pub fn one(&self) -> FieldElement {
        FieldElement(BigUint::one())
    }

    /// Embed a small integer, reducing modulo p
    pub fn from_u64(&self, value: u64) -> FieldElement {
        FieldElement(BigUint::from(value) % &self.modulus)
    }

    /// Parse a big-endian integer, rejecting values not below p
    pub fn from_bytes(&self, bytes: &[u8]) -> Result<FieldElement> {
        let value = BigUint::from_bytes_be(bytes);
        if value >= self.modulus {
            return Err(Error::SecretOutOfRange);
        }
        Ok(FieldElement(value))
    }

    /// Encode as a big-endian integer left-padded to `len` bytes
    pub fn to_bytes(&self, element: &FieldElement, len: usize) -> Result<Vec<u8>> {
        if element.0.is_zero() {
            return Ok(vec![0u8; len]);
        }
        let raw = element.0.to_bytes_be();
        if raw.len() > len {
            return Err(Error::SecretOutOfRange);
        }
        let mut out = vec![0u8; len];
        out[len - raw.len()..].copy_from_slice(&raw);
        Ok(out)
    }

    /// Encode as a full-width 32-byte element
    pub fn to_element_bytes(&self, element: &FieldElement) -> [u8; ELEMENT_SIZE] {
        let mut out = [0u8; ELEMENT_SIZE];
        let raw = element.0.to_bytes_be();
        // Reduced values are below a 254-bit modulus and always fit
        let start = ELEMENT_SIZE.saturating_sub(raw.len());
        out[start..].copy_from_slice(&raw[raw.len().saturating_sub(ELEMENT_SIZE)..]);
        out
    }

    pub fn add(&self, a: &FieldElement, b: &FieldElement) -> FieldElement {
        FieldElement((&a.0 + &b.0) % &self.modulus)
    }

    pub fn sub(&self, a: &FieldElement, b: &FieldElement) -> FieldElement {
        FieldElement((&a.0 + &self.modulus - &b.0) % &self.modulus)
    }

    pub fn mul(&self, a: &FieldElement, b: &FieldElement) -> FieldElement {
        FieldElement((&a.0 * &b.0) % &self.modulus)
    }

    pub fn neg(&self, a: &FieldElement) -> FieldElement {
        if a.0.is_zero() {
            return self.zero();
        }
        FieldElement(&self.modulus - &a.0)
    }

    /// Multiplicative inverse via Fermat's little theorem
    pub fn inverse(&self, a: &FieldElement) -> Result<FieldElement> {
        if a.0.is_zero() {
            return Err(Error::Crypto("Inverse of zero".to_string()));
        }
        let exponent = &self.modulus - BigUint::from(2u32);
        Ok(FieldElement(a.0.modpow(&exponent, &self.modulus)))
    }

    /// Uniformly random element by rejection sampling
    pub fn random<R: RngCore + CryptoRng>(&self, rng: &mut R) -> FieldElement {
        FieldElement(self.random_below(rng, ELEMENT_SIZE))
    }

    /// Uniformly random value of at most `len` bytes that is below p
    pub(crate) fn random_below<R: RngCore + CryptoRng>(&self, rng: &mut R, len: usize) -> BigUint {
        let bits = self.modulus.bits() as usize;
        let mut buf = vec![0u8; len];
        loop {
            rng.fill_bytes(&mut buf);
            // Clear bits above the modulus width so most draws are accepted
            if len * 8 > bits {
                let excess = len * 8 - bits;
                if excess < 8 {
                    buf[0] &= 0xFF >> excess;
                } else {
                    let whole = excess / 8;
                    buf[..whole].iter_mut().for_each(|b| *b = 0);
                    buf[whole] &= 0xFF >> (excess % 8);
                }
            }
            let candidate = BigUint::from_bytes_be(&buf);
            if candidate < self.modulus {
                return candidate;
            }
        }
    }
}
