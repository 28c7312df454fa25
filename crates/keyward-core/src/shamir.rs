//! Shamir threshold secret sharing over a prime field
//!
//! A secret is the constant term of a random polynomial of degree `t - 1`.
//! Share `i` is the polynomial evaluated at `x = i` for `i` in `1..=n`; any
//! `t` distinct shares recover the secret by Lagrange interpolation at zero.

use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::field::{ElementType, FieldElement, PrimeField};
use crate::types::OperationalKey;
use crate::{
    DEFAULT_KEY_LEN, DEFAULT_MAX_SHARES, DEFAULT_MIN_SHARES, ELEMENT_SIZE, MAX_SHARES_LIMIT,
};

/// Parameters of a secret split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretConfig {
    /// Number of shares produced (n)
    pub max_shares: usize,

    /// Number of shares needed to reconstruct (t)
    pub min_shares: usize,

    /// Prime field the secret lives in
    #[serde(default)]
    pub element_type: ElementType,

    /// Byte length of the operational key
    #[serde(default = "default_key_len")]
    pub key_len: usize,
}

fn default_key_len() -> usize {
    DEFAULT_KEY_LEN
}

impl Default for SecretConfig {
    fn default() -> Self {
        Self {
            max_shares: DEFAULT_MAX_SHARES,
            min_shares: DEFAULT_MIN_SHARES,
            element_type: ElementType::default(),
            key_len: DEFAULT_KEY_LEN,
        }
    }
}

impl SecretConfig {
    pub fn new(max_shares: usize, min_shares: usize, element_type: ElementType) -> Self {
        Self {
            max_shares,
            min_shares,
            element_type,
            key_len: DEFAULT_KEY_LEN,
        }
    }

    /// Override the operational key length
    pub fn with_key_len(mut self, key_len: usize) -> Self {
        self.key_len = key_len;
        self
    }

    /// Field modulus, derived from the element type
    pub fn prime(&self) -> num_bigint::BigUint {
        self.element_type.modulus()
    }

    pub fn field(&self) -> PrimeField {
        PrimeField::new(self.element_type)
    }

    /// Check `1 <= min_shares <= max_shares <= 255` and `1 <= key_len <= 32`
    pub fn validate(&self) -> Result<()> {
        validate_threshold(self.max_shares, self.min_shares)?;
        if self.key_len == 0 || self.key_len > ELEMENT_SIZE {
            return Err(Error::InvalidConfig(format!(
                "key length must be between 1 and {} bytes, got {}",
                ELEMENT_SIZE, self.key_len
            )));
        }
        Ok(())
    }
}

fn validate_threshold(n: usize, t: usize) -> Result<()> {
    if t == 0 {
        return Err(Error::InvalidConfig("threshold must be at least 1".to_string()));
    }
    if t > n {
        return Err(Error::InvalidConfig(format!(
            "threshold {} exceeds share count {}",
            t, n
        )));
    }
    if n > MAX_SHARES_LIMIT {
        return Err(Error::InvalidConfig(format!(
            "share count {} exceeds limit {}",
            n, MAX_SHARES_LIMIT
        )));
    }
    Ok(())
}

/// One evaluation point of the sharing polynomial
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    /// Evaluation point, never zero
    pub x: u32,

    /// Polynomial value at `x`, 32-byte big-endian
    #[serde(with = "crate::types::hex_vec")]
    pub y: Vec<u8>,
}

impl Share {
    pub fn new(x: u32, y: Vec<u8>) -> Self {
        Self { x, y }
    }

    /// Canonical encoding: x as 4 big-endian bytes followed by y
    pub fn to_canonical_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + self.y.len());
        bytes.extend_from_slice(&self.x.to_be_bytes());
        bytes.extend_from_slice(&self.y);
        bytes
    }
}

/// Ordered collection of shares
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShareSet {
    shares: Vec<Share>,
}

impl ShareSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_shares(shares: Vec<Share>) -> Self {
        Self { shares }
    }

    pub fn len(&self) -> usize {
        self.shares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Share> {
        self.shares.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Share> {
        self.shares.iter()
    }

    pub fn as_slice(&self) -> &[Share] {
        &self.shares
    }

    /// Shares in `[offset, offset + count)`, if the range is in bounds
    pub fn range(&self, offset: usize, count: usize) -> Option<&[Share]> {
        let end = offset.checked_add(count)?;
        self.shares.get(offset..end)
    }

    pub fn contains_x(&self, x: u32) -> bool {
        self.shares.iter().any(|s| s.x == x)
    }

    /// Add shares not already held, de-duplicating by `x`
    ///
    /// A share whose `x` is held with a different `y` fails the whole merge
    /// with `InconsistentShares` and leaves the set untouched. Returns the
    /// number of shares actually added.
    pub fn merge(&mut self, incoming: &[Share]) -> Result<usize> {
        let mut fresh: Vec<Share> = Vec::new();
        for share in incoming {
            let existing = self
                .shares
                .iter()
                .chain(fresh.iter())
                .find(|s| s.x == share.x);
            match existing {
                Some(held) if held.y == share.y => continue,
                Some(_) => return Err(Error::InconsistentShares(share.x)),
                None => fresh.push(share.clone()),
            }
        }
        let added = fresh.len();
        self.shares.extend(fresh);
        Ok(added)
    }

    /// Hex SHA-256 over the canonical bytes of every share, in order
    pub fn checksum(&self) -> String {
        checksum_of(&self.shares)
    }
}

/// Hex SHA-256 over the canonical bytes of `shares`
pub fn checksum_of(shares: &[Share]) -> String {
    let mut hasher = Sha256::new();
    for share in shares {
        hasher.update(share.to_canonical_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Split `secret` into `n` shares, any `t` of which reconstruct it
pub fn split_secret<R: RngCore + CryptoRng>(
    secret: &[u8],
    n: usize,
    t: usize,
    field: &PrimeField,
    rng: &mut R,
) -> Result<ShareSet> {
    validate_threshold(n, t)?;
    if secret.len() > ELEMENT_SIZE {
        return Err(Error::SecretOutOfRange);
    }
    let constant = field.from_bytes(secret)?;

    let mut coefficients = Vec::with_capacity(t);
    coefficients.push(constant);
    for _ in 1..t {
        coefficients.push(field.random(rng));
    }

    let shares = (1..=n as u64)
        .map(|x| {
            let y = evaluate(field, &coefficients, &field.from_u64(x));
            Share::new(x as u32, field.to_element_bytes(&y).to_vec())
        })
        .collect();

    Ok(ShareSet::from_shares(shares))
}

/// Recover a secret of `out_len` bytes from at least `t` distinct shares
pub fn reconstruct_secret(
    shares: &[Share],
    t: usize,
    field: &PrimeField,
    out_len: usize,
) -> Result<Vec<u8>> {
    if t == 0 {
        return Err(Error::InvalidConfig("threshold must be at least 1".to_string()));
    }

    let mut points: Vec<(u32, FieldElement)> = Vec::with_capacity(shares.len());
    for share in shares {
        if share.x == 0 || share.x as usize > MAX_SHARES_LIMIT {
            return Err(Error::InvalidShare(format!("x = {} out of range", share.x)));
        }
        if share.y.len() != ELEMENT_SIZE {
            return Err(Error::InvalidShare(format!(
                "y must be {} bytes, got {}",
                ELEMENT_SIZE,
                share.y.len()
            )));
        }
        let y = field
            .from_bytes(&share.y)
            .map_err(|_| Error::InvalidShare(format!("y at x = {} not in field", share.x)))?;

        match points.iter().find(|(x, _)| *x == share.x) {
            Some((_, held)) if *held == y => continue,
            Some(_) => return Err(Error::InconsistentShares(share.x)),
            None => points.push((share.x, y)),
        }
    }

    if points.len() < t {
        return Err(Error::InsufficientShares {
            need: t,
            have: points.len(),
        });
    }

    let points = &points[..t];
    let mut secret = field.zero();
    for (j, (xj, yj)) in points.iter().enumerate() {
        let xj = field.from_u64(u64::from(*xj));
        let mut numerator = field.one();
        let mut denominator = field.one();
        for (m, (xm, _)) in points.iter().enumerate() {
            if m == j {
                continue;
            }
            let xm = field.from_u64(u64::from(*xm));
            numerator = field.mul(&numerator, &xm);
            denominator = field.mul(&denominator, &field.sub(&xm, &xj));
        }
        let basis = field.mul(&numerator, &field.inverse(&denominator)?);
        secret = field.add(&secret, &field.mul(yj, &basis));
    }

    field.to_bytes(&secret, out_len)
}

/// Horner evaluation of the polynomial with the given coefficients
fn evaluate(field: &PrimeField, coefficients: &[FieldElement], x: &FieldElement) -> FieldElement {
    coefficients
        .iter()
        .rev()
        .fold(field.zero(), |acc, c| field.add(&field.mul(&acc, x), c))
}

/// Secret sharing bound to one configuration
#[derive(Debug, Clone)]
pub struct Shamir {
    config: SecretConfig,
    field: PrimeField,
}

impl Shamir {
    pub fn new(config: SecretConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            field: config.field(),
            config,
        })
    }

    pub fn config(&self) -> &SecretConfig {
        &self.config
    }

    pub fn field(&self) -> &PrimeField {
        &self.field
    }

    /// Split an operational key into `max_shares` shares
    pub fn split<R: RngCore + CryptoRng>(
        &self,
        key: &OperationalKey,
        rng: &mut R,
    ) -> Result<ShareSet> {
        if key.len() != self.config.key_len {
            return Err(Error::InvalidKeyLength {
                expected: self.config.key_len,
                got: key.len(),
            });
        }
        split_secret(
            key.as_bytes(),
            self.config.max_shares,
            self.config.min_shares,
            &self.field,
            rng,
        )
    }

    /// Reconstruct the operational key from `min_shares` distinct shares
    pub fn reconstruct(&self, shares: &[Share]) -> Result<OperationalKey> {
        let bytes = reconstruct_secret(
            shares,
            self.config.min_shares,
            &self.field,
            self.config.key_len,
        )?;
        OperationalKey::new(bytes, self.config.key_len, &self.field)
    }
}
