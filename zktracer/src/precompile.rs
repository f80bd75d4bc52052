//! Precompiled contracts: their addresses and what a call to them costs.
//!
//! The tracer never executes a precompile. It prices the call from its
//! input so the gas the host reports can be reconciled.

use ethereum_types::{Address, U256};

/// Bytes in one input word of the hashing precompiles.
const WORD: usize = 32;

/// Pairs of points in an `ECPAIRING` input are this long.
const PAIRING_CHUNK: usize = 192;

/// Exact input length of `BLAKE2F`.
const BLAKE2F_INPUT: usize = 213;

/// Exact input length of `POINTEVALUATION`.
const POINT_EVALUATION_INPUT: usize = 192;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Precompile {
    EcRecover = 0x01,
    Sha256 = 0x02,
    Ripemd160 = 0x03,
    Identity = 0x04,
    ModExp = 0x05,
    EcAdd = 0x06,
    EcMul = 0x07,
    EcPairing = 0x08,
    Blake2f = 0x09,
    PointEvaluation = 0x0a,
}

impl Precompile {
    pub const ALL: [Self; 10] = [
        Self::EcRecover,
        Self::Sha256,
        Self::Ripemd160,
        Self::Identity,
        Self::ModExp,
        Self::EcAdd,
        Self::EcMul,
        Self::EcPairing,
        Self::Blake2f,
        Self::PointEvaluation,
    ];

    /// The precompile living at `address`, if any.
    pub fn from_address(address: &Address) -> Option<Self> {
        let bytes = address.as_bytes();
        if bytes[..19].iter().any(|&b| b != 0) {
            return None;
        }
        Self::ALL.into_iter().find(|p| *p as u8 == bytes[19])
    }

    pub fn address(self) -> Address {
        Address::from_low_u64_be(self as u64)
    }

    /// Gas the precompile charges for `input`, or `None` if the input is
    /// malformed and the call fails whatever the gas.
    pub fn cost(self, input: &[u8]) -> Option<u64> {
        let words = input.len().div_ceil(WORD) as u64;
        match self {
            Self::EcRecover => Some(3_000),
            Self::Sha256 => Some(60 + 12 * words),
            Self::Ripemd160 => Some(600 + 120 * words),
            Self::Identity => Some(15 + 3 * words),
            Self::ModExp => Some(modexp_cost(input)),
            Self::EcAdd => Some(150),
            Self::EcMul => Some(6_000),
            Self::EcPairing => (input.len() % PAIRING_CHUNK == 0)
                .then(|| 45_000 + 34_000 * (input.len() / PAIRING_CHUNK) as u64),
            Self::Blake2f => {
                if input.len() != BLAKE2F_INPUT || input[BLAKE2F_INPUT - 1] > 1 {
                    return None;
                }
                let rounds = u32::from_be_bytes([input[0], input[1], input[2], input[3]]);
                Some(u64::from(rounds))
            }
            Self::PointEvaluation => (input.len() == POINT_EVALUATION_INPUT).then_some(50_000),
        }
    }
}

/// The `offset..offset + len` slice of `input`, zero padded past its end.
fn padded(input: &[u8], offset: usize, len: usize) -> Vec<u8> {
    let mut bytes = vec![0; len];
    if offset < input.len() {
        let available = (input.len() - offset).min(len);
        bytes[..available].copy_from_slice(&input[offset..offset + available]);
    }
    bytes
}

/// A length field of the `MODEXP` header, saturated to `u64`.
fn modexp_length(input: &[u8], field: usize) -> u64 {
    let word = U256::from_big_endian(&padded(input, field * WORD, WORD));
    if word > U256::from(u32::MAX) {
        u64::MAX
    } else {
        word.low_u64()
    }
}

/// EIP-2565 pricing.
fn modexp_cost(input: &[u8]) -> u64 {
    let base_len = modexp_length(input, 0);
    let exp_len = modexp_length(input, 1);
    let mod_len = modexp_length(input, 2);
    if [base_len, exp_len, mod_len].contains(&u64::MAX) {
        return u64::MAX;
    }

    let words = base_len.max(mod_len).div_ceil(8);
    let multiplication_complexity = words.saturating_mul(words);

    let head_len = exp_len.min(WORD as u64) as usize;
    let head = U256::from_big_endian(&padded(input, 3 * WORD + base_len as usize, head_len));
    let head_bits = head.bits() as u64;
    let iterations = if exp_len <= WORD as u64 {
        head_bits.saturating_sub(1)
    } else {
        8 * (exp_len - WORD as u64) + head_bits.saturating_sub(1)
    };

    let cost = multiplication_complexity.saturating_mul(iterations.max(1)) / 3;
    cost.max(200)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_precompile_addresses() {
        for precompile in Precompile::ALL {
            assert_eq!(
                Precompile::from_address(&precompile.address()),
                Some(precompile)
            );
        }
        assert_eq!(Precompile::from_address(&Address::zero()), None);
        assert_eq!(Precompile::from_address(&Address::from_low_u64_be(0x0b)), None);
        assert_eq!(Precompile::from_address(&Address::from_low_u64_be(0x0101)), None);
    }

    #[test]
    fn hashing_precompiles_charge_per_word() {
        assert_eq!(Precompile::Identity.cost(&[]), Some(15));
        assert_eq!(Precompile::Identity.cost(&[0; 33]), Some(15 + 3 * 2));
        assert_eq!(Precompile::Sha256.cost(&[0; 32]), Some(72));
        assert_eq!(Precompile::Ripemd160.cost(&[0; 64]), Some(840));
        assert_eq!(Precompile::EcRecover.cost(&[0; 500]), Some(3_000));
    }

    #[test]
    fn malformed_inputs_have_no_cost() {
        assert_eq!(Precompile::EcPairing.cost(&[0; 191]), None);
        assert_eq!(Precompile::EcPairing.cost(&[0; 384]), Some(45_000 + 2 * 34_000));
        assert_eq!(Precompile::EcPairing.cost(&[]), Some(45_000));
        assert_eq!(Precompile::Blake2f.cost(&[0; 212]), None);
        assert_eq!(Precompile::PointEvaluation.cost(&[0; 191]), None);

        let mut blake = [0u8; BLAKE2F_INPUT];
        blake[3] = 12;
        assert_eq!(Precompile::Blake2f.cost(&blake), Some(12));
        blake[BLAKE2F_INPUT - 1] = 2;
        assert_eq!(Precompile::Blake2f.cost(&blake), None);
    }

    #[test]
    fn modexp_follows_eip_2565() {
        // 3 ** 0xffff mod 2 ** 256 - 1 over 32 byte operands.
        let mut input = vec![0u8; 96];
        input[31] = 32;
        input[63] = 2;
        input[95] = 32;
        input.extend([0; 31]);
        input.push(3);
        input.extend([0xff, 0xff]);
        input.extend([0xff; 32]);
        // Four words squared, fifteen iterations.
        assert_eq!(Precompile::ModExp.cost(&input), Some(200));

        let mut large = vec![0u8; 96];
        large[30] = 1;
        large[62] = 1;
        large[94] = 1;
        large.extend(vec![0xff; 3 * 256]);
        // Thirty-two words squared, 8 * 224 + 255 iterations.
        assert_eq!(
            Precompile::ModExp.cost(&large),
            Some(32 * 32 * (8 * 224 + 255) / 3)
        );

        let mut huge = vec![0u8; 96];
        huge[0] = 1;
        assert_eq!(Precompile::ModExp.cost(&huge), Some(u64::MAX));
        assert_eq!(Precompile::ModExp.cost(&[]), Some(200));
    }
}
