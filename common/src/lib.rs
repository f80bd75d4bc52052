use ethereum_types::{Address, H256, U256};

/// The hash value of an account empty EVM code.
/// 0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470
pub const EMPTY_CODE_HASH: H256 = H256([
    197, 210, 70, 1, 134, 247, 35, 60, 146, 126, 125, 178, 220, 199, 3, 192, 229, 0, 182, 83, 202,
    130, 39, 59, 123, 250, 216, 4, 93, 133, 164, 112,
]);

/// Maximum size of deployed contract code, as introduced by EIP-170.
pub const MAX_CODE_SIZE: usize = 0x6000;

/// Maximum size of init code, as introduced by EIP-3860.
pub const MAX_INIT_CODE_SIZE: usize = 2 * MAX_CODE_SIZE;

/// First byte of deployed code that is rejected since EIP-3541.
pub const INVALID_CODE_PREFIX: u8 = 0xEF;

/// Maximum height of the EVM stack.
pub const STACK_LIMIT: usize = 1024;

/// Maximum depth of nested message calls and contract creations.
pub const CALL_DEPTH_LIMIT: usize = 1024;

/// Gas constants of the fee schedule used by the tracer.
pub mod gas {
    pub const G_ZERO: u64 = 0;
    pub const G_JUMPDEST: u64 = 1;
    pub const G_BASE: u64 = 2;
    pub const G_VERY_LOW: u64 = 3;
    pub const G_LOW: u64 = 5;
    pub const G_MID: u64 = 8;
    pub const G_HIGH: u64 = 10;
    pub const G_WARM_ACCESS: u64 = 100;
    pub const G_COLD_ACCOUNT_ACCESS: u64 = 2600;
    pub const G_COLD_SLOAD: u64 = 2100;
    pub const G_SSET: u64 = 20_000;
    pub const G_SRESET: u64 = 2900;
    pub const G_CALL_STIPEND: u64 = 2300;
    pub const G_CALL_VALUE: u64 = 9000;
    pub const G_NEW_ACCOUNT: u64 = 25_000;
    pub const G_SELFDESTRUCT: u64 = 5000;
    pub const G_CREATE: u64 = 32_000;
    pub const G_CODE_DEPOSIT: u64 = 200;
    pub const G_MEMORY: u64 = 3;
    pub const G_QUAD_DIVISOR: u64 = 512;
    pub const G_COPY: u64 = 3;
    pub const G_KECCAK256: u64 = 30;
    pub const G_KECCAK256_WORD: u64 = 6;
    pub const G_INIT_CODE_WORD: u64 = 2;
    pub const G_LOG: u64 = 375;
    pub const G_LOG_DATA: u64 = 8;
    pub const G_LOG_TOPIC: u64 = 375;
    pub const G_EXP: u64 = 10;
    pub const G_EXP_BYTE: u64 = 50;
    pub const G_BLOCKHASH: u64 = 20;
    pub const G_TRANSACTION: u64 = 21_000;
    pub const G_TX_CREATE: u64 = 32_000;
    pub const G_TX_DATA_ZERO: u64 = 4;
    pub const G_TX_DATA_NON_ZERO: u64 = 16;
    pub const G_ACCESS_LIST_ADDRESS: u64 = 2400;
    pub const G_ACCESS_LIST_STORAGE: u64 = 1900;
    /// Upper bound on the refund counter, as a fraction of the gas used.
    pub const MAX_REFUND_QUOTIENT: u64 = 5;
}

/// Splits a 256-bit word into its high and low 128-bit halves.
pub fn hi_lo(word: U256) -> (u128, u128) {
    let lo = word.low_u128();
    let hi = (word >> 128).low_u128();
    (hi, lo)
}

/// Splits an address into its high 4 bytes and low 16 bytes, the way
/// addresses are laid out over two trace columns.
pub fn address_hi_lo(address: Address) -> (u32, u128) {
    let bytes = address.as_bytes();
    let mut hi = [0u8; 4];
    hi.copy_from_slice(&bytes[..4]);
    let mut lo = [0u8; 16];
    lo.copy_from_slice(&bytes[4..]);
    (u32::from_be_bytes(hi), u128::from_be_bytes(lo))
}

/// Interprets the low 20 bytes of a word as an address.
pub fn u256_to_address(word: U256) -> Address {
    let mut bytes = [0u8; 32];
    word.to_big_endian(&mut bytes);
    Address::from_slice(&bytes[12..])
}

/// Embeds an address into a 256-bit word.
pub fn address_to_u256(address: Address) -> U256 {
    U256::from_big_endian(address.as_bytes())
}

#[test]
fn test_empty_code_hash() {
    assert_eq!(EMPTY_CODE_HASH, keccak_hash::keccak([]));
}

#[test]
fn test_hi_lo_split() {
    let word = (U256::from(7) << 128) + U256::from(9);
    assert_eq!(hi_lo(word), (7, 9));
}

#[test]
fn test_address_roundtrip_through_word() {
    let address = Address::from_low_u64_be(0xdead_beef);
    assert_eq!(u256_to_address(address_to_u256(address)), address);
    assert_eq!(address_hi_lo(address), (0, 0xdead_beef));
}

#[test]
fn test_null_rlp_is_not_empty_code() {
    assert_ne!(EMPTY_CODE_HASH, keccak_hash::keccak(rlp::NULL_RLP));
}
