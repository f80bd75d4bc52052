use ethereum_types::{Address, H256, U256};
use keccak_hash::keccak;
use rlp::RlpStream;

use crate::opcode::OpCode;

/// Address of a contract created by `sender` with `CREATE` or a deployment
/// transaction.
pub fn create_address(sender: Address, nonce: u64) -> Address {
    let mut stream = RlpStream::new_list(2);
    stream.append(&sender);
    stream.append(&nonce);
    Address::from_slice(&keccak(stream.out()).as_bytes()[12..])
}

/// Address of a contract created by `sender` with `CREATE2`.
pub fn create2_address(sender: Address, salt: U256, init_code_hash: H256) -> Address {
    let mut preimage = Vec::with_capacity(85);
    preimage.push(0xff);
    preimage.extend_from_slice(sender.as_bytes());
    let mut salt_bytes = [0u8; 32];
    salt.to_big_endian(&mut salt_bytes);
    preimage.extend_from_slice(&salt_bytes);
    preimage.extend_from_slice(init_code_hash.as_bytes());
    Address::from_slice(&keccak(preimage).as_bytes()[12..])
}

/// Whether `dest` points at a `JUMPDEST` that is not part of push data.
pub fn is_valid_jump_destination(code: &[u8], dest: U256) -> bool {
    if dest >= U256::from(code.len()) {
        return false;
    }
    let dest = dest.as_usize();
    let mut pc = 0;
    while pc < code.len() {
        let opcode = OpCode::from_byte(code[pc]);
        if pc == dest {
            return opcode == OpCode::JumpDest;
        }
        pc += match opcode {
            OpCode::Push(n) => 1 + n as usize,
            _ => 1,
        };
    }
    false
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn create_address_matches_known_value() {
        // First contract deployed by 0x6ac7ea33f8831ea9dcc53393aaa88b25a785dbf0.
        let sender = Address::from(hex!("6ac7ea33f8831ea9dcc53393aaa88b25a785dbf0"));
        assert_eq!(
            create_address(sender, 0),
            Address::from(hex!("cd234a471b72ba2f1ccf0a70fcaba648a5eecd8d"))
        );
    }

    #[test]
    fn create2_address_matches_eip_1014_example() {
        // Example 0 of EIP-1014.
        let init_code_hash = keccak([0x00]);
        assert_eq!(
            create2_address(Address::zero(), U256::zero(), init_code_hash),
            Address::from(hex!("4d1a2e2bb4f88f0250f26ffff098b0b30b26bf38"))
        );
    }

    #[test]
    fn jump_destinations_skip_push_data() {
        // PUSH1 0x5b JUMPDEST
        let code = [0x60, 0x5b, 0x5b];
        assert!(!is_valid_jump_destination(&code, U256::one()));
        assert!(is_valid_jump_destination(&code, U256::from(2)));
        assert!(!is_valid_jump_destination(&code, U256::from(3)));
    }
}
