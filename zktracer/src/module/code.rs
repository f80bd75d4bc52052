//! Modules dealing with byte code and addresses: ROM, its lexicographic
//! index, contract address derivation, address trimming and hashing.

use ethereum_types::{Address, H256, U256};
use itertools::Itertools;
use keccak_hash::keccak;
use zktracer_common::{address_hi_lo, u256_to_address};

use super::{hi_lo_columns, ModuleOperation, OperationModule, LLARGE, MMEDIUM};
use crate::opcode::OpCode;
use crate::util::{create2_address, create_address};

fn address_columns(address: Address) -> [U256; 2] {
    let (hi, lo) = address_hi_lo(address);
    [U256::from(hi), U256::from(lo)]
}

fn hash_columns(hash: H256) -> [U256; 2] {
    hi_lo_columns(U256::from_big_endian(hash.as_bytes()))
}

/// Identifies one version of the code at an address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContractMetadata {
    pub address: Address,
    pub deployment_number: u32,
    /// Whether the code is init code still being deployed.
    pub under_deployment: bool,
}

/// A piece of code loaded into ROM, by contract version.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RomLexOperation {
    pub metadata: ContractMetadata,
    pub code_hash: H256,
    pub code_size: usize,
}

impl ModuleOperation for RomLexOperation {
    const MODULE: &'static str = "ROM_LEX";
    const COLUMNS: &'static [&'static str] = &[
        "ADDRESS_HI",
        "ADDRESS_LO",
        "DEPLOYMENT_NUMBER",
        "DEPLOYMENT_STATUS",
        "CODE_HASH_HI",
        "CODE_HASH_LO",
        "CODE_SIZE",
    ];

    fn line_count(&self) -> usize {
        1
    }

    fn columns(&self) -> Vec<U256> {
        let mut columns = address_columns(self.metadata.address).to_vec();
        columns.extend([
            U256::from(self.metadata.deployment_number),
            U256::from(self.metadata.under_deployment as u8),
        ]);
        columns.extend(hash_columns(self.code_hash));
        columns.push(U256::from(self.code_size));
        columns
    }
}

pub type RomLex = OperationModule<RomLexOperation>;

impl RomLex {
    pub fn call(&mut self, metadata: ContractMetadata, code: &[u8]) {
        self.add(RomLexOperation {
            metadata,
            code_hash: keccak(code),
            code_size: code.len(),
        });
    }

    /// The code fragment index of a contract version: its 1-based rank in
    /// the sorted list of every contract version of the conflation.
    ///
    /// Only meaningful once the conflation is complete.
    pub fn code_fragment_index(&self, metadata: &ContractMetadata) -> Option<usize> {
        self.operations()
            .map(|op| op.metadata)
            .sorted()
            .dedup()
            .position(|m| m == *metadata)
            .map(|i| i + 1)
    }
}

/// The code of a contract, keyed by its hash.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RomOperation {
    pub code_hash: H256,
    pub code: Vec<u8>,
}

impl ModuleOperation for RomOperation {
    const MODULE: &'static str = "ROM";
    const COLUMNS: &'static [&'static str] = &["CODE_HASH_HI", "CODE_HASH_LO", "CODE_SIZE"];

    /// Code padded to a multiple of 32 bytes, plus 32 rows of push data
    /// padding.
    fn line_count(&self) -> usize {
        self.code.len().div_ceil(32) * 32 + 32
    }

    fn columns(&self) -> Vec<U256> {
        let mut columns = hash_columns(self.code_hash).to_vec();
        columns.push(U256::from(self.code.len()));
        columns
    }
}

pub type Rom = OperationModule<RomOperation>;

impl Rom {
    pub fn call(&mut self, code: &[u8]) {
        if code.is_empty() {
            return;
        }
        self.add(RomOperation {
            code_hash: keccak(code),
            code: code.to_vec(),
        });
    }
}

/// Address derivation of a `CREATE`, `CREATE2` or deployment transaction.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RlpAddrOperation {
    pub opcode: OpCode,
    pub sender: Address,
    pub nonce: u64,
    pub salt: Option<U256>,
    pub init_code_hash: Option<H256>,
    pub address: Address,
}

impl ModuleOperation for RlpAddrOperation {
    const MODULE: &'static str = "RLP_ADDR";
    const COLUMNS: &'static [&'static str] = &[
        "RECIPE",
        "ADDR_HI",
        "ADDR_LO",
        "NONCE",
        "SALT_HI",
        "SALT_LO",
        "KEC_HI",
        "KEC_LO",
        "DEP_ADDR_HI",
        "DEP_ADDR_LO",
    ];

    fn line_count(&self) -> usize {
        match self.opcode {
            OpCode::Create2 => 6,
            _ => MMEDIUM,
        }
    }

    fn columns(&self) -> Vec<U256> {
        let mut columns = vec![U256::from(self.opcode.byte())];
        columns.extend(address_columns(self.sender));
        columns.push(U256::from(self.nonce));
        columns.extend(hi_lo_columns(self.salt.unwrap_or_default()));
        columns.extend(hash_columns(self.init_code_hash.unwrap_or_default()));
        columns.extend(address_columns(self.address));
        columns
    }
}

pub type RlpAddr = OperationModule<RlpAddrOperation>;

impl RlpAddr {
    pub fn call_create(&mut self, sender: Address, nonce: u64) -> Address {
        let address = create_address(sender, nonce);
        self.add(RlpAddrOperation {
            opcode: OpCode::Create,
            sender,
            nonce,
            salt: None,
            init_code_hash: None,
            address,
        });
        address
    }

    pub fn call_create2(&mut self, sender: Address, salt: U256, init_code_hash: H256) -> Address {
        let address = create2_address(sender, salt, init_code_hash);
        self.add(RlpAddrOperation {
            opcode: OpCode::Create2,
            sender,
            nonce: 0,
            salt: Some(salt),
            init_code_hash: Some(init_code_hash),
            address,
        });
        address
    }
}

/// Trimming of a stack word to an address.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TrmOperation {
    pub raw: U256,
}

impl ModuleOperation for TrmOperation {
    const MODULE: &'static str = "TRM";
    const COLUMNS: &'static [&'static str] = &["RAW_ADDRESS_HI", "RAW_ADDRESS_LO"];

    fn line_count(&self) -> usize {
        LLARGE
    }

    fn columns(&self) -> Vec<U256> {
        hi_lo_columns(self.raw).to_vec()
    }
}

pub type Trm = OperationModule<TrmOperation>;

impl Trm {
    pub fn call(&mut self, raw: U256) -> Address {
        self.add(TrmOperation { raw });
        u256_to_address(raw)
    }
}

/// A Keccak-256 hash of some preimage.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct KeccakOperation {
    pub hash: H256,
    pub size: usize,
}

impl ModuleOperation for KeccakOperation {
    const MODULE: &'static str = "KECCAK";
    const COLUMNS: &'static [&'static str] = &["HASH_HI", "HASH_LO", "SIZE"];

    /// One row per 136-byte block of the padded preimage.
    fn line_count(&self) -> usize {
        self.size / 136 + 1
    }

    fn columns(&self) -> Vec<U256> {
        let mut columns = hash_columns(self.hash).to_vec();
        columns.push(U256::from(self.size));
        columns
    }
}

pub type Keccak = OperationModule<KeccakOperation>;

impl Keccak {
    pub fn call(&mut self, preimage: &[u8]) -> H256 {
        let hash = keccak(preimage);
        self.add(KeccakOperation {
            hash,
            size: preimage.len(),
        });
        hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Module;

    #[test]
    fn code_fragment_indices_follow_the_sorted_order() {
        let mut rom_lex = RomLex::new();
        let a = ContractMetadata {
            address: Address::repeat_byte(2),
            deployment_number: 1,
            under_deployment: false,
        };
        let b = ContractMetadata {
            address: Address::repeat_byte(1),
            deployment_number: 3,
            under_deployment: true,
        };
        rom_lex.call(a, &[0x00]);
        rom_lex.call(b, &[0x60, 0x00]);
        rom_lex.call(a, &[0x00]);
        assert_eq!(rom_lex.line_count(), 2);
        assert_eq!(rom_lex.code_fragment_index(&b), Some(1));
        assert_eq!(rom_lex.code_fragment_index(&a), Some(2));
        assert_eq!(
            rom_lex.code_fragment_index(&ContractMetadata {
                deployment_number: 2,
                ..a
            }),
            None
        );
    }

    #[test]
    fn identical_code_is_loaded_once() {
        let mut rom = Rom::new();
        rom.call(&[0x60, 0x01]);
        rom.call(&[0x60, 0x01]);
        rom.call(&[]);
        assert_eq!(rom.operation_count(), 1);
        assert_eq!(rom.line_count(), 64);
    }

    #[test]
    fn trimming_keeps_the_low_bytes() {
        let mut trm = Trm::new();
        let raw = U256::MAX;
        assert_eq!(trm.call(raw), Address::repeat_byte(0xff));
        assert_eq!(trm.line_count(), LLARGE);
    }
}
