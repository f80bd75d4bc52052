use ethereum_types::{H256, U256};
use zktracer_common::hi_lo;

use crate::callstack::StackLine;
use crate::opcode::OpCode;
use crate::signals::{Aborts, Signals, TracedException};

/// One stack row of an opcode: up to four stack accesses, the opcode's
/// static data, its exception and the sub-modules it triggers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackFragment {
    pub line: StackLine,
    pub opcode: OpCode,
    pub height: usize,
    pub height_new: usize,
    pub static_gas: u64,
    pub exception: TracedException,
    pub aborts: Aborts,
    pub signals: Signals,
    pub push_value: Option<U256>,
    /// Result of a `KECCAK256`, or the hash of code deposited by a
    /// deployment.
    pub hash: Option<H256>,
}

impl StackFragment {
    pub const COLUMNS: &'static [&'static str] = &[
        "STK_INSTRUCTION",
        "STK_HEIGHT",
        "STK_HEIGHT_NEW",
        "STK_STATIC_GAS",
        "STK_EXCEPTION",
        "STK_ABORTS",
        "STK_PUSH_VALUE_HI",
        "STK_PUSH_VALUE_LO",
        "STK_HASH_HI",
        "STK_HASH_LO",
        "STK_HEIGHT_1",
        "STK_POP_1",
        "STK_VALUE_HI_1",
        "STK_VALUE_LO_1",
        "STK_HEIGHT_2",
        "STK_POP_2",
        "STK_VALUE_HI_2",
        "STK_VALUE_LO_2",
        "STK_HEIGHT_3",
        "STK_POP_3",
        "STK_VALUE_HI_3",
        "STK_VALUE_LO_3",
        "STK_HEIGHT_4",
        "STK_POP_4",
        "STK_VALUE_HI_4",
        "STK_VALUE_LO_4",
        "STK_MODULE_FLAGS",
    ];

    /// Sub-modules triggered by the opcode, one bit each.
    fn module_flags(&self) -> u32 {
        let s = &self.signals;
        [
            s.add, s.bin, s.blockhash, s.exp, s.ext, s.gas, s.keccak, s.mmu, s.mod_, s.mul, s.mxp,
            s.oob, s.rlp_addr, s.shf, s.stp, s.trm, s.wcp,
        ]
        .iter()
        .enumerate()
        .fold(0, |flags, (i, &on)| flags | ((on as u32) << i))
    }

    pub fn values(&self) -> Vec<U256> {
        let (push_hi, push_lo) = hi_lo(self.push_value.unwrap_or_default());
        let (hash_hi, hash_lo) = hi_lo(U256::from_big_endian(
            self.hash.unwrap_or_default().as_bytes(),
        ));
        let mut values = vec![
            U256::from(self.opcode.byte()),
            U256::from(self.height),
            U256::from(self.height_new),
            U256::from(self.static_gas),
            U256::from(self.exception as u8),
            U256::from(self.aborts.bits()),
            U256::from(push_hi),
            U256::from(push_lo),
            U256::from(hash_hi),
            U256::from(hash_lo),
        ];
        for i in 0..4 {
            match self.line.items.get(i) {
                Some(item) => {
                    let (hi, lo) = hi_lo(item.value);
                    values.extend([
                        U256::from(item.height),
                        U256::from(item.pop as u8),
                        U256::from(hi),
                        U256::from(lo),
                    ]);
                }
                None => values.extend([U256::zero(); 4]),
            }
        }
        values.push(U256::from(self.module_flags()));
        values
    }
}
