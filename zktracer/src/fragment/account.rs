use ethereum_types::{Address, H256, U256};
use keccak_hash::keccak;
use zktracer_common::{address_hi_lo, hi_lo, EMPTY_CODE_HASH};

use super::OccurrenceFlags;
use crate::host::WorldView;
use crate::hub::DeploymentInfo;
use crate::metadata::FragmentId;

/// The state of an account as seen by one side of an account fragment.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AccountSnapshot {
    pub address: Address,
    pub nonce: u64,
    pub balance: U256,
    pub code_size: usize,
    pub code_hash: H256,
    pub is_warm: bool,
    pub deployment_number: u32,
    pub deployment_status: bool,
}

impl Default for AccountSnapshot {
    fn default() -> Self {
        Self {
            address: Address::zero(),
            nonce: 0,
            balance: U256::zero(),
            code_size: 0,
            code_hash: EMPTY_CODE_HASH,
            is_warm: false,
            deployment_number: 0,
            deployment_status: false,
        }
    }
}

impl AccountSnapshot {
    /// The current state of `address` in `world`.
    pub fn canonical(
        world: &dyn WorldView,
        deployment_info: &DeploymentInfo,
        address: Address,
        is_warm: bool,
    ) -> Self {
        let account = world.account_or_default(&address);
        Self {
            address,
            nonce: account.nonce,
            balance: account.balance,
            code_size: account.code.len(),
            code_hash: account.code_hash(),
            is_warm,
            deployment_number: deployment_info.deployment_number(&address),
            deployment_status: deployment_info.is_under_deployment(&address),
        }
    }

    pub fn warm(mut self) -> Self {
        self.is_warm = true;
        self
    }

    pub fn increment_nonce(mut self) -> Self {
        self.nonce = self.nonce.saturating_add(1);
        self
    }

    pub fn credit(mut self, value: U256) -> Self {
        self.balance = self.balance.saturating_add(value);
        self
    }

    pub fn debit(mut self, value: U256) -> Self {
        self.balance = self.balance.saturating_sub(value);
        self
    }

    /// Starts deployment `deployment_number` with `init_code` as the
    /// account's code.
    pub fn deploy(mut self, deployment_number: u32, init_code: &[u8]) -> Self {
        self.deployment_number = deployment_number;
        self.deployment_status = true;
        self.code_size = init_code.len();
        self.code_hash = if init_code.is_empty() {
            EMPTY_CODE_HASH
        } else {
            keccak(init_code)
        };
        self
    }

    /// Ends a deployment, installing the deployed code.
    pub fn deposit_code(mut self, code: &[u8]) -> Self {
        self.deployment_status = false;
        self.code_size = code.len();
        self.code_hash = if code.is_empty() {
            EMPTY_CODE_HASH
        } else {
            keccak(code)
        };
        self
    }

    /// The account wiped by a self-destruct.
    pub fn wiped(self) -> Self {
        Self {
            address: self.address,
            is_warm: self.is_warm,
            deployment_number: self.deployment_number,
            ..Default::default()
        }
    }
}

/// Ordering of an account or storage fragment among the state updates of
/// the conflation.
///
/// The dominant stamp is the hub stamp of the section producing the update,
/// or the revert stamp for an update undone by a revert. The sub stamp
/// orders updates sharing a dominant stamp.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomSubStamps {
    pub dom: u32,
    pub sub: u32,
}

impl DomSubStamps {
    const MULTIPLIER: u32 = 8;

    pub const fn standard(hub_stamp: u32, offset: u32) -> Self {
        Self {
            dom: hub_stamp,
            sub: offset,
        }
    }

    /// An update undone when the context reverting at `revert_stamp`
    /// reverts.
    pub const fn revert(hub_stamp: u32, revert_stamp: u32, offset: u32) -> Self {
        Self {
            dom: revert_stamp,
            sub: Self::MULTIPLIER * hub_stamp + offset,
        }
    }

    /// An update applied at the end of the transaction, after every other
    /// update of it.
    pub const fn end_of_transaction(end_stamp: u32, hub_stamp: u32) -> Self {
        Self {
            dom: end_stamp,
            sub: hub_stamp,
        }
    }
}

/// An account read or update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountFragment {
    pub id: FragmentId,
    pub before: AccountSnapshot,
    pub after: AccountSnapshot,
    pub dom_sub: DomSubStamps,
    pub relative_block_number: u32,
    /// Whether the address argument went through the trimming module.
    pub trimmed: bool,
    /// Whether the fragment needs the code fragment index of the account's
    /// code, assigned once the conflation is complete.
    pub requires_rom_lex: bool,
    pub code_fragment_index: Option<usize>,
}

impl AccountFragment {
    pub fn address(&self) -> Address {
        self.before.address
    }

    /// The state `latest` returns to once this update is undone: balance
    /// and nonce changes are reversed, replaced code is restored and the
    /// account goes back to its former warmth.
    pub fn undone(&self, latest: &AccountSnapshot) -> AccountSnapshot {
        let mut snapshot = latest.clone();
        snapshot.balance = if self.after.balance >= self.before.balance {
            snapshot
                .balance
                .saturating_sub(self.after.balance - self.before.balance)
        } else {
            snapshot
                .balance
                .saturating_add(self.before.balance - self.after.balance)
        };
        snapshot.nonce = snapshot
            .nonce
            .saturating_sub(self.after.nonce.saturating_sub(self.before.nonce));
        if self.after.code_hash != self.before.code_hash {
            snapshot.code_size = self.before.code_size;
            snapshot.code_hash = self.before.code_hash;
        }
        snapshot.is_warm = self.before.is_warm;
        snapshot
    }

    pub const COLUMNS: &'static [&'static str] = &[
        "ACC_ADDRESS_HI",
        "ACC_ADDRESS_LO",
        "ACC_NONCE",
        "ACC_NONCE_NEW",
        "ACC_BALANCE",
        "ACC_BALANCE_NEW",
        "ACC_CODE_SIZE",
        "ACC_CODE_SIZE_NEW",
        "ACC_CODE_HASH_HI",
        "ACC_CODE_HASH_LO",
        "ACC_CODE_HASH_HI_NEW",
        "ACC_CODE_HASH_LO_NEW",
        "ACC_WARMTH",
        "ACC_WARMTH_NEW",
        "ACC_DEPLOYMENT_NUMBER",
        "ACC_DEPLOYMENT_NUMBER_NEW",
        "ACC_DEPLOYMENT_STATUS",
        "ACC_DEPLOYMENT_STATUS_NEW",
        "ACC_TRM_FLAG",
        "ACC_ROMLEX_FLAG",
        "ACC_CODE_FRAGMENT_INDEX",
        "ACC_DOM_STAMP",
        "ACC_SUB_STAMP",
        "ACC_FIRST_IN_TXN",
        "ACC_FIRST_IN_BLK",
        "ACC_FIRST_IN_CNF",
        "ACC_FINAL_IN_TXN",
        "ACC_FINAL_IN_BLK",
        "ACC_FINAL_IN_CNF",
    ];

    pub fn values(&self, flags: OccurrenceFlags) -> Vec<U256> {
        let (address_hi, address_lo) = address_hi_lo(self.address());
        let hash = |h: H256| hi_lo(U256::from_big_endian(h.as_bytes()));
        let (hash_hi, hash_lo) = hash(self.before.code_hash);
        let (hash_hi_new, hash_lo_new) = hash(self.after.code_hash);
        let mut values = vec![
            U256::from(address_hi),
            U256::from(address_lo),
            U256::from(self.before.nonce),
            U256::from(self.after.nonce),
            self.before.balance,
            self.after.balance,
            U256::from(self.before.code_size),
            U256::from(self.after.code_size),
            U256::from(hash_hi),
            U256::from(hash_lo),
            U256::from(hash_hi_new),
            U256::from(hash_lo_new),
            U256::from(self.before.is_warm as u8),
            U256::from(self.after.is_warm as u8),
            U256::from(self.before.deployment_number),
            U256::from(self.after.deployment_number),
            U256::from(self.before.deployment_status as u8),
            U256::from(self.after.deployment_status as u8),
            U256::from(self.trimmed as u8),
            U256::from(self.requires_rom_lex as u8),
            U256::from(self.code_fragment_index.unwrap_or_default()),
            U256::from(self.dom_sub.dom),
            U256::from(self.dom_sub.sub),
        ];
        values.extend(flags.values());
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{Account, MemoryWorld};

    #[test]
    fn canonical_snapshots_read_the_world() {
        let mut world = MemoryWorld::new();
        let address = Address::repeat_byte(3);
        world.set_account(
            address,
            Account {
                nonce: 4,
                balance: U256::from(10),
                code: vec![0x00],
            },
        );
        let mut info = DeploymentInfo::new();
        info.new_deployment(address);
        let snapshot = AccountSnapshot::canonical(&world, &info, address, false);
        assert_eq!(snapshot.nonce, 4);
        assert_eq!(snapshot.code_size, 1);
        assert_eq!(snapshot.deployment_number, 1);
        assert!(snapshot.deployment_status);

        let next = snapshot.clone().warm().debit(U256::from(3)).increment_nonce();
        assert_eq!(next.balance, U256::from(7));
        assert_eq!(next.nonce, 5);
        assert!(next.is_warm);
    }

    #[test]
    fn wiping_keeps_identity_only() {
        let snapshot = AccountSnapshot {
            address: Address::repeat_byte(1),
            nonce: 3,
            balance: U256::one(),
            deployment_number: 2,
            ..Default::default()
        }
        .deposit_code(&[0x00]);
        let wiped = snapshot.wiped();
        assert_eq!(wiped.nonce, 0);
        assert_eq!(wiped.code_hash, EMPTY_CODE_HASH);
        assert_eq!(wiped.deployment_number, 2);
    }

    #[test]
    fn undoing_reverses_deltas_on_top_of_later_updates() {
        let before = AccountSnapshot {
            address: Address::repeat_byte(7),
            balance: U256::from(100),
            nonce: 1,
            ..Default::default()
        };
        let fragment = AccountFragment {
            id: 1,
            before: before.clone(),
            after: before.clone().debit(U256::from(30)).increment_nonce().warm(),
            dom_sub: DomSubStamps::standard(3, 0),
            relative_block_number: 1,
            trimmed: false,
            requires_rom_lex: false,
            code_fragment_index: None,
        };
        // Another update credited 5 wei in between.
        let latest = fragment.after.clone().credit(U256::from(5));
        let undone = fragment.undone(&latest);
        assert_eq!(undone.balance, U256::from(105));
        assert_eq!(undone.nonce, 1);
        assert!(!undone.is_warm);
    }

    #[test]
    fn reverted_updates_sort_after_their_revert() {
        let standard = DomSubStamps::standard(10, 0);
        let undone = DomSubStamps::revert(10, 15, 0);
        assert!(undone > standard);
    }
}
