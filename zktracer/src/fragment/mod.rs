//! The typed rows a trace section is made of.

pub mod account;
pub mod context;
pub mod imc;
pub mod scenario;
pub mod stack;
pub mod storage;
pub mod transaction;

use ethereum_types::U256;

pub use self::account::{AccountFragment, AccountSnapshot, DomSubStamps};
pub use self::context::{ContextFragment, ContextKind, ContextSnapshot};
pub use self::imc::{ImcCall, ImcFragment};
pub use self::scenario::{
    CallScenario, CreateScenario, ReturnScenario, ScenarioFragment, SelfdestructScenario,
};
pub use self::stack::StackFragment;
pub use self::storage::{StorageFragment, StorageFragmentPurpose};
pub use self::transaction::{TransactionFragment, TransactionFragmentKind};

/// One row of a trace section.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fragment {
    Stack(StackFragment),
    Context(ContextFragment),
    Account(AccountFragment),
    Storage(StorageFragment),
    Imc(ImcFragment),
    Scenario(ScenarioFragment),
    Transaction(TransactionFragment),
}

impl Fragment {
    /// Name of the perspective flag raised on the fragment's row.
    pub const fn perspective(&self) -> &'static str {
        match self {
            Self::Stack(_) => "PEEK_AT_STACK",
            Self::Context(_) => "PEEK_AT_CONTEXT",
            Self::Account(_) => "PEEK_AT_ACCOUNT",
            Self::Storage(_) => "PEEK_AT_STORAGE",
            Self::Imc(_) => "PEEK_AT_MISCELLANEOUS",
            Self::Scenario(_) => "PEEK_AT_SCENARIO",
            Self::Transaction(_) => "PEEK_AT_TRANSACTION",
        }
    }

    pub const PERSPECTIVES: &'static [&'static str] = &[
        "PEEK_AT_STACK",
        "PEEK_AT_CONTEXT",
        "PEEK_AT_ACCOUNT",
        "PEEK_AT_STORAGE",
        "PEEK_AT_MISCELLANEOUS",
        "PEEK_AT_SCENARIO",
        "PEEK_AT_TRANSACTION",
    ];

    pub fn is_stack(&self) -> bool {
        matches!(self, Self::Stack(_))
    }

    pub fn as_stack(&self) -> Option<&StackFragment> {
        match self {
            Self::Stack(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_stack_mut(&mut self) -> Option<&mut StackFragment> {
        match self {
            Self::Stack(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_account(&self) -> Option<&AccountFragment> {
        match self {
            Self::Account(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_account_mut(&mut self) -> Option<&mut AccountFragment> {
        match self {
            Self::Account(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_storage(&self) -> Option<&StorageFragment> {
        match self {
            Self::Storage(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_imc(&self) -> Option<&ImcFragment> {
        match self {
            Self::Imc(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_scenario_mut(&mut self) -> Option<&mut ScenarioFragment> {
        match self {
            Self::Scenario(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_scenario(&self) -> Option<&ScenarioFragment> {
        match self {
            Self::Scenario(f) => Some(f),
            _ => None,
        }
    }
}

macro_rules! impl_from_fragment {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for Fragment {
                fn from(fragment: $ty) -> Self {
                    Self::$variant(fragment)
                }
            }
        )*
    };
}

impl_from_fragment!(
    Stack(StackFragment),
    Context(ContextFragment),
    Account(AccountFragment),
    Storage(StorageFragment),
    Imc(ImcFragment),
    Scenario(ScenarioFragment),
    Transaction(TransactionFragment),
);

/// Whether an account or storage fragment is the first or the final one
/// of its key within the transaction, the block and the conflation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct OccurrenceFlags {
    pub first_in_txn: bool,
    pub first_in_blk: bool,
    pub first_in_cnf: bool,
    pub final_in_txn: bool,
    pub final_in_blk: bool,
    pub final_in_cnf: bool,
}

impl OccurrenceFlags {
    pub fn values(&self) -> [U256; 6] {
        [
            self.first_in_txn,
            self.first_in_blk,
            self.first_in_cnf,
            self.final_in_txn,
            self.final_in_blk,
            self.final_in_cnf,
        ]
        .map(|flag| U256::from(flag as u8))
    }
}
