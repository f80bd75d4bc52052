use ethereum_types::U256;

use crate::module::imc::{ExpCall, MmuCall, MxpCall, OobCall, StpCall};
use crate::module::Modules;

/// A request from the hub to a sub-module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImcCall {
    Mxp(MxpCall),
    Oob(OobCall),
    Mmu(MmuCall),
    Stp(StpCall),
    Exp(ExpCall),
}

/// A row of inter-module calls.
///
/// Every call added to the fragment is also recorded in the sub-module it
/// targets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImcFragment {
    pub calls: Vec<ImcCall>,
}

impl ImcFragment {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn call_mxp(&mut self, modules: &mut Modules, call: MxpCall) -> &mut Self {
        modules.mxp.add(call.clone());
        self.calls.push(ImcCall::Mxp(call));
        self
    }

    pub fn call_oob(&mut self, modules: &mut Modules, call: OobCall) -> &mut Self {
        modules.oob.add(call.clone());
        self.calls.push(ImcCall::Oob(call));
        self
    }

    pub fn call_mmu(&mut self, modules: &mut Modules, call: MmuCall) -> &mut Self {
        modules.mmu.add(call.clone());
        self.calls.push(ImcCall::Mmu(call));
        self
    }

    pub fn call_stp(&mut self, modules: &mut Modules, call: StpCall) -> &mut Self {
        modules.stp.add(call.clone());
        self.calls.push(ImcCall::Stp(call));
        self
    }

    pub fn call_exp(&mut self, modules: &mut Modules, call: ExpCall) -> &mut Self {
        modules.exp.add(call.clone());
        self.calls.push(ImcCall::Exp(call));
        self
    }

    pub fn mxp(&self) -> Option<&MxpCall> {
        self.calls.iter().find_map(|c| match c {
            ImcCall::Mxp(call) => Some(call),
            _ => None,
        })
    }

    pub fn oob(&self) -> Option<&OobCall> {
        self.calls.iter().find_map(|c| match c {
            ImcCall::Oob(call) => Some(call),
            _ => None,
        })
    }

    pub fn mmu(&self) -> Option<&MmuCall> {
        self.calls.iter().find_map(|c| match c {
            ImcCall::Mmu(call) => Some(call),
            _ => None,
        })
    }

    pub fn stp(&self) -> Option<&StpCall> {
        self.calls.iter().find_map(|c| match c {
            ImcCall::Stp(call) => Some(call),
            _ => None,
        })
    }

    pub fn exp(&self) -> Option<&ExpCall> {
        self.calls.iter().find_map(|c| match c {
            ImcCall::Exp(call) => Some(call),
            _ => None,
        })
    }

    pub const COLUMNS: &'static [&'static str] = &[
        "MISC_MXP_FLAG",
        "MISC_MXP_WORDS_NEW",
        "MISC_MXP_GAS",
        "MISC_MXP_MXPX",
        "MISC_OOB_FLAG",
        "MISC_OOB_INST",
        "MISC_MMU_FLAG",
        "MISC_MMU_INST",
        "MISC_MMU_SIZE",
        "MISC_STP_FLAG",
        "MISC_STP_GAS_UPFRONT",
        "MISC_STP_GAS_PAID_OUT_OF_POCKET",
        "MISC_STP_GAS_STIPEND",
        "MISC_EXP_FLAG",
        "MISC_EXP_DYN_COST",
    ];

    pub fn values(&self) -> Vec<U256> {
        let bit = |b: bool| U256::from(b as u8);
        let mxp = self.mxp();
        let oob = self.oob();
        let mmu = self.mmu();
        let stp = self.stp();
        let exp = self.exp();
        vec![
            bit(mxp.is_some()),
            U256::from(mxp.map_or(0, |c| c.expansion.words_after)),
            U256::from(mxp.map_or(0, |c| c.expansion.cost)),
            bit(mxp.is_some_and(|c| c.expansion.mxpx)),
            bit(oob.is_some()),
            U256::from(oob.map_or(0, OobCall::id)),
            bit(mmu.is_some()),
            U256::from(mmu.map_or(0, |c| c.instruction.id())),
            U256::from(mmu.map_or(0, |c| c.size)),
            bit(stp.is_some()),
            U256::from(stp.map_or(0, |c| c.upfront_gas_cost)),
            U256::from(stp.map_or(0, |c| c.gas_paid_out_of_pocket)),
            U256::from(stp.map_or(0, |c| c.stipend)),
            bit(exp.is_some()),
            U256::from(exp.map_or(0, ExpCall::dynamic_cost)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::imc::MmuInstruction;
    use crate::module::Module;

    #[test]
    fn calls_reach_their_module() {
        let mut modules = Modules::default();
        let mut imc = ImcFragment::empty();
        imc.call_oob(&mut modules, OobCall::Sstore { gas: 5000 })
            .call_mmu(&mut modules, MmuCall::new(1, MmuInstruction::MStore, 32));
        assert_eq!(modules.oob.line_count(), 2);
        assert_eq!(modules.mmu.line_count(), 3);
        assert!(imc.mxp().is_none());
        assert_eq!(imc.mmu().map(|c| c.size), Some(32));
    }
}
