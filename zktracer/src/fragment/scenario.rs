use ethereum_types::U256;

/// Outcome of a `CALL`-family opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallScenario {
    /// Not known until the callee returns.
    Undefined,
    Exception,
    AbortWillRevert,
    AbortWontRevert,
    /// Call to an account without code.
    EoaSuccessWillRevert,
    EoaSuccessWontRevert,
    /// Call to a precompile that ran out of gas or rejected its input.
    PrcFailureWillRevert,
    PrcFailureWontRevert,
    PrcSuccessWillRevert,
    PrcSuccessWontRevert,
    SmcFailureWillRevert,
    SmcFailureWontRevert,
    SmcSuccessWillRevert,
    SmcSuccessWontRevert,
}

/// Outcome of a `CREATE` or `CREATE2`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CreateScenario {
    Undefined,
    Exception,
    AbortWillRevert,
    AbortWontRevert,
    /// The target address already has a nonce or code.
    FailureConditionWillRevert,
    FailureConditionWontRevert,
    EmptyInitCodeWillRevert,
    EmptyInitCodeWontRevert,
    NonemptyInitCodeFailureWillRevert,
    NonemptyInitCodeFailureWontRevert,
    NonemptyInitCodeSuccessWillRevert,
    NonemptyInitCodeSuccessWontRevert,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReturnScenario {
    Exception,
    FromMessageCallWillTouchRam,
    FromMessageCallWontTouchRam,
    FromDeploymentEmptyCodeWillRevert,
    FromDeploymentEmptyCodeWontRevert,
    FromDeploymentNonemptyCodeWillRevert,
    FromDeploymentNonemptyCodeWontRevert,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SelfdestructScenario {
    Exception,
    WillRevert,
    /// The account was already marked for deletion in this transaction.
    WontRevertAlreadyMarked,
    WontRevertNotYetMarked,
}

/// The scenario row of a section whose shape depends on how it ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScenarioFragment {
    Call(CallScenario),
    Create(CreateScenario),
    Return(ReturnScenario),
    Selfdestruct(SelfdestructScenario),
}

impl ScenarioFragment {
    /// Replaces a "won't revert" scenario by its "will revert" counterpart
    /// once the context is known to revert.
    pub fn settle_revert(&mut self, reverts: bool) {
        use CallScenario as C;
        use CreateScenario as Cr;
        use ReturnScenario as R;
        use SelfdestructScenario as S;
        *self = match (*self, reverts) {
            (Self::Call(C::AbortWontRevert), true) => Self::Call(C::AbortWillRevert),
            (Self::Call(C::AbortWillRevert), false) => Self::Call(C::AbortWontRevert),
            (Self::Call(C::EoaSuccessWontRevert), true) => Self::Call(C::EoaSuccessWillRevert),
            (Self::Call(C::EoaSuccessWillRevert), false) => Self::Call(C::EoaSuccessWontRevert),
            (Self::Call(C::PrcFailureWontRevert), true) => Self::Call(C::PrcFailureWillRevert),
            (Self::Call(C::PrcFailureWillRevert), false) => Self::Call(C::PrcFailureWontRevert),
            (Self::Call(C::PrcSuccessWontRevert), true) => Self::Call(C::PrcSuccessWillRevert),
            (Self::Call(C::PrcSuccessWillRevert), false) => Self::Call(C::PrcSuccessWontRevert),
            (Self::Call(C::SmcFailureWontRevert), true) => Self::Call(C::SmcFailureWillRevert),
            (Self::Call(C::SmcFailureWillRevert), false) => Self::Call(C::SmcFailureWontRevert),
            (Self::Call(C::SmcSuccessWontRevert), true) => Self::Call(C::SmcSuccessWillRevert),
            (Self::Call(C::SmcSuccessWillRevert), false) => Self::Call(C::SmcSuccessWontRevert),
            (Self::Create(Cr::AbortWontRevert), true) => Self::Create(Cr::AbortWillRevert),
            (Self::Create(Cr::AbortWillRevert), false) => Self::Create(Cr::AbortWontRevert),
            (Self::Create(Cr::FailureConditionWontRevert), true) => {
                Self::Create(Cr::FailureConditionWillRevert)
            }
            (Self::Create(Cr::FailureConditionWillRevert), false) => {
                Self::Create(Cr::FailureConditionWontRevert)
            }
            (Self::Create(Cr::EmptyInitCodeWontRevert), true) => {
                Self::Create(Cr::EmptyInitCodeWillRevert)
            }
            (Self::Create(Cr::EmptyInitCodeWillRevert), false) => {
                Self::Create(Cr::EmptyInitCodeWontRevert)
            }
            (Self::Create(Cr::NonemptyInitCodeFailureWontRevert), true) => {
                Self::Create(Cr::NonemptyInitCodeFailureWillRevert)
            }
            (Self::Create(Cr::NonemptyInitCodeFailureWillRevert), false) => {
                Self::Create(Cr::NonemptyInitCodeFailureWontRevert)
            }
            (Self::Create(Cr::NonemptyInitCodeSuccessWontRevert), true) => {
                Self::Create(Cr::NonemptyInitCodeSuccessWillRevert)
            }
            (Self::Create(Cr::NonemptyInitCodeSuccessWillRevert), false) => {
                Self::Create(Cr::NonemptyInitCodeSuccessWontRevert)
            }
            (Self::Return(R::FromDeploymentEmptyCodeWontRevert), true) => {
                Self::Return(R::FromDeploymentEmptyCodeWillRevert)
            }
            (Self::Return(R::FromDeploymentEmptyCodeWillRevert), false) => {
                Self::Return(R::FromDeploymentEmptyCodeWontRevert)
            }
            (Self::Return(R::FromDeploymentNonemptyCodeWontRevert), true) => {
                Self::Return(R::FromDeploymentNonemptyCodeWillRevert)
            }
            (Self::Return(R::FromDeploymentNonemptyCodeWillRevert), false) => {
                Self::Return(R::FromDeploymentNonemptyCodeWontRevert)
            }
            (Self::Selfdestruct(S::WontRevertAlreadyMarked | S::WontRevertNotYetMarked), true) => {
                Self::Selfdestruct(S::WillRevert)
            }
            (scenario, _) => scenario,
        };
    }

    pub fn is_undefined(&self) -> bool {
        matches!(
            self,
            Self::Call(CallScenario::Undefined) | Self::Create(CreateScenario::Undefined)
        )
    }

    pub const COLUMNS: &'static [&'static str] = &["SCN_FAMILY", "SCN_SCENARIO"];

    pub fn values(&self) -> Vec<U256> {
        let (family, scenario) = match *self {
            Self::Call(s) => (1, s as u8),
            Self::Create(s) => (2, s as u8),
            Self::Return(s) => (3, s as u8),
            Self::Selfdestruct(s) => (4, s as u8),
        };
        vec![U256::from(family), U256::from(scenario)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settling_flips_revert_variants_only() {
        let mut scenario = ScenarioFragment::Call(CallScenario::SmcSuccessWontRevert);
        scenario.settle_revert(true);
        assert_eq!(
            scenario,
            ScenarioFragment::Call(CallScenario::SmcSuccessWillRevert)
        );
        scenario.settle_revert(false);
        assert_eq!(
            scenario,
            ScenarioFragment::Call(CallScenario::SmcSuccessWontRevert)
        );

        let mut precompile = ScenarioFragment::Call(CallScenario::PrcFailureWontRevert);
        precompile.settle_revert(true);
        assert_eq!(
            precompile,
            ScenarioFragment::Call(CallScenario::PrcFailureWillRevert)
        );

        let mut exception = ScenarioFragment::Return(ReturnScenario::Exception);
        exception.settle_revert(true);
        assert_eq!(exception, ScenarioFragment::Return(ReturnScenario::Exception));
    }
}
