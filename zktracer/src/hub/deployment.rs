use ethereum_types::Address;
use hashbrown::HashMap;

use crate::callstack::CallFrame;
use crate::error::TracerResult;
use crate::invariant;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct DeploymentEntry {
    number: u32,
    under_deployment: bool,
}

/// Deployment number and status of every address touched in the conflation.
///
/// An address starts at deployment number 0, not under deployment. Every
/// deployment, and every self-destruct taking effect, moves it to a fresh
/// number.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeploymentInfo {
    entries: HashMap<Address, DeploymentEntry>,
}

impl DeploymentInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deployment_number(&self, address: &Address) -> u32 {
        self.entries.get(address).map_or(0, |e| e.number)
    }

    pub fn is_under_deployment(&self, address: &Address) -> bool {
        self.entries.get(address).is_some_and(|e| e.under_deployment)
    }

    /// Starts a new deployment at `address` and returns its number.
    pub fn new_deployment(&mut self, address: Address) -> u32 {
        let entry = self.entries.entry(address).or_default();
        entry.number += 1;
        entry.under_deployment = true;
        entry.number
    }

    /// Ends the deployment in progress at `address`.
    pub fn mark_deployed(&mut self, address: Address) -> TracerResult<()> {
        let entry = self.entries.entry(address).or_default();
        invariant!(
            entry.under_deployment,
            "{address:?} marked deployed while not under deployment"
        );
        entry.under_deployment = false;
        Ok(())
    }

    /// Moves a self-destructed account to a fresh deployment number.
    pub fn fresh_deployment_number(&mut self, address: Address) -> u32 {
        let entry = self.entries.entry(address).or_default();
        entry.number += 1;
        entry.under_deployment = false;
        entry.number
    }

    /// Updates the deployment status when `frame` exits.
    ///
    /// Message calls and creations hitting an address collision leave it
    /// untouched. An empty deployment was marked deployed when it started;
    /// any other deployment ends when its frame exits, whether it succeeded
    /// or not.
    pub fn exit_deployment_from_deployment_info_pov(
        &mut self,
        frame: &CallFrame,
        create_failure: bool,
    ) -> TracerResult<()> {
        if frame.is_message_call() || create_failure {
            return Ok(());
        }
        let address = frame.account_address;
        if frame.bytecode.is_empty() {
            invariant!(
                !self.is_under_deployment(&address),
                "empty deployment at {address:?} still under deployment on exit"
            );
            return Ok(());
        }
        invariant!(
            self.is_under_deployment(&address),
            "deployment at {address:?} exited while not under deployment"
        );
        self.mark_deployed(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment_frame(address: Address, bytecode: Vec<u8>) -> CallFrame {
        CallFrame {
            is_deployment: true,
            account_address: address,
            bytecode,
            ..Default::default()
        }
    }

    #[test]
    fn deployments_number_addresses() -> TracerResult<()> {
        let mut info = DeploymentInfo::new();
        let address = Address::repeat_byte(7);
        assert_eq!(info.deployment_number(&address), 0);
        assert_eq!(info.new_deployment(address), 1);
        assert!(info.is_under_deployment(&address));
        info.exit_deployment_from_deployment_info_pov(&deployment_frame(address, vec![0x00]), false)?;
        assert!(!info.is_under_deployment(&address));
        assert_eq!(info.fresh_deployment_number(address), 2);
        Ok(())
    }

    #[test]
    fn message_calls_and_collisions_are_ignored() -> TracerResult<()> {
        let mut info = DeploymentInfo::new();
        let address = Address::repeat_byte(7);
        let call = CallFrame {
            account_address: address,
            ..Default::default()
        };
        info.exit_deployment_from_deployment_info_pov(&call, false)?;
        info.exit_deployment_from_deployment_info_pov(&deployment_frame(address, vec![0x00]), true)?;
        assert_eq!(info.deployment_number(&address), 0);
        Ok(())
    }

    #[test]
    fn empty_deployments_must_already_be_deployed() {
        let mut info = DeploymentInfo::new();
        let address = Address::repeat_byte(7);
        info.new_deployment(address);
        assert!(info
            .exit_deployment_from_deployment_info_pov(&deployment_frame(address, vec![]), false)
            .is_err());
    }
}
