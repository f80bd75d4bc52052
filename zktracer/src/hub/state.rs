use serde::{Deserialize, Serialize};

use crate::error::{TracerError, TracerResult};
use crate::section::{SectionRef, TraceSection};

/// Where the hub stands in the processing of the current transaction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HubProcessingPhase {
    /// A transaction needing no EVM execution.
    #[default]
    TxSkip,
    /// Warming the access list.
    TxWarm,
    TxInit,
    TxExec,
    TxFinl,
}

/// Counters shared by every transaction of the conflation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Stamps {
    /// Incremented once per section.
    pub hub: u32,
    /// Incremented once per `LOG`.
    pub log: u32,
}

/// The sections of every transaction of the conflation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct State {
    pub phase: HubProcessingPhase,
    pub stamps: Stamps,
    traces: Vec<Vec<TraceSection>>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter_transaction(&mut self) {
        self.traces.push(Vec::new());
    }

    /// Forgets the sections of the most recent transaction.
    pub fn pop_transaction(&mut self) -> Option<Vec<TraceSection>> {
        self.traces.pop()
    }

    /// Increments the hub stamp and returns it.
    pub fn next_stamp(&mut self) -> u32 {
        self.stamps.hub += 1;
        self.stamps.hub
    }

    /// Reference the next pushed section will get.
    pub fn next_section_ref(&self) -> SectionRef {
        SectionRef {
            tx: self.traces.len() as u32,
            index: self.traces.last().map_or(0, Vec::len),
        }
    }

    pub fn push(&mut self, section: TraceSection) -> TracerResult<SectionRef> {
        let section_ref = self.next_section_ref();
        let Some(current) = self.traces.last_mut() else {
            return Err(TracerError::InvariantViolation(
                "section pushed outside of a transaction".into(),
            ));
        };
        current.push(section);
        Ok(section_ref)
    }

    pub fn section(&self, section: SectionRef) -> Option<&TraceSection> {
        (section.tx as usize)
            .checked_sub(1)
            .and_then(|tx| self.traces.get(tx))
            .and_then(|sections| sections.get(section.index))
    }

    pub fn section_mut(&mut self, section: SectionRef) -> Option<&mut TraceSection> {
        (section.tx as usize)
            .checked_sub(1)
            .and_then(|tx| self.traces.get_mut(tx))
            .and_then(|sections| sections.get_mut(section.index))
    }

    /// Sections of transaction `tx`, 1-based.
    pub fn transaction_sections(&self, tx: u32) -> &[TraceSection] {
        (tx as usize)
            .checked_sub(1)
            .and_then(|tx| self.traces.get(tx))
            .map_or(&[], Vec::as_slice)
    }

    /// Every section of the conflation, in order.
    pub fn sections(&self) -> impl Iterator<Item = &TraceSection> {
        self.traces.iter().flatten()
    }

    /// Rows of the hub trace.
    pub fn line_count(&self) -> usize {
        self.sections().map(TraceSection::line_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::{CommonValues, SectionKind};

    #[test]
    fn sections_are_addressed_per_transaction() -> TracerResult<()> {
        let mut state = State::new();
        assert!(state
            .push(TraceSection::new(SectionKind::TxSkip, CommonValues::default(), 4))
            .is_err());
        state.enter_transaction();
        let first = state.push(TraceSection::new(
            SectionKind::TxSkip,
            CommonValues::default(),
            4,
        ))?;
        state.enter_transaction();
        let second = state.push(TraceSection::new(
            SectionKind::StackOnly,
            CommonValues::default(),
            2,
        ))?;
        assert_eq!(first, SectionRef { tx: 1, index: 0 });
        assert_eq!(second, SectionRef { tx: 2, index: 0 });
        assert_eq!(state.section(second).map(|s| s.kind), Some(SectionKind::StackOnly));
        assert!(state.section(SectionRef { tx: 0, index: 0 }).is_none());
        state.pop_transaction();
        assert!(state.section(second).is_none());
        Ok(())
    }
}
