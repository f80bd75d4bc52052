use ethereum_types::U256;

use crate::error::TracerResult;
use crate::host::HostFrame;
use crate::invariant;
use crate::opcode::{OpCodeData, StackPattern};

/// Outcome of the stack checks of an opcode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StackStatus {
    #[default]
    Normal,
    Underflow,
    Overflow,
}

/// One stack access of an opcode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct StackItem {
    pub height: usize,
    pub value: U256,
    /// `true` for reads and pops, `false` for pushes and writes.
    pub pop: bool,
    pub stamp: u32,
}

/// Up to four stack items, laid out on one stack row.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct StackLine {
    pub items: Vec<StackItem>,
    /// Index of a pushed item whose value is only known once the opcode
    /// executed.
    pub pending_result: Option<usize>,
}

impl StackLine {
    pub fn needs_result(&self) -> bool {
        self.pending_result.is_some()
    }

    /// Fills the pending result, if any.
    pub fn set_result(&mut self, value: U256) {
        if let Some(idx) = self.pending_result.take() {
            self.items[idx].value = value;
        }
    }
}

/// Stack bookkeeping of a single frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stack {
    height: usize,
    height_new: usize,
    status: StackStatus,
}

impl Stack {
    pub const fn height(&self) -> usize {
        self.height
    }

    pub const fn height_new(&self) -> usize {
        self.height_new
    }

    pub const fn status(&self) -> StackStatus {
        self.status
    }

    pub fn is_ok(&self) -> bool {
        self.status == StackStatus::Normal
    }

    /// Checks the stack requirements of the current opcode of `frame` and
    /// lays out its stack accesses.
    ///
    /// The tracked height must agree with the host's stack.
    pub fn process_instruction(
        &mut self,
        frame: &HostFrame,
        data: &OpCodeData,
        stack_limit: usize,
        stamp: u32,
    ) -> TracerResult<Vec<StackLine>> {
        invariant!(
            self.height == frame.stack_height(),
            "tracked stack height {} differs from host stack height {}",
            self.height,
            frame.stack_height()
        );

        let h = self.height;
        self.status = if h < data.delta {
            StackStatus::Underflow
        } else if h - data.delta + data.alpha > stack_limit {
            StackStatus::Overflow
        } else {
            StackStatus::Normal
        };
        self.height_new = if self.is_ok() {
            h - data.delta + data.alpha
        } else {
            h
        };

        let read = |i: usize, height: usize| StackItem {
            height,
            value: frame.stack_item(i),
            pop: true,
            stamp,
        };

        let mut pending = None;
        let items: Vec<StackItem> = match data.pattern {
            StackPattern::Plain => {
                let mut items: Vec<StackItem> = (0..data.delta)
                    .map(|i| read(i, h.saturating_sub(i)))
                    .collect();
                for j in 0..data.alpha {
                    pending = Some(items.len());
                    items.push(StackItem {
                        height: (h + 1 + j).saturating_sub(data.delta),
                        value: U256::zero(),
                        pop: false,
                        stamp,
                    });
                }
                items
            }
            StackPattern::Dup => {
                let n = data.delta;
                let source = read(n - 1, h.saturating_sub(n - 1));
                vec![
                    source,
                    StackItem {
                        height: h + 1,
                        pop: false,
                        ..source
                    },
                ]
            }
            StackPattern::Swap => {
                let n = data.delta - 1;
                let top = read(0, h);
                let other = read(n, h.saturating_sub(n));
                vec![
                    top,
                    other,
                    StackItem {
                        value: other.value,
                        pop: false,
                        ..top
                    },
                    StackItem {
                        value: top.value,
                        pop: false,
                        ..other
                    },
                ]
            }
        };

        let mut lines: Vec<StackLine> = items
            .chunks(4)
            .map(|chunk| StackLine {
                items: chunk.to_vec(),
                pending_result: None,
            })
            .collect();
        if lines.is_empty() {
            lines.push(StackLine::default());
        }
        if let Some(idx) = pending {
            // Results always sit in the last line.
            let last = lines.len() - 1;
            lines[last].pending_result = Some(idx - 4 * last);
        }
        Ok(lines)
    }

    /// Commits the height computed by the last call to
    /// [`Stack::process_instruction`].
    pub fn commit_height(&mut self) {
        self.height = self.height_new;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::OpCode;

    fn frame(stack: &[u64]) -> HostFrame {
        HostFrame {
            stack: stack.iter().map(|&v| U256::from(v)).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn add_lays_out_two_pops_and_a_pending_push() -> TracerResult<()> {
        let mut stack = Stack {
            height: 2,
            ..Default::default()
        };
        let lines =
            stack.process_instruction(&frame(&[5, 7]), &OpCode::Add.data(), 1024, 3)?;
        assert_eq!(lines.len(), 1);
        let items = &lines[0].items;
        assert_eq!(items[0].value, U256::from(7));
        assert_eq!(items[1].value, U256::from(5));
        assert!(!items[2].pop);
        assert_eq!(items[2].height, 1);
        assert_eq!(lines[0].pending_result, Some(2));
        assert_eq!(stack.height_new(), 1);
        Ok(())
    }

    #[test]
    fn underflow_keeps_the_height() -> TracerResult<()> {
        let mut stack = Stack {
            height: 1,
            ..Default::default()
        };
        stack.process_instruction(&frame(&[5]), &OpCode::Add.data(), 1024, 1)?;
        assert_eq!(stack.status(), StackStatus::Underflow);
        assert_eq!(stack.height_new(), 1);
        Ok(())
    }

    #[test]
    fn overflow_on_push_at_the_limit() -> TracerResult<()> {
        let mut stack = Stack {
            height: 2,
            ..Default::default()
        };
        stack.process_instruction(&frame(&[1, 2]), &OpCode::Push0.data(), 2, 1)?;
        assert_eq!(stack.status(), StackStatus::Overflow);
        Ok(())
    }

    #[test]
    fn swap_exchanges_values() -> TracerResult<()> {
        let mut stack = Stack {
            height: 3,
            ..Default::default()
        };
        let lines = stack.process_instruction(&frame(&[1, 2, 3]), &OpCode::Swap(2).data(), 1024, 1)?;
        let items = &lines[0].items;
        assert_eq!(items[2].value, U256::from(1));
        assert_eq!(items[2].height, 3);
        assert_eq!(items[3].value, U256::from(3));
        assert_eq!(items[3].height, 1);
        assert!(!lines[0].needs_result());
        Ok(())
    }

    #[test]
    fn call_results_land_on_the_second_line() -> TracerResult<()> {
        let mut stack = Stack {
            height: 7,
            ..Default::default()
        };
        let lines =
            stack.process_instruction(&frame(&[0; 7]), &OpCode::Call.data(), 1024, 1)?;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].pending_result, Some(3));
        Ok(())
    }

    #[test]
    fn mismatched_height_is_rejected() {
        let mut stack = Stack::default();
        assert!(stack
            .process_instruction(&frame(&[1]), &OpCode::Pop.data(), 1024, 1)
            .is_err());
    }
}
