//! The arena of execution contexts of a conflation.

mod call_frame;
mod stack;

pub use call_frame::*;
pub use stack::*;

use crate::error::TracerResult;
use crate::{invariant, violation};

/// Every frame of the conflation, indexed by [`FrameId`].
///
/// Frames only refer to each other through ids. Frame
/// [`UNIVERSAL_PARENT`] is the parent of every root context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallStack {
    frames: Vec<CallFrame>,
    current: FrameId,
}

impl Default for CallStack {
    fn default() -> Self {
        Self::new()
    }
}

impl CallStack {
    pub fn new() -> Self {
        Self {
            frames: vec![CallFrame::default()],
            current: UNIVERSAL_PARENT,
        }
    }

    /// Number of frames ever created, universal parent included.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current == UNIVERSAL_PARENT
    }

    pub fn current_id(&self) -> FrameId {
        self.current
    }

    pub fn current(&self) -> &CallFrame {
        &self.frames[self.current]
    }

    pub fn current_mut(&mut self) -> &mut CallFrame {
        &mut self.frames[self.current]
    }

    /// The parent of the current frame. The universal parent is its own
    /// parent.
    pub fn parent(&self) -> &CallFrame {
        let parent = self.current().parent.unwrap_or(UNIVERSAL_PARENT);
        &self.frames[parent]
    }

    pub fn parent_mut(&mut self) -> &mut CallFrame {
        let parent = self.current().parent.unwrap_or(UNIVERSAL_PARENT);
        &mut self.frames[parent]
    }

    pub fn get(&self, id: FrameId) -> Option<&CallFrame> {
        self.frames.get(id)
    }

    pub fn get_mut(&mut self, id: FrameId) -> Option<&mut CallFrame> {
        self.frames.get_mut(id)
    }

    pub fn depth(&self) -> usize {
        self.current().depth
    }

    fn push(&mut self, parent: FrameId, depth: usize, entry: FrameEntry) -> FrameId {
        let id = self.frames.len();
        self.frames
            .push(CallFrame::from_entry(id, parent, depth, entry));
        self.frames[parent].children.push(id);
        id
    }

    /// Creates the pseudo-context holding the call data of a transaction.
    /// The cursor does not move.
    pub fn new_transaction_call_data_context(
        &mut self,
        context_number: u32,
        call_data: Vec<u8>,
    ) -> FrameId {
        let length = call_data.len() as u64;
        self.push(
            UNIVERSAL_PARENT,
            0,
            FrameEntry {
                frame_type: CallFrameType::TransactionCallData,
                context_number,
                call_data,
                call_data_span: MemorySpan::new(0, length),
                ..Default::default()
            },
        )
    }

    /// Creates the root context of a transaction and makes it current.
    pub fn new_root_context(&mut self, entry: FrameEntry) -> TracerResult<FrameId> {
        invariant!(
            self.is_empty(),
            "root context entered while frame {} is still current",
            self.current
        );
        invariant!(
            entry.frame_type == CallFrameType::Root,
            "root context created with frame type {:?}",
            entry.frame_type
        );
        self.current = self.push(UNIVERSAL_PARENT, 0, entry);
        Ok(self.current)
    }

    /// Enters a nested context at `host_depth` and makes it current.
    pub fn enter(&mut self, entry: FrameEntry, host_depth: usize) -> TracerResult<FrameId> {
        invariant!(
            !self.is_empty(),
            "nested context entered outside of a transaction"
        );
        let depth = self.current().depth + 1;
        invariant!(
            depth == host_depth,
            "entering depth {depth} while the host is at depth {host_depth}"
        );
        self.current = self.push(self.current, depth, entry);
        Ok(self.current)
    }

    /// Leaves the current nested context and returns to its parent.
    pub fn exit(&mut self) -> TracerResult<FrameId> {
        let frame = self.current();
        if frame.depth == 0 {
            violation!("cannot exit frame {} at depth 0", frame.id);
        }
        self.current = frame.parent.unwrap_or(UNIVERSAL_PARENT);
        Ok(self.current)
    }

    /// Moves the cursor back to the universal parent once a transaction has
    /// been fully processed.
    pub fn finish_transaction(&mut self) -> TracerResult<()> {
        invariant!(
            self.is_empty() || self.current().depth == 0,
            "transaction finished with frame {} at depth {}",
            self.current,
            self.current().depth
        );
        self.current = UNIVERSAL_PARENT;
        Ok(())
    }

    /// Whether `id` is `ancestor` or one of its descendants.
    pub fn is_descendant_or_self(&self, id: FrameId, ancestor: FrameId) -> bool {
        let mut cursor = Some(id);
        while let Some(frame) = cursor {
            if frame == ancestor {
                return true;
            }
            if frame == UNIVERSAL_PARENT {
                return false;
            }
            cursor = self.frames.get(frame).and_then(|f| f.parent);
        }
        false
    }

    /// Marks `id` and all its descendants as reverted at `stamp`, keeping
    /// earlier revert stamps.
    pub fn set_revert_stamps(&mut self, id: FrameId, stamp: u32) {
        let mut todo = vec![id];
        while let Some(frame_id) = todo.pop() {
            let Some(frame) = self.frames.get_mut(frame_id) else {
                continue;
            };
            frame.revert_stamp.get_or_insert(stamp);
            todo.extend(frame.children.iter().copied());
        }
    }

    /// Iterates over every frame, universal parent first.
    pub fn iter(&self) -> impl Iterator<Item = &CallFrame> {
        self.frames.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> FrameEntry {
        FrameEntry {
            frame_type: CallFrameType::Root,
            context_number: 2,
            ..Default::default()
        }
    }

    fn nested(context_number: u32) -> FrameEntry {
        FrameEntry {
            frame_type: CallFrameType::Standard,
            context_number,
            ..Default::default()
        }
    }

    #[test]
    fn universal_parent_is_frame_zero() {
        let stack = CallStack::new();
        let parent = stack.get(UNIVERSAL_PARENT).unwrap();
        assert_eq!(parent.frame_type, CallFrameType::Empty);
        assert!(stack.is_empty());
    }

    #[test]
    fn enter_and_exit_balance() -> TracerResult<()> {
        let mut stack = CallStack::new();
        let root = stack.new_root_context(root())?;
        let child = stack.enter(nested(5), 1)?;
        assert_eq!(stack.current().depth, 1);
        assert_eq!(stack.parent().id, root);
        assert_eq!(stack.get(root).unwrap().children, vec![child]);

        assert_eq!(stack.exit()?, root);
        assert_eq!(stack.current_id(), root);
        assert!(stack.exit().is_err());
        stack.finish_transaction()?;
        assert!(stack.is_empty());
        Ok(())
    }

    #[test]
    fn depth_must_match_the_host() -> TracerResult<()> {
        let mut stack = CallStack::new();
        stack.new_root_context(root())?;
        assert!(stack.enter(nested(3), 2).is_err());
        Ok(())
    }

    #[test]
    fn revert_stamps_reach_descendants_only() -> TracerResult<()> {
        let mut stack = CallStack::new();
        let root = stack.new_root_context(root())?;
        let a = stack.enter(nested(3), 1)?;
        let b = stack.enter(nested(4), 2)?;
        stack.exit()?;
        stack.exit()?;
        let c = stack.enter(nested(9), 1)?;

        stack.set_revert_stamps(b, 7);
        stack.set_revert_stamps(a, 8);
        assert_eq!(stack.get(a).unwrap().revert_stamp, Some(8));
        assert_eq!(stack.get(b).unwrap().revert_stamp, Some(7));
        assert_eq!(stack.get(c).unwrap().revert_stamp, None);
        assert_eq!(stack.get(root).unwrap().revert_stamp, None);

        assert!(stack.is_descendant_or_self(b, root));
        assert!(!stack.is_descendant_or_self(c, a));
        Ok(())
    }

    #[test]
    fn call_data_context_does_not_move_the_cursor() {
        let mut stack = CallStack::new();
        let id = stack.new_transaction_call_data_context(1, vec![1, 2, 3]);
        assert!(stack.is_empty());
        let frame = stack.get(id).unwrap();
        assert_eq!(frame.call_data_span, MemorySpan::new(0, 3));
        assert_eq!(frame.frame_type, CallFrameType::TransactionCallData);
    }
}
