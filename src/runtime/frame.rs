use std::{iter, sync::Arc};

use crate::{
    descriptor::FieldType,
    runtime::{Exception, Method, Slot, Value, VmResult, object::split_wide},
};

/// Bookkeeping words at the start of every frame: the saved pc and the
/// caller link.
pub const FRAME_HEADER_SLOTS: usize = 2;

const PC: usize = 0;
/// Caller's frame index plus one; `0` for the outermost frame.
const CALLER: usize = 1;

/// One activation record. Its slots live in the owning [`FrameStack`].
#[derive(Debug, Clone)]
pub struct Frame {
    method: Arc<Method>,
    base: usize,
    max_locals: usize,
    max_stack: usize,
    sp: usize,
}

impl Frame {
    pub fn method(&self) -> &Arc<Method> {
        &self.method
    }

    /// Total slots: header, locals and operand stack.
    pub fn size(&self) -> usize {
        FRAME_HEADER_SLOTS + self.max_locals + self.max_stack
    }

    /// Operands currently on the stack.
    pub fn stack_depth(&self) -> usize {
        self.sp
    }

    fn locals(&self) -> usize {
        self.base + FRAME_HEADER_SLOTS
    }

    fn operands(&self) -> usize {
        self.locals() + self.max_locals
    }
}

/// A thread's call stack: one fixed region, frames bump-allocated on top of
/// each other.
///
/// All local and operand accessors act on the top frame.
#[derive(Debug)]
pub struct FrameStack {
    slots: Box<[Slot]>,
    frames: Vec<Frame>,
}

impl FrameStack {
    pub fn new(capacity: usize) -> FrameStack {
        FrameStack {
            slots: vec![0; capacity].into_boxed_slice(),
            frames: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slots taken by live frames.
    pub fn used(&self) -> usize {
        self.frames.last().map_or(0, |top| top.base + top.size())
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn top(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// Places a frame for `method` directly above the current top.
    pub fn push(&mut self, method: Arc<Method>) -> VmResult<()> {
        let max_locals = method.max_locals();
        let max_stack = method.max_stack();
        let requested = FRAME_HEADER_SLOTS + max_locals + max_stack;
        let base = self.used();
        if base + requested > self.slots.len() {
            return Err(Exception::StackOverflow {
                requested,
                capacity: self.slots.len(),
            });
        }
        // slots are reused from popped frames
        self.slots[base..base + requested].fill(0);
        self.slots[base + CALLER] = self.frames.len() as Slot;
        self.frames.push(Frame {
            method,
            base,
            max_locals,
            max_stack,
            sp: 0,
        });
        Ok(())
    }

    /// Returns to the caller. Nothing is freed; the next push reuses the
    /// region.
    pub fn pop(&mut self) -> Option<Arc<Method>> {
        let frame = self.frames.pop()?;
        debug_assert_eq!(self.slots[frame.base + CALLER] as usize, self.frames.len());
        Some(frame.method)
    }

    /// Frames from the top down, each with its pc, following caller links.
    pub fn frames(&self) -> impl Iterator<Item = (&Frame, usize)> {
        let mut link = self.frames.len();
        iter::from_fn(move || {
            let frame = self.frames.get(link.checked_sub(1)?)?;
            link = self.slots[frame.base + CALLER] as usize;
            Some((frame, self.slots[frame.base + PC] as usize))
        })
    }

    pub fn depth(&self) -> usize {
        self.frames().count()
    }

    pub fn pc(&self) -> VmResult<usize> {
        let top = self.top_frame()?;
        Ok(self.slots[top.base + PC] as usize)
    }

    pub fn set_pc(&mut self, pc: usize) -> VmResult<()> {
        let base = self.top_frame()?.base;
        self.slots[base + PC] = pc as Slot;
        Ok(())
    }

    pub fn local(&self, index: usize) -> VmResult<Slot> {
        let at = self.local_index(index)?;
        Ok(self.slots[at])
    }

    pub fn set_local(&mut self, index: usize, value: Slot) -> VmResult<()> {
        let at = self.local_index(index)?;
        self.slots[at] = value;
        Ok(())
    }

    /// Reads a local of `field_type`; category-two values span `index` and
    /// `index + 1`.
    pub fn local_value(&self, index: usize, field_type: &FieldType) -> VmResult<Value> {
        let first = self.local(index)?;
        if field_type.is_category_two() {
            Value::from_slots(field_type, &[first, self.local(index + 1)?])
        } else {
            Value::from_slots(field_type, &[first])
        }
    }

    pub fn set_local_value(&mut self, index: usize, value: Value) -> VmResult<()> {
        match encode(value) {
            Encoded::Wide(bits) => {
                self.local_index(index + 1)?;
                let [high, low] = split_wide(bits);
                self.set_local(index, high)?;
                self.set_local(index + 1, low)
            }
            Encoded::Narrow(slot) => self.set_local(index, slot),
        }
    }

    pub fn push_operand(&mut self, value: Slot) -> VmResult<()> {
        let top = self.top_frame()?;
        if top.sp >= top.max_stack {
            return Err(Exception::Internal(format!(
                "operand stack overflow in {}",
                top.method
            )));
        }
        let at = top.operands() + top.sp;
        self.slots[at] = value;
        self.top_frame_mut()?.sp += 1;
        Ok(())
    }

    pub fn pop_operand(&mut self) -> VmResult<Slot> {
        let top = self.top_frame_mut()?;
        if top.sp == 0 {
            return Err(Exception::Internal(format!(
                "operand stack underflow in {}",
                top.method
            )));
        }
        top.sp -= 1;
        let at = top.operands() + top.sp;
        Ok(self.slots[at])
    }

    pub fn push_value(&mut self, value: Value) -> VmResult<()> {
        match encode(value) {
            Encoded::Wide(bits) => {
                let [high, low] = split_wide(bits);
                self.push_operand(high)?;
                self.push_operand(low)
            }
            Encoded::Narrow(slot) => self.push_operand(slot),
        }
    }

    pub fn pop_value(&mut self, field_type: &FieldType) -> VmResult<Value> {
        if field_type.is_category_two() {
            let low = self.pop_operand()?;
            let high = self.pop_operand()?;
            Value::from_slots(field_type, &[high, low])
        } else {
            Value::from_slots(field_type, &[self.pop_operand()?])
        }
    }

    fn top_frame(&self) -> VmResult<&Frame> {
        self.frames
            .last()
            .ok_or_else(|| Exception::Internal("no frame on the stack".to_string()))
    }

    fn top_frame_mut(&mut self) -> VmResult<&mut Frame> {
        self.frames
            .last_mut()
            .ok_or_else(|| Exception::Internal("no frame on the stack".to_string()))
    }

    fn local_index(&self, index: usize) -> VmResult<usize> {
        let top = self.top_frame()?;
        if index >= top.max_locals {
            return Err(Exception::Internal(format!(
                "local {index} out of range in {} (max_locals {})",
                top.method, top.max_locals
            )));
        }
        Ok(top.locals() + index)
    }
}

enum Encoded {
    Narrow(Slot),
    Wide(u64),
}

fn encode(value: Value) -> Encoded {
    match value {
        Value::Int(v) => Encoded::Narrow(v as Slot),
        Value::Float(v) => Encoded::Narrow(v.to_bits()),
        Value::Reference(v) => Encoded::Narrow(v),
        Value::Long(v) => Encoded::Wide(v as u64),
        Value::Double(v) => Encoded::Wide(v.to_bits()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        class::builder::ClassBuilder,
        runtime::{BootstrapClassLoader, ClassLoader, MemorySource},
    };

    fn methods() -> (Arc<Method>, Arc<Method>) {
        let source = MemorySource::with_minimal_runtime();
        source.insert(
            "pkg/Calc",
            ClassBuilder::new("pkg/Calc")
                // 3 locals, 4 operands
                .method(0x0009, "add", "(JI)J", 4, 3, &[0x1e, 0x1c, 0x85, 0x61, 0xad])
                .method(0x0009, "nop", "()V", 0, 0, &[0xb1])
                .build(),
        );
        let loader = BootstrapClassLoader::new(vec![Box::new(source)]);
        let class = loader.load_class("pkg/Calc").unwrap();
        (
            class.get_declared_method("add", "(JI)J").unwrap(),
            class.get_declared_method("nop", "()V").unwrap(),
        )
    }

    #[test]
    fn test_push_pop_reuses_region() {
        let (add, nop) = methods();
        let mut stack = FrameStack::new(64);
        stack.push(Arc::clone(&add)).unwrap();
        assert_eq!(stack.used(), FRAME_HEADER_SLOTS + 3 + 4);
        stack.push(Arc::clone(&nop)).unwrap();
        assert_eq!(stack.used(), 2 * FRAME_HEADER_SLOTS + 7);
        assert_eq!(stack.depth(), 2);

        assert!(Arc::ptr_eq(&stack.pop().unwrap(), &nop));
        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.used(), FRAME_HEADER_SLOTS + 7);
        stack.pop();
        assert!(stack.is_empty());
        assert_eq!(stack.depth(), 0);
        assert!(stack.pop().is_none());
    }

    #[test]
    fn test_stack_overflow() {
        let (add, _) = methods();
        let size = FRAME_HEADER_SLOTS + 7;
        let mut stack = FrameStack::new(size * 2 + 1);
        stack.push(Arc::clone(&add)).unwrap();
        stack.push(Arc::clone(&add)).unwrap();
        let err = stack.push(Arc::clone(&add)).unwrap_err();
        assert!(matches!(
            err,
            Exception::StackOverflow { requested, capacity } if requested == size && capacity == size * 2 + 1
        ));
        assert_eq!(stack.depth(), 2);
    }

    #[test]
    fn test_locals_and_operands() {
        let (add, nop) = methods();
        let mut stack = FrameStack::new(64);
        stack.push(add).unwrap();
        stack.set_local_value(0, Value::Long(-3)).unwrap();
        stack.set_local_value(2, Value::Int(9)).unwrap();
        assert_eq!(stack.local(0).unwrap(), 0xffff_ffff);
        assert_eq!(stack.local_value(0, &FieldType::Long).unwrap(), Value::Long(-3));
        assert!(stack.set_local_value(2, Value::Long(1)).is_err());

        stack.push_value(Value::Double(1.5)).unwrap();
        stack.push_operand(7).unwrap();
        assert_eq!(stack.top().unwrap().stack_depth(), 3);
        assert_eq!(stack.pop_operand().unwrap(), 7);
        assert_eq!(stack.pop_value(&FieldType::Double).unwrap(), Value::Double(1.5));
        assert!(stack.pop_operand().is_err());

        stack.set_pc(4).unwrap();
        stack.push(nop).unwrap();
        assert_eq!(stack.pc().unwrap(), 0);
        let pcs: Vec<_> = stack.frames().map(|(_, pc)| pc).collect();
        assert_eq!(pcs, vec![0, 4]);
    }
}
