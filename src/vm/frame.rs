//! Call frames: one activation record per method call.

use crate::core::lockup::ContractId;
use crate::vm::errors::ExecutionError;
use crate::vm::script::Method;
use crate::vm::value::Val;

/// Where a frame's return values go when it completes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnTo {
    /// Push onto the caller's operand segment.
    Parent,
    /// Deliver to the machine's entry-call output collector.
    Collector,
}

/// One activation record.
///
/// The frame does not own operand storage; it records `op_base`, the index
/// into the shared operand stack where its segment begins. Pops never cross
/// below `op_base` and a completed frame leaves the stack rewound to it.
#[derive(Debug)]
pub struct Frame {
    /// The executing method.
    pub method: Method,
    /// Next instruction to execute; always within `[0, instrs.len()]`.
    pub pc: usize,
    /// Local variable slots; the first `args_len` hold the call arguments.
    locals: Vec<Val>,
    /// Floor of this frame's operand segment.
    pub op_base: usize,
    /// Return continuation.
    pub returns: ReturnTo,
    /// Contract whose fields this frame reads and writes, if any.
    pub contract: Option<ContractId>,
    complete: bool,
}

impl Frame {
    /// Builds a frame for `method` with the popped call arguments.
    ///
    /// Arguments fill the first locals in declaration order; the remaining
    /// slots start as `Bool(false)` placeholders, which compiled code always
    /// stores before loading.
    pub fn new(
        method: Method,
        args: Vec<Val>,
        op_base: usize,
        returns: ReturnTo,
        contract: Option<ContractId>,
    ) -> Frame {
        debug_assert_eq!(args.len(), method.args_len as usize);
        let mut locals = args;
        locals.resize(method.locals_len as usize, Val::Bool(false));
        Frame {
            method,
            pc: 0,
            locals,
            op_base,
            returns,
            contract,
            complete: false,
        }
    }

    /// Reads local slot `index`.
    pub fn get_local(&self, index: u8) -> Result<Val, ExecutionError> {
        self.locals
            .get(index as usize)
            .cloned()
            .ok_or(ExecutionError::InvalidLocalIndex(index as u16))
    }

    /// Writes local slot `index`.
    pub fn set_local(&mut self, index: u8, value: Val) -> Result<(), ExecutionError> {
        match self.locals.get_mut(index as usize) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(ExecutionError::InvalidLocalIndex(index as u16)),
        }
    }

    /// Applies a relative jump to the already-advanced pc.
    ///
    /// A target equal to `instrs.len()` is legal and completes the frame on
    /// the next dispatch.
    pub fn jump(&mut self, offset: i8) -> Result<(), ExecutionError> {
        let len = self.method.instrs.len();
        let target = self.pc as i64 + offset as i64;
        if target < 0 || target > len as i64 {
            return Err(ExecutionError::InvalidPc { target, len });
        }
        self.pc = target as usize;
        Ok(())
    }

    /// True once the frame has returned or run past its last instruction.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Marks the frame complete.
    pub fn set_complete(&mut self) {
        self.complete = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::numeric::U256;
    use crate::vm::instr::Instr;

    fn method(args_len: u8, locals_len: u16, instrs: Vec<Instr>) -> Method {
        Method {
            is_public: true,
            is_payable: false,
            args_len,
            locals_len,
            returns_len: 0,
            instrs,
        }
    }

    #[test]
    fn args_fill_first_locals_rest_placeholder() {
        let frame = Frame::new(
            method(1, 3, vec![]),
            vec![Val::U256(U256::from(9u64))],
            0,
            ReturnTo::Collector,
            None,
        );
        assert_eq!(frame.get_local(0).unwrap(), Val::U256(U256::from(9u64)));
        assert_eq!(frame.get_local(1).unwrap(), Val::Bool(false));
        assert!(matches!(
            frame.get_local(3),
            Err(ExecutionError::InvalidLocalIndex(3))
        ));
    }

    #[test]
    fn set_local_bounds_checked() {
        let mut frame = Frame::new(method(0, 1, vec![]), vec![], 0, ReturnTo::Parent, None);
        frame.set_local(0, Val::Bool(true)).unwrap();
        assert_eq!(frame.get_local(0).unwrap(), Val::Bool(true));
        assert!(frame.set_local(1, Val::Bool(true)).is_err());
    }

    #[test]
    fn jump_stays_within_bounds() {
        let instrs = vec![Instr::ConstTrue, Instr::ConstFalse, Instr::Pop];
        let mut frame = Frame::new(method(0, 0, instrs), vec![], 0, ReturnTo::Parent, None);
        frame.pc = 1;
        frame.jump(2).unwrap(); // to len, legal
        assert_eq!(frame.pc, 3);

        frame.pc = 1;
        assert!(matches!(
            frame.jump(-2),
            Err(ExecutionError::InvalidPc { target: -1, .. })
        ));
        assert!(matches!(frame.jump(3), Err(ExecutionError::InvalidPc { .. })));
    }
}
