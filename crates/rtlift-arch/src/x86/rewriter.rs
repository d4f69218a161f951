//! Lifting of decoded x86 instructions to RTL.
//!
//! Each instruction becomes one [`RtlInstructionCluster`]. Two idioms get
//! special treatment:
//!
//! - `xor r, r` and `pxor r, r` only zero `r`, so they lift to a single
//!   `r = 0<w>` with no flag updates. Any other form of either is
//!   reported as an unsupported instruction.
//! - `push r1` immediately followed by `pop r2` is a register copy. Both
//!   instructions lift to one cluster `r2 = r1` spanning their bytes,
//!   unless the host reports the `pop` as a jump target.
//!
//! The abstract state is updated after an instruction's RTL has been built,
//! so a failed instruction leaves the state as it was. The same holds for
//! the frame: registers and stack slots get identifiers only once their
//! instruction has lifted. Stack slots are named by their offset from the
//! stack pointer at procedure entry, whether addressed through `esp` or
//! through an `ebp` loaded by `mov ebp, esp`.

use super::registers::{self, FLAG_C, FLAG_O, FLAG_P, FLAG_S, FLAG_Z};
use super::{ProcessorMode, X86Architecture};
use crate::{DisassemblyStream, ProcessorArchitecture, ProcessorState, RewriteError, RewriterHost};
use rtlift_core::{
    Address, BinaryOperator, Condition, Constant, ControlFlow, Expression, FlagGroupStorage, Frame,
    FunctionSignature, MachineInstruction, MachineOperand, MemoryRef, Operation, RegisterClass,
    RegisterStorage, RtlEmitter, RtlInstructionCluster,
};
use std::iter::Peekable;

const SCZO: u32 = FLAG_S | FLAG_C | FLAG_Z | FLAG_O;
const SZO: u32 = FLAG_S | FLAG_Z | FLAG_O;

/// Flags a conditional jump tests.
fn condition_flags(condition: Condition) -> u32 {
    match condition {
        Condition::Equal | Condition::NotEqual => FLAG_Z,
        Condition::Below | Condition::AboveOrEqual => FLAG_C,
        Condition::BelowOrEqual | Condition::Above => FLAG_C | FLAG_Z,
        Condition::Less | Condition::GreaterOrEqual => FLAG_S | FLAG_O,
        Condition::LessOrEqual | Condition::Greater => SZO,
        Condition::Sign | Condition::NotSign => FLAG_S,
        Condition::Overflow | Condition::NotOverflow => FLAG_O,
        Condition::Parity | Condition::NotParity => FLAG_P,
    }
}

fn unsupported(instr: &MachineInstruction) -> RewriteError {
    RewriteError::UnsupportedInstruction {
        address: instr.address,
        length: instr.length,
        instruction: instr.to_string(),
    }
}

/// Applies `op` to two known values.
fn fold(op: BinaryOperator, a: Constant, b: Constant, bits: u16) -> Constant {
    match (a.as_u64(), b.as_u64()) {
        (Some(x), Some(y)) => {
            let v = match op {
                BinaryOperator::Add => x.wrapping_add(y),
                BinaryOperator::Sub => x.wrapping_sub(y),
                BinaryOperator::Mul => x.wrapping_mul(y),
                BinaryOperator::And => x & y,
                BinaryOperator::Or => x | y,
                BinaryOperator::Xor => x ^ y,
            };
            Constant::new(bits, v as u128)
        }
        _ => Constant::Invalid,
    }
}

/// Returns the register when both operands name the same one.
fn same_register(operands: &[MachineOperand]) -> Option<RegisterStorage> {
    match operands {
        [MachineOperand::Register(a), MachineOperand::Register(b)] if a == b => Some(*a),
        _ => None,
    }
}

/// Lazy rewriter over an x86 instruction stream.
pub struct X86Rewriter<'a> {
    arch: &'a X86Architecture,
    instrs: Peekable<DisassemblyStream<'a>>,
    state: &'a mut dyn ProcessorState,
    frame: &'a mut Frame,
    host: &'a dyn RewriterHost,
    /// Stack depth at which the frame pointer was loaded from the stack pointer.
    frame_pointer_depth: Option<i32>,
}

impl<'a> X86Rewriter<'a> {
    pub fn new(
        arch: &'a X86Architecture,
        instrs: DisassemblyStream<'a>,
        state: &'a mut dyn ProcessorState,
        frame: &'a mut Frame,
        host: &'a dyn RewriterHost,
    ) -> Self {
        Self {
            arch,
            instrs: instrs.peekable(),
            state,
            frame,
            host,
            frame_pointer_depth: None,
        }
    }

    fn mode(&self) -> ProcessorMode {
        self.arch.mode()
    }

    fn word_bits(&self) -> u16 {
        self.mode().default_bits()
    }

    fn return_address_size(&self) -> u8 {
        self.arch.descriptor().return_address_size
    }

    fn flag_group(&self, instr: &MachineInstruction, mask: u32) -> Result<FlagGroupStorage, RewriteError> {
        self.arch.flag_group_from_mask(mask).ok_or_else(|| unsupported(instr))
    }

    /// Builds the effective address of a memory operand, with its segment.
    fn memory(&self, m: &MemoryRef) -> Expression {
        let addr_bits = m
            .base
            .or(m.index)
            .map_or(self.word_bits(), |r| r.bit_size);

        let mut ea = m.base.map(Expression::Register);
        if let Some(index) = m.index {
            let scaled = if m.scale > 1 {
                Expression::binary(
                    BinaryOperator::Mul,
                    Expression::Register(index),
                    Expression::constant(addr_bits, m.scale as u128),
                    addr_bits,
                )
            } else {
                Expression::Register(index)
            };
            ea = Some(match ea {
                Some(base) => Expression::binary(BinaryOperator::Add, base, scaled, addr_bits),
                None => scaled,
            });
        }
        let ea = match ea {
            Some(e) => Expression::add(e, m.displacement, addr_bits),
            None => Expression::constant(addr_bits, m.displacement as u128),
        };

        match (m.segment, self.mode()) {
            (Some(seg), _) => Expression::seg_mem(seg, ea, m.bits),
            (None, ProcessorMode::Real16) => {
                let stack_based = m.base.is_some_and(|b| {
                    b.domain == registers::EBP.domain || b.domain == registers::ESP.domain
                });
                let seg = if stack_based { registers::SS } else { registers::DS };
                Expression::seg_mem(seg, ea, m.bits)
            }
            (None, ProcessorMode::Protected32) => Expression::mem(ea, m.bits),
        }
    }

    fn operand(&self, op: &MachineOperand) -> Expression {
        match op {
            MachineOperand::Register(r) => Expression::Register(*r),
            MachineOperand::Immediate(imm) => {
                Expression::Constant(Constant::new(imm.bits, imm.value as u128))
            }
            MachineOperand::Memory(m) => self.memory(m),
            MachineOperand::Address(a) => Expression::Address(*a),
        }
    }

    /// Returns what the abstract state knows about an operand's value.
    fn value_of(&self, op: &MachineOperand) -> Constant {
        match op {
            MachineOperand::Register(r) => self.state.get_register(*r),
            MachineOperand::Immediate(imm) => Constant::new(imm.bits, imm.value as u128),
            MachineOperand::Address(a) => Constant::new(a.bitness().bits(), a.to_linear() as u128),
            MachineOperand::Memory(_) => Constant::Invalid,
        }
    }

    fn operands<'i>(
        instr: &'i MachineInstruction,
    ) -> Result<(&'i MachineOperand, &'i MachineOperand), RewriteError> {
        match instr.operands.as_slice() {
            [dst, src] => Ok((dst, src)),
            _ => Err(unsupported(instr)),
        }
    }

    fn rewrite(&mut self, instr: &MachineInstruction, m: &mut RtlEmitter<'_>) -> Result<(), RewriteError> {
        match instr.operation {
            Operation::Nop => {
                m.nop();
                Ok(())
            }
            Operation::Move => self.rewrite_mov(instr, m),
            Operation::Add => self.rewrite_arithmetic(instr, m, BinaryOperator::Add),
            Operation::Sub => self.rewrite_arithmetic(instr, m, BinaryOperator::Sub),
            Operation::Compare => self.rewrite_compare(instr, m),
            Operation::And => self.rewrite_logical(instr, m, BinaryOperator::And),
            Operation::Or => self.rewrite_logical(instr, m, BinaryOperator::Or),
            Operation::Xor => self.rewrite_xor(instr, m),
            Operation::Push => self.rewrite_push(instr, m),
            Operation::Pop => self.rewrite_pop(instr, m),
            Operation::Call => self.rewrite_call(instr, m),
            Operation::Jump => self.rewrite_jump(instr, m),
            Operation::ConditionalJump => self.rewrite_jcc(instr, m),
            Operation::Return => self.rewrite_ret(instr, m),
            _ => Err(unsupported(instr)),
        }
    }

    fn rewrite_mov(&mut self, instr: &MachineInstruction, m: &mut RtlEmitter<'_>) -> Result<(), RewriteError> {
        let (dst, src) = Self::operands(instr)?;
        if dst.is_immediate() {
            return Err(unsupported(instr));
        }
        m.assign(self.operand(dst), self.operand(src));
        if let MachineOperand::Register(r) = dst {
            let value = self.value_of(src);
            self.state.set_register(*r, value);
        }
        Ok(())
    }

    fn rewrite_arithmetic(
        &mut self,
        instr: &MachineInstruction,
        m: &mut RtlEmitter<'_>,
        op: BinaryOperator,
    ) -> Result<(), RewriteError> {
        let (dst, src) = Self::operands(instr)?;
        let bits = dst.bits().ok_or_else(|| unsupported(instr))?;
        let sczo = self.flag_group(instr, SCZO)?;
        self.frame.ensure_flag_group(&sczo);

        let d = self.operand(dst);
        m.assign(d.clone(), Expression::binary(op, d.clone(), self.operand(src), bits));
        m.assign(Expression::FlagGroup(sczo.clone()), Expression::cond(d));

        if let MachineOperand::Register(r) = dst {
            let value = fold(op, self.state.get_register(*r), self.value_of(src), bits);
            self.state.set_register(*r, value);
            if r.domain == registers::ESP.domain {
                if let MachineOperand::Immediate(imm) = src {
                    let grown = match op {
                        BinaryOperator::Sub => imm.value,
                        _ => -imm.value,
                    };
                    self.state.adjust_stack_depth(grown as i32);
                }
            }
        }
        self.state.set_flag_group(&sczo, Constant::Invalid);
        Ok(())
    }

    fn rewrite_compare(&mut self, instr: &MachineInstruction, m: &mut RtlEmitter<'_>) -> Result<(), RewriteError> {
        let (dst, src) = Self::operands(instr)?;
        let bits = dst.bits().ok_or_else(|| unsupported(instr))?;
        let sczo = self.flag_group(instr, SCZO)?;
        self.frame.ensure_flag_group(&sczo);
        let diff = Expression::binary(BinaryOperator::Sub, self.operand(dst), self.operand(src), bits);
        m.assign(Expression::FlagGroup(sczo.clone()), Expression::cond(diff));
        self.state.set_flag_group(&sczo, Constant::Invalid);
        Ok(())
    }

    fn rewrite_logical(
        &mut self,
        instr: &MachineInstruction,
        m: &mut RtlEmitter<'_>,
        op: BinaryOperator,
    ) -> Result<(), RewriteError> {
        let (dst, src) = Self::operands(instr)?;
        let bits = dst.bits().ok_or_else(|| unsupported(instr))?;
        let szo = self.flag_group(instr, SZO)?;
        let c = self.flag_group(instr, FLAG_C)?;
        self.frame.ensure_flag_group(&szo);
        self.frame.ensure_flag_group(&c);

        let d = self.operand(dst);
        m.assign(d.clone(), Expression::binary(op, d.clone(), self.operand(src), bits));
        m.assign(Expression::FlagGroup(szo.clone()), Expression::cond(d));
        m.assign(Expression::FlagGroup(c.clone()), Expression::Constant(Constant::bool(false)));

        if let MachineOperand::Register(r) = dst {
            let value = fold(op, self.state.get_register(*r), self.value_of(src), bits);
            self.state.set_register(*r, value);
        }
        self.state.set_flag_group(&szo, Constant::Invalid);
        self.state.set_flag_group(&c, Constant::bool(false));
        Ok(())
    }

    /// Only the zeroing forms of `xor` and `pxor` are lifted.
    fn rewrite_xor(&mut self, instr: &MachineInstruction, m: &mut RtlEmitter<'_>) -> Result<(), RewriteError> {
        match same_register(&instr.operands) {
            Some(r) => self.zero_register(instr, m, r),
            None => Err(unsupported(instr)),
        }
    }

    fn zero_register(
        &mut self,
        instr: &MachineInstruction,
        m: &mut RtlEmitter<'_>,
        r: RegisterStorage,
    ) -> Result<(), RewriteError> {
        log::debug!("{}: {} zeroes {}", instr.address, instr.mnemonic, r);
        let zero = Constant::zero(r.bit_size);
        m.assign(Expression::Register(r), Expression::Constant(zero));
        self.state.set_register(r, zero);
        Ok(())
    }

    /// Emits `sp = sp +/- bytes` and tracks the register's value.
    fn move_stack_pointer(&mut self, m: &mut RtlEmitter<'_>, bytes: i64) {
        let sp = registers::stack_pointer(self.word_bits());
        m.assign(
            Expression::Register(sp),
            Expression::add(Expression::Register(sp), bytes, sp.bit_size),
        );
        let value = self.state.get_register(sp).wrapping_add_signed(bytes);
        self.state.set_register(sp, value);
    }

    /// Width of the stack slot a push or pop of `op` uses.
    fn slot_bits(&self, op: &MachineOperand) -> u16 {
        match op {
            // Segment registers occupy a full slot.
            MachineOperand::Register(r) if r.class == RegisterClass::Segment => self.word_bits(),
            _ => op.bits().unwrap_or(self.word_bits()),
        }
    }

    fn rewrite_push(&mut self, instr: &MachineInstruction, m: &mut RtlEmitter<'_>) -> Result<(), RewriteError> {
        let src = match instr.operands.as_slice() {
            [src] => src,
            _ => return Err(unsupported(instr)),
        };
        let bits = self.slot_bits(src);
        let size = (bits / 8) as i32;

        self.move_stack_pointer(m, -(size as i64));
        m.store(self.arch.create_stack_access(0, bits), self.operand(src));

        let value = self.value_of(src);
        self.state.adjust_stack_depth(size);
        let offset = self.state.stack_depth().wrapping_neg();
        self.state.set_stack_value(offset, value);
        self.frame.ensure_stack_local(offset, bits);
        Ok(())
    }

    fn rewrite_pop(&mut self, instr: &MachineInstruction, m: &mut RtlEmitter<'_>) -> Result<(), RewriteError> {
        let dst = match instr.operands.as_slice() {
            [dst] if !dst.is_immediate() => dst,
            _ => return Err(unsupported(instr)),
        };
        let bits = self.slot_bits(dst);
        let size = (bits / 8) as i32;

        m.assign(self.operand(dst), self.arch.create_stack_access(0, bits));
        self.move_stack_pointer(m, size as i64);

        let value = self.state.get_stack_value(self.state.stack_depth().wrapping_neg());
        if let MachineOperand::Register(r) = dst {
            self.state.set_register(*r, value);
        }
        self.state.adjust_stack_depth(-size);
        Ok(())
    }

    /// Resolves the address a direct or memory-indirect call goes through.
    fn call_slot(&self, op: &MachineOperand) -> Option<Address> {
        match op {
            MachineOperand::Address(a) => Some(*a),
            MachineOperand::Memory(mem)
                if mem.base.is_none() && mem.index.is_none() && self.mode() == ProcessorMode::Protected32 =>
            {
                Some(Address::ptr32(mem.displacement as u32))
            }
            _ => None,
        }
    }

    fn rewrite_call(&mut self, instr: &MachineInstruction, m: &mut RtlEmitter<'_>) -> Result<(), RewriteError> {
        let target = match instr.operands.as_slice() {
            [target] => target,
            _ => return Err(unsupported(instr)),
        };
        let ras = self.return_address_size();
        let slot = self.call_slot(target);
        let import = slot.and_then(|a| self.host.imported_procedure(a));

        let callee = match (&import, target) {
            (Some(name), _) => Expression::External(name.clone()),
            (None, MachineOperand::Address(a)) => Expression::Address(*a),
            (None, other) => self.operand(other),
        };

        let site = self.state.on_before_call(self.arch.stack_register(), ras);
        m.call(callee, ras);

        let signature = slot.and_then(|a| self.host.callee_signature(a)).or_else(|| {
            import
                .as_deref()
                .and_then(|name| FunctionSignature::from_stdcall_name(name, ras))
        });
        if signature.is_none() && slot.is_none() {
            self.host.warn(instr.address, "indirect call to unknown callee");
        }
        self.state.on_after_call(&site, signature.as_ref());
        Ok(())
    }

    fn rewrite_jump(&mut self, instr: &MachineInstruction, m: &mut RtlEmitter<'_>) -> Result<(), RewriteError> {
        match instr.operands.as_slice() {
            [target] => {
                m.goto(self.operand(target));
                Ok(())
            }
            _ => Err(unsupported(instr)),
        }
    }

    fn rewrite_jcc(&mut self, instr: &MachineInstruction, m: &mut RtlEmitter<'_>) -> Result<(), RewriteError> {
        let (condition, target) = match instr.control_flow {
            ControlFlow::ConditionalBranch { condition, target, .. } => (condition, target),
            _ => return Err(unsupported(instr)),
        };
        let flags = self.flag_group(instr, condition_flags(condition))?;
        self.frame.ensure_flag_group(&flags);
        m.branch(Expression::Test { condition, flags }, target);
        Ok(())
    }

    fn rewrite_ret(&mut self, instr: &MachineInstruction, m: &mut RtlEmitter<'_>) -> Result<(), RewriteError> {
        let extra = match instr.operands.as_slice() {
            [] => 0,
            [MachineOperand::Immediate(imm)] => imm.as_u64() as u16,
            _ => return Err(unsupported(instr)),
        };
        m.ret(self.return_address_size(), extra);
        Ok(())
    }

    /// Returns the offset of a stack slot relative to the stack pointer at
    /// procedure entry, if `m` addresses one.
    fn entry_offset(&self, m: &MemoryRef) -> Option<i32> {
        if m.index.is_some() {
            return None;
        }
        let base = m.base?;
        let depth = if base.domain == registers::ESP.domain {
            self.state.stack_depth()
        } else if base.domain == registers::EBP.domain {
            self.frame_pointer_depth?
        } else {
            return None;
        };
        i32::try_from(m.displacement).ok().map(|d| d.wrapping_sub(depth))
    }

    /// Stack slots an instruction addresses, evaluated before it executes.
    fn stack_slots(&self, instr: &MachineInstruction) -> Vec<(i32, u16)> {
        instr
            .operands
            .iter()
            .filter_map(|op| match op {
                MachineOperand::Memory(m) => self.entry_offset(m).map(|offset| (offset, m.bits)),
                _ => None,
            })
            .collect()
    }

    /// Allocates frame identifiers for the storage a lifted instruction touches.
    fn allocate_identifiers(&mut self, instr: &MachineInstruction, slots: &[(i32, u16)]) {
        for op in &instr.operands {
            if let MachineOperand::Register(r) = op {
                self.frame.ensure_register(*r);
            }
        }
        let ras = self.return_address_size() as i32;
        for &(offset, bits) in slots {
            if offset < 0 {
                self.frame.ensure_stack_local(offset, bits);
            } else if offset >= ras {
                self.frame.ensure_stack_argument(offset, bits);
            }
        }
    }

    /// Follows writes to the frame pointer. Only a copy of the stack
    /// pointer keeps it usable for addressing stack slots.
    fn track_frame_pointer(&mut self, dst: &MachineOperand, src: Option<&MachineOperand>) {
        let MachineOperand::Register(r) = dst else {
            return;
        };
        if r.domain != registers::EBP.domain {
            return;
        }
        self.frame_pointer_depth = match src {
            Some(MachineOperand::Register(s)) if s.domain == registers::ESP.domain => {
                Some(self.state.stack_depth())
            }
            _ => None,
        };
    }

    fn commit(&mut self, instr: &MachineInstruction, slots: &[(i32, u16)]) {
        self.allocate_identifiers(instr, slots);
        let writes_first = matches!(
            instr.operation,
            Operation::Move
                | Operation::Add
                | Operation::Sub
                | Operation::And
                | Operation::Or
                | Operation::Xor
                | Operation::Pop
        );
        if let (true, Some(dst)) = (writes_first, instr.operands.first()) {
            let src = match instr.operation {
                Operation::Move => instr.operands.get(1),
                _ => None,
            };
            self.track_frame_pointer(dst, src);
        }
    }

    /// Recognizes `push r1; pop r2` and consumes the `pop`.
    fn take_register_copy(&mut self, push: &MachineInstruction) -> Option<(MachineInstruction, RegisterStorage, RegisterStorage)> {
        let src = match (push.operation, push.operands.as_slice()) {
            (Operation::Push, [MachineOperand::Register(r)]) => *r,
            _ => return None,
        };
        let dst = match self.instrs.peek() {
            Some(Ok(next)) => match (next.operation, next.operands.as_slice()) {
                (Operation::Pop, [MachineOperand::Register(r)])
                    if r.bit_size == src.bit_size
                        && next.address == push.end_address()
                        && !self.host.is_jump_target(next.address) =>
                {
                    *r
                }
                _ => return None,
            },
            _ => return None,
        };
        let pop = self.instrs.next()?.ok()?;
        Some((pop, src, dst))
    }
}

impl<'a> Iterator for X86Rewriter<'a> {
    type Item = Result<RtlInstructionCluster, RewriteError>;

    fn next(&mut self) -> Option<Self::Item> {
        let instr = match self.instrs.next()? {
            Ok(instr) => instr,
            Err(e) => return Some(Err(e.into())),
        };
        self.state.set_instruction_pointer(instr.address);

        let mut statements = Vec::new();
        let mut m = RtlEmitter::new(&mut statements);

        if let Some((pop, src, dst)) = self.take_register_copy(&instr) {
            log::debug!("{}: push {}; pop {} is a copy", instr.address, src, dst);
            m.assign(Expression::Register(dst), Expression::Register(src));
            let value = self.state.get_register(src);
            self.state.set_register(dst, value);
            self.frame.ensure_register(src);
            self.frame.ensure_register(dst);
            let (dst_op, src_op) = (MachineOperand::Register(dst), MachineOperand::Register(src));
            self.track_frame_pointer(&dst_op, Some(&src_op));
            let length = instr.length + pop.length;
            return Some(Ok(RtlInstructionCluster::new(instr.address, length, statements)));
        }

        let slots = self.stack_slots(&instr);
        match self.rewrite(&instr, &mut m) {
            Ok(()) => {
                self.commit(&instr, &slots);
                Some(Ok(RtlInstructionCluster::new(instr.address, instr.length, statements)))
            }
            Err(e) => Some(Err(e)),
        }
    }
}
