//! Abstract processor state threaded through lifting.
//!
//! The state maps registers, flag groups and stack slots to [`Constant`]s.
//! Anything never written reads as [`Constant::Invalid`]. Writes are strong
//! updates of exactly the storage named: writing `eax` does not change what
//! `ax` reads, and vice versa.

use crate::ArchitectureDescriptor;
use rtlift_core::{Address, Constant, FlagGroupStorage, FunctionSignature, RegisterStorage};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Snapshot taken just before a call and consumed just after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    /// Bytes pushed by the call instruction.
    pub return_address_size: u8,
    /// Stack depth at the call, before the return address is pushed.
    pub stack_depth: i32,
}

impl CallSite {
    pub fn new(return_address_size: u8, stack_depth: i32) -> Self {
        Self {
            return_address_size,
            stack_depth,
        }
    }
}

/// Mutable abstract machine state of one procedure lift.
pub trait ProcessorState: Send + fmt::Debug {
    /// Returns the tables of the architecture this state belongs to.
    fn architecture(&self) -> &Arc<ArchitectureDescriptor>;

    /// Returns an independent deep copy.
    fn clone_state(&self) -> Box<dyn ProcessorState>;

    /// Returns the value of `reg`, or `Invalid` if it was never set.
    fn get_register(&self, reg: RegisterStorage) -> Constant;

    /// Sets exactly `reg`.
    fn set_register(&mut self, reg: RegisterStorage, value: Constant);

    /// Returns the value of a flag group, or `Invalid` if it was never set.
    fn get_flag_group(&self, grf: &FlagGroupStorage) -> Constant;

    fn set_flag_group(&mut self, grf: &FlagGroupStorage, value: Constant);

    /// Returns the value stored at a frame offset.
    fn get_stack_value(&self, offset: i32) -> Constant;

    fn set_stack_value(&mut self, offset: i32, value: Constant);

    /// Returns the address of the instruction being lifted.
    fn instruction_pointer(&self) -> Option<Address>;

    fn set_instruction_pointer(&mut self, addr: Address);

    /// Returns the number of bytes pushed since procedure entry.
    fn stack_depth(&self) -> i32;

    /// Changes the stack depth; positive values grow the stack.
    fn adjust_stack_depth(&mut self, delta: i32);

    fn on_procedure_entered(&mut self) {}

    fn on_procedure_left(&mut self, _signature: &FunctionSignature) {}

    /// Records the call site. Registers are left untouched.
    fn on_before_call(&mut self, _stack_register: RegisterStorage, return_address_size: u8) -> CallSite {
        CallSite::new(return_address_size, self.stack_depth())
    }

    /// Applies the callee's effects; without a signature nothing is assumed.
    fn on_after_call(&mut self, site: &CallSite, signature: Option<&FunctionSignature>) {
        if let Some(sig) = signature {
            sig.apply_after_call(self, site);
        }
    }
}

impl Clone for Box<dyn ProcessorState> {
    fn clone(&self) -> Self {
        self.clone_state()
    }
}

/// Effect of a completed call on the caller's state.
pub trait CallEffects {
    fn apply_after_call<S: ProcessorState + ?Sized>(&self, state: &mut S, site: &CallSite);
}

impl CallEffects for FunctionSignature {
    fn apply_after_call<S: ProcessorState + ?Sized>(&self, state: &mut S, site: &CallSite) {
        for reg in self.trashed.iter().chain(self.return_value.iter()) {
            state.set_register(*reg, Constant::Invalid);
        }
        let popped = self.extra_stack_bytes(site.return_address_size);
        let depth = site.stack_depth.wrapping_sub(popped);
        state.adjust_stack_depth(depth.wrapping_sub(state.stack_depth()));
        log::trace!(
            "after call to {}: {} extra byte(s) popped, depth {}",
            self.name,
            popped,
            depth
        );
    }
}

/// Map-backed processor state usable by any architecture.
#[derive(Debug, Clone)]
pub struct RegisterState {
    arch: Arc<ArchitectureDescriptor>,
    registers: HashMap<RegisterStorage, Constant>,
    flags: HashMap<u32, Constant>,
    stack: BTreeMap<i32, Constant>,
    ip: Option<Address>,
    stack_depth: i32,
}

impl RegisterState {
    pub fn new(arch: Arc<ArchitectureDescriptor>) -> Self {
        Self {
            arch,
            registers: HashMap::new(),
            flags: HashMap::new(),
            stack: BTreeMap::new(),
            ip: None,
            stack_depth: 0,
        }
    }

    /// Iterates over registers holding a valid value.
    pub fn known_registers(&self) -> impl Iterator<Item = (&RegisterStorage, &Constant)> {
        self.registers.iter().filter(|(_, v)| v.is_valid())
    }
}

impl ProcessorState for RegisterState {
    fn architecture(&self) -> &Arc<ArchitectureDescriptor> {
        &self.arch
    }

    fn clone_state(&self) -> Box<dyn ProcessorState> {
        Box::new(self.clone())
    }

    fn get_register(&self, reg: RegisterStorage) -> Constant {
        self.registers.get(&reg).copied().unwrap_or(Constant::Invalid)
    }

    fn set_register(&mut self, reg: RegisterStorage, value: Constant) {
        self.registers.insert(reg, value);
    }

    fn get_flag_group(&self, grf: &FlagGroupStorage) -> Constant {
        self.flags.get(&grf.mask).copied().unwrap_or(Constant::Invalid)
    }

    fn set_flag_group(&mut self, grf: &FlagGroupStorage, value: Constant) {
        self.flags.insert(grf.mask, value);
    }

    fn get_stack_value(&self, offset: i32) -> Constant {
        self.stack.get(&offset).copied().unwrap_or(Constant::Invalid)
    }

    fn set_stack_value(&mut self, offset: i32, value: Constant) {
        self.stack.insert(offset, value);
    }

    fn instruction_pointer(&self) -> Option<Address> {
        self.ip
    }

    /// On segmented architectures the selector also seeds the code segment register.
    fn set_instruction_pointer(&mut self, addr: Address) {
        self.ip = Some(addr);
        if let (Some(cs), Some(selector)) = (self.arch.code_segment, addr.selector()) {
            self.registers
                .insert(cs, Constant::new(cs.bit_size, selector as u128));
        }
    }

    fn stack_depth(&self) -> i32 {
        self.stack_depth
    }

    fn adjust_stack_depth(&mut self, delta: i32) {
        self.stack_depth = self.stack_depth.wrapping_add(delta);
    }
}
