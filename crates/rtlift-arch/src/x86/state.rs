//! x86 processor state.

use super::registers::FLAG_D;
use crate::{ArchitectureDescriptor, CallSite, ProcessorState, RegisterState};
use rtlift_core::{Address, Constant, FlagGroupStorage, FunctionSignature, RegisterStorage};
use std::sync::Arc;

/// Abstract state of an x86 processor.
///
/// Register storage is shared with [`RegisterState`]; the x86 specifics are
/// the procedure-entry assumptions.
#[derive(Debug, Clone)]
pub struct X86State {
    inner: RegisterState,
}

impl X86State {
    pub fn new(arch: Arc<ArchitectureDescriptor>) -> Self {
        Self {
            inner: RegisterState::new(arch),
        }
    }

    fn direction_flag(&self) -> Option<FlagGroupStorage> {
        self.inner.architecture().flags.group_from_mask(FLAG_D)
    }
}

impl ProcessorState for X86State {
    fn architecture(&self) -> &Arc<ArchitectureDescriptor> {
        self.inner.architecture()
    }

    fn clone_state(&self) -> Box<dyn ProcessorState> {
        Box::new(self.clone())
    }

    fn get_register(&self, reg: RegisterStorage) -> Constant {
        self.inner.get_register(reg)
    }

    fn set_register(&mut self, reg: RegisterStorage, value: Constant) {
        self.inner.set_register(reg, value)
    }

    fn get_flag_group(&self, grf: &FlagGroupStorage) -> Constant {
        self.inner.get_flag_group(grf)
    }

    fn set_flag_group(&mut self, grf: &FlagGroupStorage, value: Constant) {
        self.inner.set_flag_group(grf, value)
    }

    fn get_stack_value(&self, offset: i32) -> Constant {
        self.inner.get_stack_value(offset)
    }

    fn set_stack_value(&mut self, offset: i32, value: Constant) {
        self.inner.set_stack_value(offset, value)
    }

    fn instruction_pointer(&self) -> Option<Address> {
        self.inner.instruction_pointer()
    }

    fn set_instruction_pointer(&mut self, addr: Address) {
        self.inner.set_instruction_pointer(addr)
    }

    fn stack_depth(&self) -> i32 {
        self.inner.stack_depth()
    }

    fn adjust_stack_depth(&mut self, delta: i32) {
        self.inner.adjust_stack_depth(delta)
    }

    /// Compiled code may assume the direction flag is clear on entry.
    fn on_procedure_entered(&mut self) {
        if let Some(d) = self.direction_flag() {
            self.inner.set_flag_group(&d, Constant::bool(false));
        }
    }

    fn on_procedure_left(&mut self, signature: &FunctionSignature) {
        log::debug!(
            "left {} at depth {} (callee pops {})",
            signature.name,
            self.inner.stack_depth(),
            signature.stack_delta
        );
    }

    fn on_after_call(&mut self, site: &CallSite, signature: Option<&FunctionSignature>) {
        if let Some(sig) = signature {
            crate::CallEffects::apply_after_call(sig, self, site);
        }
        // Calls preserve the direction flag.
        if let Some(d) = self.direction_flag() {
            self.inner.set_flag_group(&d, Constant::bool(false));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x86::{registers, ProcessorMode};

    #[test]
    fn test_entry_clears_direction_flag() {
        let arch = registers::descriptor(ProcessorMode::Protected32);
        let d = arch.flags.group_from_name("D").unwrap();
        let mut st = X86State::new(arch);
        assert_eq!(st.get_flag_group(&d), Constant::Invalid);
        st.on_procedure_entered();
        assert_eq!(st.get_flag_group(&d), Constant::bool(false));
    }

    #[test]
    fn test_after_call_keeps_direction_flag_clear() {
        let arch = registers::descriptor(ProcessorMode::Real16);
        let d = arch.flags.group_from_name("D").unwrap();
        let mut st = X86State::new(arch);
        st.set_flag_group(&d, Constant::bool(true));
        st.set_register(registers::AX, Constant::new(16, 9));
        let site = st.on_before_call(registers::SP, 2);
        let sig = FunctionSignature::new("f", 2).with_trashed([registers::AX]);
        st.on_after_call(&site, Some(&sig));
        assert_eq!(st.get_flag_group(&d), Constant::bool(false));
        assert_eq!(st.get_register(registers::AX), Constant::Invalid);
        assert_eq!(st.stack_depth(), 0);
    }
}
