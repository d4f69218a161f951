//! Procedure signatures supplied by type libraries or the host.

use crate::{RegisterStorage, Storage};
use std::fmt;

/// A formal parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub bits: u16,
    pub storage: Storage,
}

/// Calling-convention facts about a callee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSignature {
    pub name: String,
    /// Register receiving the return value, if any.
    pub return_value: Option<RegisterStorage>,
    pub parameters: Vec<Parameter>,
    /// Registers whose values the callee does not preserve.
    pub trashed: Vec<RegisterStorage>,
    /// Bytes removed from the stack by the callee, return address included.
    pub stack_delta: i32,
}

impl FunctionSignature {
    /// Creates a signature for a callee that only pops its return address.
    pub fn new(name: impl Into<String>, return_address_size: u8) -> Self {
        Self {
            name: name.into(),
            return_value: None,
            parameters: Vec::new(),
            trashed: Vec::new(),
            stack_delta: return_address_size as i32,
        }
    }

    /// Builds the signature implied by a decorated stdcall name such as
    /// `_foo@4`: the callee pops its arguments along with the return address.
    pub fn from_stdcall_name(decorated: &str, return_address_size: u8) -> Option<Self> {
        let (base, bytes) = decorated.rsplit_once('@')?;
        let arg_bytes: u32 = bytes.parse().ok()?;
        let name = base.strip_prefix('_').unwrap_or(base);
        if name.is_empty() {
            return None;
        }
        let mut sig = Self::new(name, return_address_size);
        sig.stack_delta = sig.stack_delta.checked_add(i32::try_from(arg_bytes).ok()?)?;
        Some(sig)
    }

    pub fn with_return_value(mut self, reg: RegisterStorage) -> Self {
        self.return_value = Some(reg);
        self
    }

    pub fn with_parameter(mut self, param: Parameter) -> Self {
        self.parameters.push(param);
        self
    }

    pub fn with_trashed(mut self, regs: impl IntoIterator<Item = RegisterStorage>) -> Self {
        self.trashed.extend(regs);
        self
    }

    pub fn with_stack_delta(mut self, stack_delta: i32) -> Self {
        self.stack_delta = stack_delta;
        self
    }

    /// Returns the bytes popped beyond the return address.
    pub fn extra_stack_bytes(&self, return_address_size: u8) -> i32 {
        self.stack_delta.wrapping_sub(return_address_size as i32)
    }
}

impl fmt::Display for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.return_value {
            Some(reg) => write!(f, "{} {}(", reg, self.name)?,
            None => write!(f, "void {}(", self.name)?,
        }
        for (i, p) in self.parameters.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p.name)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RegisterClass;

    const EAX: RegisterStorage = RegisterStorage::new("eax", 0, RegisterClass::General, 32);

    #[test]
    fn test_stdcall_name() {
        let sig = FunctionSignature::from_stdcall_name("_foo@4", 4).unwrap();
        assert_eq!(sig.name, "foo");
        assert_eq!(sig.stack_delta, 8);
        assert_eq!(sig.extra_stack_bytes(4), 4);
        assert!(FunctionSignature::from_stdcall_name("foo", 4).is_none());
        assert!(FunctionSignature::from_stdcall_name("_foo@x", 4).is_none());
        assert!(FunctionSignature::from_stdcall_name("_foo@-4", 4).is_none());
    }

    #[test]
    fn test_stdcall_name_with_oversized_argument_bytes() {
        assert!(FunctionSignature::from_stdcall_name("_f@2147483647", 4).is_none());
        assert!(FunctionSignature::from_stdcall_name("_f@4294967296", 4).is_none());
        let sig = FunctionSignature::from_stdcall_name("_f@2147483643", 4).unwrap();
        assert_eq!(sig.stack_delta, i32::MAX);
    }

    #[test]
    fn test_display() {
        let sig = FunctionSignature::new("GetTickCount", 4).with_return_value(EAX);
        assert_eq!(sig.to_string(), "eax GetTickCount()");
        let sig = FunctionSignature::new("f", 2).with_parameter(Parameter {
            name: "arg04".into(),
            bits: 16,
            storage: Storage::StackArgument { offset: 4 },
        });
        assert_eq!(sig.to_string(), "void f(arg04)");
    }
}
