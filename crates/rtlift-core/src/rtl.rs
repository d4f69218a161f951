//! Register-transfer lists: the architecture-neutral form of lifted code.
//!
//! A rewriter turns each machine instruction into an [`RtlInstructionCluster`]
//! holding zero or more [`RtlStatement`]s. Statements are appended through an
//! [`RtlEmitter`] and never removed.

use crate::{Address, Condition, FlagGroupStorage, Identifier, RegisterStorage};
use std::fmt;

/// A constant value, or the sentinel for "unknown".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constant {
    /// No known value.
    Invalid,
    /// A value of `bits` width, stored zero-extended.
    Value { bits: u16, value: u128 },
}

impl Constant {
    /// Creates a constant, truncating `value` to `bits`.
    pub fn new(bits: u16, value: u128) -> Self {
        let value = if bits >= 128 {
            value
        } else {
            value & ((1u128 << bits) - 1)
        };
        Self::Value { bits, value }
    }

    /// Returns the zero constant of a width.
    pub fn zero(bits: u16) -> Self {
        Self::Value { bits, value: 0 }
    }

    /// Returns a one-bit truth value.
    pub fn bool(b: bool) -> Self {
        Self::Value {
            bits: 1,
            value: b as u128,
        }
    }

    /// Returns true unless this is the invalid sentinel.
    pub fn is_valid(&self) -> bool {
        !matches!(self, Self::Invalid)
    }

    /// Returns the width, if known.
    pub fn bits(&self) -> Option<u16> {
        match self {
            Self::Invalid => None,
            Self::Value { bits, .. } => Some(*bits),
        }
    }

    /// Returns the value if it is valid and fits in 64 bits.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Invalid => None,
            Self::Value { value, .. } => u64::try_from(*value).ok(),
        }
    }

    /// Adds a signed amount, wrapping at the constant's width.
    pub fn wrapping_add_signed(&self, delta: i64) -> Self {
        match *self {
            Self::Invalid => Self::Invalid,
            Self::Value { bits, value } => Self::new(bits, value.wrapping_add(delta as i128 as u128)),
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => f.write_str("<invalid>"),
            Self::Value { bits, value } if *value < 10 => write!(f, "{}<{}>", value, bits),
            Self::Value { bits, value } => write!(f, "0x{:X}<{}>", value, bits),
        }
    }
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
}

impl BinaryOperator {
    fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::And => "&",
            Self::Or => "|",
            Self::Xor => "^",
        }
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOperator {
    Neg,
    Not,
}

/// An RTL expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Constant(Constant),
    Register(RegisterStorage),
    FlagGroup(FlagGroupStorage),
    Identifier(Identifier),
    Address(Address),
    /// Imported procedure, by name.
    External(String),
    Binary {
        op: BinaryOperator,
        left: Box<Expression>,
        right: Box<Expression>,
        bits: u16,
    },
    Unary {
        op: UnaryOperator,
        operand: Box<Expression>,
        bits: u16,
    },
    /// Memory access of `bits` width, optionally through a segment register.
    MemoryAccess {
        segment: Option<RegisterStorage>,
        address: Box<Expression>,
        bits: u16,
    },
    /// Condition code evaluated over a flag group.
    Test {
        condition: Condition,
        flags: FlagGroupStorage,
    },
    /// The condition codes produced by computing an expression.
    ConditionOf(Box<Expression>),
}

impl Expression {
    /// Creates a constant expression.
    pub fn constant(bits: u16, value: u128) -> Self {
        Self::Constant(Constant::new(bits, value))
    }

    /// Creates a binary expression.
    pub fn binary(op: BinaryOperator, left: Expression, right: Expression, bits: u16) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
            bits,
        }
    }

    /// Creates `left + right`, folding away a zero right operand.
    pub fn add(left: Expression, right: i64, bits: u16) -> Self {
        match right {
            0 => left,
            r if r < 0 => Self::binary(
                BinaryOperator::Sub,
                left,
                Self::constant(bits, r.unsigned_abs() as u128),
                bits,
            ),
            r => Self::binary(BinaryOperator::Add, left, Self::constant(bits, r as u128), bits),
        }
    }

    /// Creates a flat memory access.
    pub fn mem(address: Expression, bits: u16) -> Self {
        Self::MemoryAccess {
            segment: None,
            address: Box::new(address),
            bits,
        }
    }

    /// Creates a segmented memory access.
    pub fn seg_mem(segment: RegisterStorage, address: Expression, bits: u16) -> Self {
        Self::MemoryAccess {
            segment: Some(segment),
            address: Box::new(address),
            bits,
        }
    }

    /// Creates `cond(expr)`.
    pub fn cond(expr: Expression) -> Self {
        Self::ConditionOf(Box::new(expr))
    }

    /// Returns the width of the expression's value, if it has one.
    pub fn bits(&self) -> Option<u16> {
        match self {
            Self::Constant(c) => c.bits(),
            Self::Register(r) => Some(r.bit_size),
            Self::FlagGroup(_) | Self::Test { .. } => Some(1),
            Self::Identifier(id) => Some(id.bits),
            Self::Address(a) => Some(a.bitness().bits()),
            Self::External(_) | Self::ConditionOf(_) => None,
            Self::Binary { bits, .. } | Self::Unary { bits, .. } | Self::MemoryAccess { bits, .. } => {
                Some(*bits)
            }
        }
    }

    /// Returns true if this expression may be the target of an assignment.
    pub fn is_lvalue(&self) -> bool {
        matches!(
            self,
            Self::Register(_) | Self::FlagGroup(_) | Self::Identifier(_)
        )
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(c) => write!(f, "{}", c),
            Self::Register(r) => write!(f, "{}", r),
            Self::FlagGroup(g) => write!(f, "{}", g),
            Self::Identifier(id) => write!(f, "{}", id.name),
            Self::Address(a) => write!(f, "{}", a),
            Self::External(name) => f.write_str(name),
            Self::Binary {
                op, left, right, ..
            } => write!(f, "{} {} {}", left, op.symbol(), right),
            Self::Unary { op, operand, .. } => match op {
                UnaryOperator::Neg => write!(f, "-{}", operand),
                UnaryOperator::Not => write!(f, "~{}", operand),
            },
            Self::MemoryAccess {
                segment,
                address,
                bits,
            } => match segment {
                Some(seg) => write!(f, "Mem[{}:{}:word{}]", seg, address, bits),
                None => write!(f, "Mem[{}:word{}]", address, bits),
            },
            Self::Test { condition, flags } => {
                write!(f, "Test({},{})", condition.x86_suffix().to_uppercase(), flags)
            }
            Self::ConditionOf(e) => write!(f, "cond({})", e),
        }
    }
}

/// One register-transfer statement.
#[derive(Debug, Clone, PartialEq)]
pub enum RtlStatement {
    /// `dst = src` for a register, flag group or identifier.
    Assignment { dst: Expression, src: Expression },
    /// `Mem[..] = src`.
    Store { dst: Expression, src: Expression },
    /// Conditional transfer to a known address.
    Branch { condition: Expression, target: Address },
    /// Unconditional transfer.
    Goto { target: Expression },
    /// Procedure call; the callee returns to the next instruction.
    Call {
        target: Expression,
        return_address_size: u8,
    },
    /// Return, popping the return address and `extra_bytes` more.
    Return {
        return_address_size: u8,
        extra_bytes: u16,
    },
    Nop,
    /// Placeholder for an instruction that could not be lifted.
    Invalid,
}

impl fmt::Display for RtlStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Assignment { dst, src } | Self::Store { dst, src } => {
                write!(f, "{} = {}", dst, src)
            }
            Self::Branch { condition, target } => write!(f, "branch {} {}", condition, target),
            Self::Goto { target } => write!(f, "goto {}", target),
            Self::Call {
                target,
                return_address_size,
            } => write!(f, "call {} ({})", target, return_address_size),
            Self::Return {
                return_address_size,
                extra_bytes,
            } => write!(f, "return ({},{})", return_address_size, extra_bytes),
            Self::Nop => f.write_str("nop"),
            Self::Invalid => f.write_str("<invalid>"),
        }
    }
}

/// The RTL statements of one machine instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct RtlInstructionCluster {
    /// Address of the originating instruction.
    pub address: Address,
    /// Length of the originating instruction in bytes.
    pub length: usize,
    pub statements: Vec<RtlStatement>,
}

impl RtlInstructionCluster {
    pub fn new(address: Address, length: usize, statements: Vec<RtlStatement>) -> Self {
        Self {
            address,
            length,
            statements,
        }
    }

    /// Returns the address just past the originating instruction.
    pub fn end_address(&self) -> Address {
        self.address.wrapping_add(self.length as u64)
    }

    /// Returns true if the instruction could not be lifted.
    pub fn is_invalid(&self) -> bool {
        self.statements.iter().any(|s| matches!(s, RtlStatement::Invalid))
    }
}

impl fmt::Display for RtlInstructionCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}):", self.address, self.length)?;
        for stmt in &self.statements {
            write!(f, " {};", stmt)?;
        }
        Ok(())
    }
}

/// Append-only sink for RTL statements.
pub struct RtlEmitter<'a> {
    statements: &'a mut Vec<RtlStatement>,
}

impl<'a> RtlEmitter<'a> {
    pub fn new(statements: &'a mut Vec<RtlStatement>) -> Self {
        Self { statements }
    }

    /// Appends an arbitrary statement.
    pub fn emit(&mut self, stmt: RtlStatement) {
        self.statements.push(stmt);
    }

    /// Emits `dst = src`, or a store when `dst` is a memory access.
    pub fn assign(&mut self, dst: Expression, src: Expression) {
        if matches!(dst, Expression::MemoryAccess { .. }) {
            self.store(dst, src);
        } else {
            self.emit(RtlStatement::Assignment { dst, src });
        }
    }

    pub fn store(&mut self, dst: Expression, src: Expression) {
        self.emit(RtlStatement::Store { dst, src });
    }

    pub fn branch(&mut self, condition: Expression, target: Address) {
        self.emit(RtlStatement::Branch { condition, target });
    }

    pub fn goto(&mut self, target: Expression) {
        self.emit(RtlStatement::Goto { target });
    }

    pub fn call(&mut self, target: Expression, return_address_size: u8) {
        self.emit(RtlStatement::Call {
            target,
            return_address_size,
        });
    }

    pub fn ret(&mut self, return_address_size: u8, extra_bytes: u16) {
        self.emit(RtlStatement::Return {
            return_address_size,
            extra_bytes,
        });
    }

    pub fn nop(&mut self) {
        self.emit(RtlStatement::Nop);
    }

    pub fn invalid(&mut self) {
        self.emit(RtlStatement::Invalid);
    }

    /// Returns the number of statements emitted so far.
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FlagTable, RegisterClass};

    const EAX: RegisterStorage = RegisterStorage::new("eax", 0, RegisterClass::General, 32);
    const ESP: RegisterStorage = RegisterStorage::new("esp", 4, RegisterClass::StackPointer, 32);
    const EFLAGS: RegisterStorage = RegisterStorage::new("eflags", 40, RegisterClass::Flags, 32);

    #[test]
    fn test_constant_truncates() {
        assert_eq!(Constant::new(8, 0x1FF), Constant::Value { bits: 8, value: 0xFF });
        assert_eq!(Constant::zero(32).as_u64(), Some(0));
        assert_eq!(Constant::Invalid.as_u64(), None);
        assert_eq!(
            Constant::new(16, 0).wrapping_add_signed(-2),
            Constant::new(16, 0xFFFE)
        );
    }

    #[test]
    fn test_emitter_appends() {
        let mut stmts = Vec::new();
        let mut m = RtlEmitter::new(&mut stmts);
        m.assign(Expression::Register(EAX), Expression::Constant(Constant::zero(32)));
        m.assign(
            Expression::mem(Expression::Register(ESP), 32),
            Expression::Register(EAX),
        );
        assert_eq!(m.len(), 2);
        assert_eq!(stmts[0].to_string(), "eax = 0<32>");
        assert!(matches!(stmts[1], RtlStatement::Store { .. }));
        assert_eq!(stmts[1].to_string(), "Mem[esp:word32] = eax");
    }

    #[test]
    fn test_display_flags_and_branch() {
        let flags = FlagTable::new(EFLAGS, &[(0x01, 'S'), (0x02, 'C'), (0x04, 'Z'), (0x10, 'O')]);
        let sczo = flags.group_from_mask(0x17).unwrap();
        let z = flags.group_from_mask(0x04).unwrap();
        let stmt = RtlStatement::Assignment {
            dst: Expression::FlagGroup(sczo),
            src: Expression::cond(Expression::Register(EAX)),
        };
        assert_eq!(stmt.to_string(), "SCZO = cond(eax)");

        let branch = RtlStatement::Branch {
            condition: Expression::Test {
                condition: Condition::Equal,
                flags: z,
            },
            target: Address::ptr32(0x1010),
        };
        assert_eq!(branch.to_string(), "branch Test(E,Z) 00001010");
    }

    #[test]
    fn test_add_folds_zero() {
        let e = Expression::add(Expression::Register(ESP), 0, 32);
        assert_eq!(e, Expression::Register(ESP));
        let e = Expression::add(Expression::Register(ESP), -4, 32);
        assert_eq!(e.to_string(), "esp - 4<32>");
    }

    #[test]
    fn test_cluster_tiles() {
        let c = RtlInstructionCluster::new(Address::ptr32(0x100), 3, vec![RtlStatement::Nop]);
        assert_eq!(c.end_address(), Address::ptr32(0x103));
        assert!(!c.is_invalid());
    }
}
