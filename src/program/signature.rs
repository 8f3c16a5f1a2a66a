//! Kernel parameter lists as reported by a driver.

use crate::dispatch::ScalarType;
use std::fmt;

/// Address space qualifier of a kernel parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressSpace {
    Global,
    Constant,
    Local,
    Private,
}

/// What a kernel argument slot accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgKind {
    /// A `__global` or `__constant` pointer, bound to a buffer.
    Memory {
        address_space: AddressSpace,
        element: String,
    },
    /// A `__local` pointer, bound to a per-work-group allocation size.
    Local { element: String },
    /// A by-value scalar.
    Scalar(ScalarType),
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgKind::Memory {
                address_space: AddressSpace::Constant,
                element,
            } => write!(f, "__constant {element}*"),
            ArgKind::Memory { element, .. } => write!(f, "__global {element}*"),
            ArgKind::Local { element } => write!(f, "__local {element}*"),
            ArgKind::Scalar(ty) => write!(f, "{}", ty.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDecl {
    pub name: String,
    pub kind: ArgKind,
    pub is_const: bool,
}

/// Name and ordered parameters of one kernel entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSignature {
    pub name: String,
    pub params: Vec<ParamDecl>,
}

impl KernelSignature {
    pub fn arg_count(&self) -> usize {
        self.params.len()
    }
}

impl fmt::Display for KernelSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "__kernel void {}(", self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if p.is_const {
                f.write_str("const ")?;
            }
            write!(f, "{} {}", p.kind, p.name)?;
        }
        f.write_str(")")
    }
}
