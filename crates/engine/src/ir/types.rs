//! The types of values in the IR.

use std::fmt;

use serde::Serialize;

use crate::{constant::ADDRESS_WIDTH, syntax::ast::EnvVar};

/// A resolved Aurion type.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum Type {
    /// An unsigned integer of the given width in bits, between 8 and 128.
    Uint(u32),
    Bool,

    /// An address. Addresses are opaque identities and are represented as
    /// 128-bit values by the interpreter, while chains may declare them wider.
    Address,
    Map(Box<Type>, Box<Type>),
}

impl Type {
    /// The default type of an integer literal with no other type information.
    pub const DEFAULT_INTEGER: Type = Type::Uint(64);

    /// Checks if the type is an unsigned integer type.
    #[must_use]
    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Uint(_))
    }

    /// Checks if the type is a map type.
    #[must_use]
    pub fn is_map(&self) -> bool {
        matches!(self, Type::Map(..))
    }

    /// The width in bits that the type occupies on a chain.
    #[must_use]
    pub fn width(&self) -> u32 {
        match self {
            Type::Uint(width) => *width,
            Type::Bool => 1,
            Type::Address | Type::Map(..) => ADDRESS_WIDTH,
        }
    }

    /// The largest value representable at this type.
    #[must_use]
    pub fn max_value(&self) -> u128 {
        match self {
            Type::Uint(width) if *width < 128 => (1u128 << width) - 1,
            Type::Bool => 1,
            Type::Uint(_) | Type::Address | Type::Map(..) => u128::MAX,
        }
    }

    /// Truncates `value` to the width of this type.
    #[must_use]
    pub fn wrap(&self, value: u128) -> u128 {
        match self {
            Type::Bool => u128::from(value != 0),
            _ => value & self.max_value(),
        }
    }

    /// The type of the provided environment variable.
    #[must_use]
    pub fn of_env(var: EnvVar) -> Self {
        match var {
            EnvVar::Sender | EnvVar::Origin => Type::Address,
            EnvVar::Value | EnvVar::Timestamp | EnvVar::BlockNumber => Type::DEFAULT_INTEGER,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Uint(width) => write!(f, "u{width}"),
            Type::Bool => write!(f, "bool"),
            Type::Address => write!(f, "address"),
            Type::Map(key, value) => write!(f, "map<{key}, {value}>"),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::ir::types::Type;

    #[test]
    fn wraps_at_the_declared_width() {
        assert_eq!(Type::Uint(8).wrap(256), 0);
        assert_eq!(Type::Uint(8).wrap(0u128.wrapping_sub(1)), 255);
        assert_eq!(Type::Uint(128).max_value(), u128::MAX);
        assert_eq!(Type::Bool.wrap(7), 1);
    }

    #[test]
    fn displays_as_written() {
        let ty = Type::Map(Box::new(Type::Address), Box::new(Type::Uint(64)));
        assert_eq!(ty.to_string(), "map<address, u64>");
    }
}
