use std::fmt;

use quill_ast::Type;

use crate::term::Term;

/// Logical sort of a solver-level value or relation argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Sort {
    Bool,
    Int,
}

impl Sort {
    /// The default value of a freshly deployed storage slot of this sort.
    pub fn zero(self) -> Term {
        match self {
            Sort::Bool => Term::Bool(false),
            Sort::Int => Term::Int(0),
        }
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sort::Bool => write!(f, "Bool"),
            Sort::Int => write!(f, "Int"),
        }
    }
}

/// Maps a program type to the sort the solver reasons about.
pub trait SortMapper {
    fn sort_of(&self, ty: &Type) -> Sort;
}

/// Booleans become `Bool`; every other type is a flat integer slot.
///
/// Mappings, strings and tuples are not modelled structurally: a state
/// variable of such a type still occupies one `Int` argument so relation
/// signatures keep one position per slot.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultSortMapper;

impl SortMapper for DefaultSortMapper {
    fn sort_of(&self, ty: &Type) -> Sort {
        match ty {
            Type::Bool => Sort::Bool,
            Type::Uint(_)
            | Type::Int(_)
            | Type::Address
            | Type::FixedBytes(_)
            | Type::String
            | Type::Mapping(_, _)
            | Type::Tuple(_) => Sort::Int,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mapper_separates_bool_from_integer_slots() {
        let m = DefaultSortMapper;
        assert_eq!(m.sort_of(&Type::Bool), Sort::Bool);
        assert_eq!(m.sort_of(&Type::Uint(8)), Sort::Int);
        assert_eq!(m.sort_of(&Type::Address), Sort::Int);
        assert_eq!(
            m.sort_of(&Type::Mapping(Box::new(Type::Address), Box::new(Type::Bool))),
            Sort::Int
        );
    }

    #[test]
    fn zero_values_follow_the_sort() {
        assert_eq!(Sort::Bool.zero(), Term::Bool(false));
        assert_eq!(Sort::Int.zero(), Term::Int(0));
        assert_eq!(Sort::Int.to_string(), "Int");
    }
}
