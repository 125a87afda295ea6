//! Heap locations addressed by loads and stores.
//!
//! A [`Slot`] names *where inside an object* an access lands, independent of
//! which object it lands in. Two accesses touch the same memory only when
//! both the slot and the host object match, which is what the forwarding
//! engine checks.
//!
//! Slots come in two families:
//!
//! - **Fields**: statically known offsets. Two field slots are the same
//!   location exactly when their [`FieldId`]s are equal, and disjoint
//!   otherwise.
//! - **Array elements**: dynamically indexed. Whether two element accesses
//!   hit the same location depends on the index *values*, which are only
//!   comparable when both accesses use the identical SSA definition as
//!   their index. Without that, element accesses must be assumed to
//!   overlap.

use std::fmt;

/// Opaque reference to a field definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub u32);

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "field#{}", self.0)
    }
}

/// The location family an access addresses within its host object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// A named field at a fixed offset.
    Field(FieldId),
    /// Some element of an array; the index is an SSA operand of the access.
    ArrayElement,
}

impl Slot {
    /// Returns `true` if an access to `self` may touch the same memory as
    /// an access to `other` within the *same* host object.
    ///
    /// Distinct fields never overlap. Array elements always may overlap at
    /// this level - index identity is the accessor's problem, not the
    /// slot's.
    #[must_use]
    pub fn may_overlap(&self, other: &Slot) -> bool {
        match (self, other) {
            (Slot::Field(a), Slot::Field(b)) => a == b,
            (Slot::ArrayElement, Slot::ArrayElement) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Field(id) => write!(f, "{id}"),
            Slot::ArrayElement => write!(f, "[*]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_overlap() {
        let a = Slot::Field(FieldId(0));
        let b = Slot::Field(FieldId(1));
        assert!(a.may_overlap(&a));
        assert!(!a.may_overlap(&b));
    }

    #[test]
    fn test_element_overlap() {
        let e = Slot::ArrayElement;
        let f = Slot::Field(FieldId(0));
        assert!(e.may_overlap(&e));
        assert!(!e.may_overlap(&f));
        assert!(!f.may_overlap(&e));
    }
}
