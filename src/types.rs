//! Type system (C7)
//!
//! `TypeDescriptor` pairs a `BaseType` with the extra information needed for
//! UDTs, classes, lists, and objects. The coercion lattice mirrors the
//! teacher's `Effect`/`StackType` module in spirit (a small closed algebra
//! with a `Display` impl matching the notation used in diagnostics) but is
//! nominal rather than row-polymorphic, since BASIC variables have a fixed
//! declared type rather than an inferred stack shape.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseType {
    Unknown,
    Void,
    Byte,
    Short,
    Integer,
    Long,
    UByte,
    UShort,
    UInteger,
    ULong,
    Single,
    Double,
    String,
    Unicode,
    UserDefined,
    ClassInstance,
    Object,
}

impl BaseType {
    pub fn bit_width(self) -> u32 {
        match self {
            BaseType::Byte | BaseType::UByte => 8,
            BaseType::Short | BaseType::UShort => 16,
            BaseType::Integer | BaseType::UInteger | BaseType::Single => 32,
            BaseType::Long | BaseType::ULong | BaseType::Double => 64,
            BaseType::ClassInstance | BaseType::Object | BaseType::String | BaseType::Unicode => 64,
            BaseType::Void | BaseType::Unknown | BaseType::UserDefined => 0,
        }
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            BaseType::UByte | BaseType::UShort | BaseType::UInteger | BaseType::ULong
        )
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            BaseType::Byte
                | BaseType::Short
                | BaseType::Integer
                | BaseType::Long
                | BaseType::UByte
                | BaseType::UShort
                | BaseType::UInteger
                | BaseType::ULong
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, BaseType::Single | BaseType::Double)
    }

    pub fn is_string(self) -> bool {
        matches!(self, BaseType::String | BaseType::Unicode)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || self.is_float()
    }

    pub fn is_class_instance(self) -> bool {
        matches!(self, BaseType::ClassInstance)
    }
}

/// A homogeneous-lane UDT's classification for backend vectorization
/// (spec.md §3 invariant 4 / §4.3 pass 1 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimdInfo {
    V2D,
    V4S,
    V2S,
    V8H,
    V4H,
    V16B,
    V8B,
    /// Three 32-bit lanes plus one padding lane.
    V4SPad1,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDescriptor {
    pub base: BaseType,
    pub udt_name: Option<String>,
    pub udt_type_id: Option<u32>,
    pub class_name: Option<String>,
    /// Element type of a `LIST OF <T>`; `None` means `LIST OF ANY`.
    pub list_element: Option<Box<TypeDescriptor>>,
    pub object_type_name: Option<String>,
}

impl TypeDescriptor {
    pub fn simple(base: BaseType) -> Self {
        TypeDescriptor {
            base,
            udt_name: None,
            udt_type_id: None,
            class_name: None,
            list_element: None,
            object_type_name: None,
        }
    }

    pub fn udt(name: impl Into<String>) -> Self {
        TypeDescriptor {
            base: BaseType::UserDefined,
            udt_name: Some(name.into()),
            udt_type_id: None,
            class_name: None,
            list_element: None,
            object_type_name: None,
        }
    }

    pub fn class(name: impl Into<String>) -> Self {
        TypeDescriptor {
            base: BaseType::ClassInstance,
            udt_name: None,
            udt_type_id: None,
            class_name: Some(name.into()),
            list_element: None,
            object_type_name: None,
        }
    }

    pub fn list_of(element: TypeDescriptor) -> Self {
        TypeDescriptor {
            base: BaseType::Object,
            udt_name: None,
            udt_type_id: None,
            class_name: None,
            list_element: Some(Box::new(element)),
            object_type_name: Some("LIST".to_string()),
        }
    }

    pub fn list_of_any() -> Self {
        TypeDescriptor {
            base: BaseType::Object,
            udt_name: None,
            udt_type_id: None,
            class_name: None,
            list_element: None,
            object_type_name: Some("LIST".to_string()),
        }
    }

    pub fn hashmap() -> Self {
        TypeDescriptor {
            base: BaseType::Object,
            udt_name: None,
            udt_type_id: None,
            class_name: None,
            list_element: None,
            object_type_name: Some("HASHMAP".to_string()),
        }
    }

    pub fn bit_width(&self) -> u32 {
        self.base.bit_width()
    }
    pub fn is_unsigned(&self) -> bool {
        self.base.is_unsigned()
    }
    pub fn is_integer(&self) -> bool {
        self.base.is_integer()
    }
    pub fn is_float(&self) -> bool {
        self.base.is_float()
    }
    pub fn is_string(&self) -> bool {
        self.base.is_string()
    }
    pub fn is_numeric(&self) -> bool {
        self.base.is_numeric()
    }
    pub fn is_class_instance(&self) -> bool {
        self.base.is_class_instance()
    }
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.base {
            BaseType::UserDefined => write!(f, "{}", self.udt_name.as_deref().unwrap_or("?")),
            BaseType::ClassInstance => write!(f, "{}", self.class_name.as_deref().unwrap_or("?")),
            BaseType::Object if self.object_type_name.as_deref() == Some("LIST") => {
                match &self.list_element {
                    Some(elem) => write!(f, "LIST OF {}", elem),
                    None => write!(f, "LIST OF ANY"),
                }
            }
            BaseType::Object if self.object_type_name.as_deref() == Some("HASHMAP") => {
                write!(f, "HASHMAP")
            }
            other => write!(f, "{:?}", other),
        }
    }
}

/// The result of `check_coercion(from, to)` (spec.md §4.3 / §8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coercion {
    Identical,
    ImplicitSafe,
    ImplicitLossy,
    ExplicitRequired,
    Incompatible,
}

/// Determine how a value of type `from` may be coerced to `to`.
///
/// Numeric widening is safe. Narrowing between integer widths, or
/// `DOUBLE -> SINGLE`, is lossy. Float<->integer or string<->number always
/// requires an explicit conversion function. `STRING<->UNICODE` is safe
/// because the runtime handles the representation change.
pub fn check_coercion(from: &TypeDescriptor, to: &TypeDescriptor) -> Coercion {
    if from == to {
        return Coercion::Identical;
    }

    if from.is_string() && to.is_string() {
        return Coercion::ImplicitSafe;
    }

    if from.is_numeric() && to.is_numeric() {
        if from.is_integer() && to.is_integer() {
            return if to.bit_width() >= from.bit_width() && from.is_unsigned() == to.is_unsigned()
            {
                Coercion::ImplicitSafe
            } else {
                Coercion::ImplicitLossy
            };
        }
        if from.is_float() && to.is_float() {
            return if to.bit_width() >= from.bit_width() {
                Coercion::ImplicitSafe
            } else {
                Coercion::ImplicitLossy
            };
        }
        if from.is_integer() && to.is_float() {
            // SINGLE cannot exactly represent all LONG values, so widening
            // an integer into a narrower float mantissa is lossy; otherwise
            // safe widening.
            return if to.bit_width() >= from.bit_width() {
                Coercion::ImplicitSafe
            } else {
                Coercion::ImplicitLossy
            };
        }
        // float -> integer always needs an explicit CINT/CLNG/... call.
        return Coercion::ExplicitRequired;
    }

    if from.is_string() != to.is_string() {
        return Coercion::ExplicitRequired;
    }

    if from.is_class_instance() && to.is_class_instance() {
        // Handled structurally by the caller (inheritance-aware); the bare
        // type system only knows identity here.
        return Coercion::Incompatible;
    }

    Coercion::Incompatible
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_types_coerce_identically() {
        for base in [
            BaseType::Byte,
            BaseType::Integer,
            BaseType::Long,
            BaseType::Double,
            BaseType::String,
        ] {
            let t = TypeDescriptor::simple(base);
            assert_eq!(check_coercion(&t, &t), Coercion::Identical);
        }
    }

    #[test]
    fn integer_widening_is_safe() {
        let int_t = TypeDescriptor::simple(BaseType::Integer);
        let long_t = TypeDescriptor::simple(BaseType::Long);
        assert_eq!(check_coercion(&int_t, &long_t), Coercion::ImplicitSafe);
    }

    #[test]
    fn double_to_integer_requires_explicit_conversion() {
        let double_t = TypeDescriptor::simple(BaseType::Double);
        let int_t = TypeDescriptor::simple(BaseType::Integer);
        assert_eq!(
            check_coercion(&double_t, &int_t),
            Coercion::ExplicitRequired
        );
    }

    #[test]
    fn string_to_integer_requires_explicit_conversion() {
        let string_t = TypeDescriptor::simple(BaseType::String);
        let int_t = TypeDescriptor::simple(BaseType::Integer);
        assert_eq!(
            check_coercion(&string_t, &int_t),
            Coercion::ExplicitRequired
        );
    }

    #[test]
    fn narrowing_integer_is_lossy() {
        let long_t = TypeDescriptor::simple(BaseType::Long);
        let int_t = TypeDescriptor::simple(BaseType::Integer);
        assert_eq!(check_coercion(&long_t, &int_t), Coercion::ImplicitLossy);
    }

    #[test]
    fn double_to_single_is_lossy() {
        let double_t = TypeDescriptor::simple(BaseType::Double);
        let single_t = TypeDescriptor::simple(BaseType::Single);
        assert_eq!(check_coercion(&double_t, &single_t), Coercion::ImplicitLossy);
    }

    #[test]
    fn string_to_unicode_is_safe() {
        let s = TypeDescriptor::simple(BaseType::String);
        let u = TypeDescriptor::simple(BaseType::Unicode);
        assert_eq!(check_coercion(&s, &u), Coercion::ImplicitSafe);
    }
}
