//! Property descriptors for `define_properties` and `create_env`, and the
//! key filters of `get_all_property_names`

use std::ops::{BitOr, BitOrAssign};

use crate::callback::{Callback, CallbackData};
use crate::object::PropertyKey;
use crate::value::Value;

/// Property attribute flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PropertyAttributes(u32);

impl PropertyAttributes {
    /// Read-only, non-enumerable, non-configurable
    pub const DEFAULT: Self = Self(0);
    /// Value may be changed by assignment
    pub const WRITABLE: Self = Self(1 << 0);
    /// Shows up in property enumeration
    pub const ENUMERABLE: Self = Self(1 << 1);
    /// May be deleted or redefined
    pub const CONFIGURABLE: Self = Self(1 << 2);
    /// Class-level property; ignored by `define_properties`
    pub const STATIC: Self = Self(1 << 10);
    /// Default for class methods
    pub const DEFAULT_METHOD: Self = Self(Self::WRITABLE.0 | Self::CONFIGURABLE.0);
    /// Default for properties created by assignment in script
    pub const DEFAULT_JSPROPERTY: Self =
        Self(Self::WRITABLE.0 | Self::ENUMERABLE.0 | Self::CONFIGURABLE.0);

    /// Raw flag bits
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Attributes from raw flag bits
    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Whether every flag of `other` is set
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Both sets of flags
    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Flags of `self` not in `other`
    #[inline]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// `WRITABLE` is set
    #[inline]
    pub const fn writable(self) -> bool {
        self.contains(Self::WRITABLE)
    }

    /// `ENUMERABLE` is set
    #[inline]
    pub const fn enumerable(self) -> bool {
        self.contains(Self::ENUMERABLE)
    }

    /// `CONFIGURABLE` is set
    #[inline]
    pub const fn configurable(self) -> bool {
        self.contains(Self::CONFIGURABLE)
    }

    /// `STATIC` is set
    #[inline]
    pub const fn is_static(self) -> bool {
        self.contains(Self::STATIC)
    }
}

impl BitOr for PropertyAttributes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for PropertyAttributes {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

/// Key of a described property
pub enum PropertyName {
    /// UTF-8 string key
    Utf8(String),
    /// String or symbol value
    Value(Value),
}

impl From<&str> for PropertyName {
    fn from(name: &str) -> Self {
        Self::Utf8(name.to_string())
    }
}

impl From<String> for PropertyName {
    fn from(name: String) -> Self {
        Self::Utf8(name)
    }
}

impl From<Value> for PropertyName {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// What a described property holds
pub enum Accessor {
    /// A plain data value
    Value(Value),
    /// A native function stored as a data property
    Method(Callback),
    /// Native accessors; at least one must be present
    GetterSetter {
        /// Called on read
        getter: Option<Callback>,
        /// Called on write
        setter: Option<Callback>,
    },
}

/// One property to define
pub struct PropertyDescriptor {
    /// Property key
    pub name: PropertyName,
    /// Value, method or accessor pair
    pub kind: Accessor,
    /// Attribute flags; `WRITABLE` is ignored for accessors
    pub attributes: PropertyAttributes,
    /// Data handed to the native callbacks of this property
    pub data: Option<CallbackData>,
}

impl PropertyDescriptor {
    /// A data property
    pub fn value(
        name: impl Into<PropertyName>,
        value: Value,
        attributes: PropertyAttributes,
    ) -> Self {
        Self {
            name: name.into(),
            kind: Accessor::Value(value),
            attributes,
            data: None,
        }
    }

    /// A native method
    pub fn method(
        name: impl Into<PropertyName>,
        method: Callback,
        attributes: PropertyAttributes,
    ) -> Self {
        Self {
            name: name.into(),
            kind: Accessor::Method(method),
            attributes,
            data: None,
        }
    }

    /// A native accessor pair
    pub fn accessor(
        name: impl Into<PropertyName>,
        getter: Option<Callback>,
        setter: Option<Callback>,
        attributes: PropertyAttributes,
    ) -> Self {
        Self {
            name: name.into(),
            kind: Accessor::GetterSetter { getter, setter },
            attributes,
            data: None,
        }
    }

    /// Attach callback data
    pub fn with_data(mut self, data: CallbackData) -> Self {
        self.data = Some(data);
        self
    }
}

/// How far `get_all_property_names` looks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KeyCollectionMode {
    /// The object and its whole prototype chain
    #[default]
    IncludePrototypes,
    /// Own properties only
    OwnOnly,
}

/// Which keys `get_all_property_names` reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct KeyFilter(u32);

impl KeyFilter {
    /// Every key
    pub const ALL: Self = Self(0);
    /// Only writable properties
    pub const WRITABLE: Self = Self(1 << 0);
    /// Only enumerable properties
    pub const ENUMERABLE: Self = Self(1 << 1);
    /// Only configurable properties
    pub const CONFIGURABLE: Self = Self(1 << 2);
    /// Leave out string keys
    pub const SKIP_STRINGS: Self = Self(1 << 3);
    /// Leave out symbol keys
    pub const SKIP_SYMBOLS: Self = Self(1 << 4);

    /// Raw flag bits
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Filter from raw flag bits
    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Whether every flag of `other` is set
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub(crate) fn accepts(self, key: &PropertyKey, attributes: PropertyAttributes) -> bool {
        let kind_skipped = match key {
            PropertyKey::String(_) => self.contains(Self::SKIP_STRINGS),
            PropertyKey::Symbol(_) => self.contains(Self::SKIP_SYMBOLS),
        };
        !kind_skipped
            && (!self.contains(Self::WRITABLE) || attributes.writable())
            && (!self.contains(Self::ENUMERABLE) || attributes.enumerable())
            && (!self.contains(Self::CONFIGURABLE) || attributes.configurable())
    }
}

impl BitOr for KeyFilter {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// How `get_all_property_names` reports integer keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum KeyConversion {
    /// Array indices as numbers
    #[default]
    KeepNumbers,
    /// Every key as a string
    NumbersToStrings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_defaults() {
        let method = PropertyAttributes::DEFAULT_METHOD;
        assert!(method.writable());
        assert!(!method.enumerable());
        assert!(method.configurable());

        let js = PropertyAttributes::DEFAULT_JSPROPERTY;
        assert_eq!(js.bits(), 0b111);
        assert!(!PropertyAttributes::DEFAULT.writable());
    }

    #[test]
    fn test_attribute_ops() {
        let mut attrs = PropertyAttributes::WRITABLE | PropertyAttributes::STATIC;
        assert!(attrs.is_static());
        attrs |= PropertyAttributes::ENUMERABLE;
        assert!(attrs.enumerable());
        assert_eq!(
            attrs.difference(PropertyAttributes::STATIC),
            PropertyAttributes::WRITABLE | PropertyAttributes::ENUMERABLE
        );
    }

    #[test]
    fn test_key_filter() {
        let key = PropertyKey::from("x");
        let hidden = PropertyAttributes::WRITABLE;
        assert!(KeyFilter::ALL.accepts(&key, hidden));
        assert!(!KeyFilter::ENUMERABLE.accepts(&key, hidden));
        assert!((KeyFilter::WRITABLE | KeyFilter::SKIP_SYMBOLS).accepts(&key, hidden));
        assert!(!KeyFilter::SKIP_STRINGS.accepts(&key, PropertyAttributes::DEFAULT_JSPROPERTY));
        assert!(!KeyFilter::CONFIGURABLE.accepts(&key, hidden));
    }
}
