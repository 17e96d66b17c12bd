//! Typed value codec
//!
//! Maps every supported Rust value type onto one of the engine's fixed-width
//! primitives. The mapping is decided by the type at compile time; a type
//! without an [`NvsValue`] impl cannot be passed to `read`/`write`.
//!
//! | Rust type | Primitive | Packing |
//! |---|---|---|
//! | `bool` | `U8` | `0` ⇒ false, nonzero ⇒ true |
//! | [`nvs_enum!`](crate::nvs_enum) enums | `U8` | discriminant |
//! | `char` | `U8` | code point, must be ≤ U+00FF |
//! | `u8 i8 u16 i16 u32 i32 u64 i64` | same width and signedness | native |
//! | `f32` | `U32` | bit pattern |
//! | `f64` | `U64` | bit pattern |
//!
//! Floats are stored bit-for-bit, so NaN payloads and infinities round-trip
//! unchanged.

use crate::error::{Error, Result};
use crate::storage::{EngineError, Scalar, ValueType};

/// A value type that can be stored through a fixed-width engine primitive
pub trait NvsValue: Copy {
    /// Primitive this type is stored as
    const STORAGE: ValueType;

    /// Pack into the storage primitive
    fn encode(self) -> Result<Scalar>;

    /// Unpack from the storage primitive
    fn decode(raw: Scalar) -> Result<Self>;
}

/// Error for a primitive of the wrong type coming back from the engine
pub fn mismatch(expected: ValueType, raw: Scalar) -> Error {
    tracing::debug!(%expected, found = %raw.value_type(), "Engine returned unexpected primitive");
    Error::Engine(EngineError::TypeMismatch)
}

macro_rules! impl_integer {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl NvsValue for $ty {
                const STORAGE: ValueType = ValueType::$variant;

                fn encode(self) -> Result<Scalar> {
                    Ok(Scalar::$variant(self))
                }

                fn decode(raw: Scalar) -> Result<Self> {
                    match raw {
                        Scalar::$variant(value) => Ok(value),
                        other => Err(mismatch(Self::STORAGE, other)),
                    }
                }
            }
        )*
    };
}

impl_integer! {
    u8 => U8,
    i8 => I8,
    u16 => U16,
    i16 => I16,
    u32 => U32,
    i32 => I32,
    u64 => U64,
    i64 => I64,
}

impl NvsValue for bool {
    const STORAGE: ValueType = ValueType::U8;

    fn encode(self) -> Result<Scalar> {
        Ok(Scalar::U8(u8::from(self)))
    }

    fn decode(raw: Scalar) -> Result<Self> {
        u8::decode(raw).map(|value| value != 0)
    }
}

impl NvsValue for char {
    const STORAGE: ValueType = ValueType::U8;

    fn encode(self) -> Result<Scalar> {
        u8::try_from(self).map(Scalar::U8).map_err(|_| {
            Error::InvalidValue(format!(
                "character U+{:04X} does not fit in one byte",
                u32::from(self)
            ))
        })
    }

    fn decode(raw: Scalar) -> Result<Self> {
        u8::decode(raw).map(char::from)
    }
}

impl NvsValue for f32 {
    const STORAGE: ValueType = ValueType::U32;

    fn encode(self) -> Result<Scalar> {
        Ok(Scalar::U32(self.to_bits()))
    }

    fn decode(raw: Scalar) -> Result<Self> {
        u32::decode(raw).map(f32::from_bits)
    }
}

impl NvsValue for f64 {
    const STORAGE: ValueType = ValueType::U64;

    fn encode(self) -> Result<Scalar> {
        Ok(Scalar::U64(self.to_bits()))
    }

    fn decode(raw: Scalar) -> Result<Self> {
        u64::decode(raw).map(f64::from_bits)
    }
}

/// Declare a one-byte enumeration that can be stored with `read`/`write`.
///
/// The enum gets `#[repr(u8)]` and an [`NvsValue`] impl over the `U8`
/// primitive. It must derive `Clone` and `Copy`. Reading a byte that is not
/// one of the listed discriminants fails with
/// [`Error::InvalidValue`](crate::error::Error::InvalidValue).
///
/// ```rust
/// use nvs_pool::nvs_enum;
///
/// nvs_enum! {
///     #[derive(Debug, Clone, Copy, PartialEq, Eq)]
///     pub enum LedMode {
///         Off = 0,
///         On = 1,
///         Blink = 2,
///     }
/// }
/// ```
#[macro_export]
macro_rules! nvs_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident = $value:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(u8)]
        $vis enum $name {
            $($(#[$vmeta])* $variant = $value),+
        }

        impl $crate::codec::NvsValue for $name {
            const STORAGE: $crate::storage::ValueType = $crate::storage::ValueType::U8;

            fn encode(self) -> $crate::error::Result<$crate::storage::Scalar> {
                ::std::result::Result::Ok($crate::storage::Scalar::U8(self as u8))
            }

            fn decode(raw: $crate::storage::Scalar) -> $crate::error::Result<Self> {
                let raw = <u8 as $crate::codec::NvsValue>::decode(raw)?;
                $(
                    if raw == $value {
                        return ::std::result::Result::Ok($name::$variant);
                    }
                )+
                ::std::result::Result::Err($crate::error::Error::InvalidValue(::std::format!(
                    "{} is not a valid {} discriminant",
                    raw,
                    ::std::stringify!($name)
                )))
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::nvs_enum! {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        enum Color {
            Red = 0,
            Green = 1,
            Blue = 200,
        }
    }

    fn roundtrip<T: NvsValue>(value: T) -> T {
        let raw = value.encode().unwrap();
        assert_eq!(raw.value_type(), T::STORAGE);
        T::decode(raw).unwrap()
    }

    #[test]
    fn test_primitive_selection() {
        assert_eq!(<bool as NvsValue>::STORAGE, ValueType::U8);
        assert_eq!(<char as NvsValue>::STORAGE, ValueType::U8);
        assert_eq!(<Color as NvsValue>::STORAGE, ValueType::U8);
        assert_eq!(<i16 as NvsValue>::STORAGE, ValueType::I16);
        assert_eq!(<u64 as NvsValue>::STORAGE, ValueType::U64);
        assert_eq!(<f32 as NvsValue>::STORAGE, ValueType::U32);
        assert_eq!(<f64 as NvsValue>::STORAGE, ValueType::U64);
    }

    #[test]
    fn test_bool_packing() {
        assert_eq!(true.encode().unwrap(), Scalar::U8(1));
        assert_eq!(false.encode().unwrap(), Scalar::U8(0));
        assert!(bool::decode(Scalar::U8(0x80)).unwrap());
        assert!(!bool::decode(Scalar::U8(0)).unwrap());
    }

    #[test]
    fn test_integer_boundaries() {
        assert_eq!(roundtrip(i8::MIN), i8::MIN);
        assert_eq!(roundtrip(-1i32), -1);
        assert_eq!(roundtrip(u64::MAX), u64::MAX);
        assert_eq!(roundtrip(i64::MIN), i64::MIN);
        assert_eq!(roundtrip(0u16), 0);
    }

    #[test]
    fn test_float_bit_patterns() {
        assert_eq!(1.5f32.encode().unwrap(), Scalar::U32(1.5f32.to_bits()));
        assert_eq!(roundtrip(f64::INFINITY), f64::INFINITY);
        assert_eq!(roundtrip(f32::NEG_INFINITY), f32::NEG_INFINITY);

        let nan = f64::from_bits(0x7ff8_0000_dead_beef);
        assert_eq!(roundtrip(nan).to_bits(), nan.to_bits());
    }

    #[test]
    fn test_char_range() {
        assert_eq!(roundtrip('A'), 'A');
        assert_eq!(roundtrip('ÿ'), 'ÿ');
        assert!(matches!('€'.encode(), Err(Error::InvalidValue(_))));
    }

    #[test]
    fn test_enum_discriminants() {
        assert_eq!(Color::Blue.encode().unwrap(), Scalar::U8(200));
        assert_eq!(roundtrip(Color::Green), Color::Green);
        assert!(matches!(
            Color::decode(Scalar::U8(7)),
            Err(Error::InvalidValue(_))
        ));
        let _ = Color::Red;
    }

    #[test]
    fn test_wrong_primitive_is_type_mismatch() {
        assert!(matches!(
            u32::decode(Scalar::I32(1)),
            Err(Error::Engine(EngineError::TypeMismatch))
        ));
    }
}
