//! Element trait mapping Rust types to DType
//!
//! Connects Rust's type system to the runtime dtype system for the host
//! backend and tests. Arithmetic is expressed as trait methods so the
//! interpreter can fold any element type through one generic path.

use super::DType;
use bytemuck::{Pod, Zeroable};

/// Trait for types that can be elements of a tensor
pub trait Element: Copy + Clone + Send + Sync + PartialOrd + Pod + Zeroable + 'static {
    /// The corresponding DType for this Rust type
    const DTYPE: DType;

    /// Zero value
    fn zero() -> Self;

    /// One value
    fn one() -> Self;

    /// Convert to f64 for generic numeric operations
    fn to_f64(self) -> f64;

    /// Convert from f64
    fn from_f64(v: f64) -> Self;

    /// Raw bits, zero- or sign-extended to 64 (used by bitwise reductions)
    fn to_bits(self) -> u64;

    /// Rebuild from the low bits of a 64-bit word
    fn from_bits(bits: u64) -> Self;

    /// Wrapping addition (two's complement for integers, IEEE for floats)
    fn add(self, other: Self) -> Self;

    /// Wrapping multiplication
    fn mul(self, other: Self) -> Self;

    /// True for floating NaN, false for every other value
    #[inline]
    fn is_nan(self) -> bool {
        false
    }

    /// True when the value is exactly zero
    fn is_zero(self) -> bool;
}

macro_rules! impl_element_float {
    ($ty:ty, $dtype:expr, $bits:ty) => {
        impl Element for $ty {
            const DTYPE: DType = $dtype;

            #[inline]
            fn zero() -> Self {
                0.0
            }
            #[inline]
            fn one() -> Self {
                1.0
            }
            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }
            #[inline]
            fn from_f64(v: f64) -> Self {
                v as $ty
            }
            #[inline]
            fn to_bits(self) -> u64 {
                <$ty>::to_bits(self) as u64
            }
            #[inline]
            fn from_bits(bits: u64) -> Self {
                <$ty>::from_bits(bits as $bits)
            }
            #[inline]
            fn add(self, other: Self) -> Self {
                self + other
            }
            #[inline]
            fn mul(self, other: Self) -> Self {
                self * other
            }
            #[inline]
            fn is_nan(self) -> bool {
                <$ty>::is_nan(self)
            }
            #[inline]
            fn is_zero(self) -> bool {
                self == 0.0
            }
        }
    };
}

impl_element_float!(f64, DType::F64, u64);
impl_element_float!(f32, DType::F32, u32);

macro_rules! impl_element_int {
    ($ty:ty, $dtype:expr) => {
        impl Element for $ty {
            const DTYPE: DType = $dtype;

            #[inline]
            fn zero() -> Self {
                0
            }
            #[inline]
            fn one() -> Self {
                1
            }
            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }
            #[inline]
            fn from_f64(v: f64) -> Self {
                v as $ty
            }
            #[inline]
            fn to_bits(self) -> u64 {
                self as u64
            }
            #[inline]
            fn from_bits(bits: u64) -> Self {
                bits as $ty
            }
            #[inline]
            fn add(self, other: Self) -> Self {
                self.wrapping_add(other)
            }
            #[inline]
            fn mul(self, other: Self) -> Self {
                self.wrapping_mul(other)
            }
            #[inline]
            fn is_zero(self) -> bool {
                self == 0
            }
        }
    };
}

impl_element_int!(i64, DType::I64);
impl_element_int!(i32, DType::I32);
impl_element_int!(i16, DType::I16);
impl_element_int!(i8, DType::I8);
impl_element_int!(u64, DType::U64);
impl_element_int!(u32, DType::U32);
impl_element_int!(u16, DType::U16);
impl_element_int!(u8, DType::U8);

#[cfg(feature = "f16")]
macro_rules! impl_element_half {
    ($ty:ty, $dtype:expr) => {
        impl Element for $ty {
            const DTYPE: DType = $dtype;

            #[inline]
            fn zero() -> Self {
                <$ty>::from_f32(0.0)
            }
            #[inline]
            fn one() -> Self {
                <$ty>::from_f32(1.0)
            }
            #[inline]
            fn to_f64(self) -> f64 {
                self.to_f64()
            }
            #[inline]
            fn from_f64(v: f64) -> Self {
                <$ty>::from_f64(v)
            }
            #[inline]
            fn to_bits(self) -> u64 {
                self.to_bits() as u64
            }
            #[inline]
            fn from_bits(bits: u64) -> Self {
                <$ty>::from_bits(bits as u16)
            }
            #[inline]
            fn add(self, other: Self) -> Self {
                self + other
            }
            #[inline]
            fn mul(self, other: Self) -> Self {
                self * other
            }
            #[inline]
            fn is_nan(self) -> bool {
                self.is_nan()
            }
            #[inline]
            fn is_zero(self) -> bool {
                self.to_f32() == 0.0
            }
        }
    };
}

#[cfg(feature = "f16")]
impl_element_half!(half::f16, DType::F16);
#[cfg(feature = "f16")]
impl_element_half!(half::bf16, DType::BF16);
