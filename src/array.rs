//! Typed contiguous buffers with a runtime type tag, underlying every [`crate::channel::Channel`].
//!
//! Unlike a C++ template, a single [`Array`] carries its element type as data
//! (`ElementType`) rather than as a generic parameter, because a `Channel`'s type is only
//! known at construction time, not at compile time.

use crate::errors::ArrayError;
use std::fmt;

/// The primitive element type a buffer is tagged with. Every byte-level operation on
/// [`Array`]/[`ArrayView`] is a multiple of `ElementType::byte_width()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    Char,
}

impl ElementType {
    /// Size in bytes of a single element of this type.
    pub fn byte_width(self) -> usize {
        match self {
            ElementType::Bool | ElementType::I8 | ElementType::U8 | ElementType::Char => 1,
            ElementType::I16 | ElementType::U16 => 2,
            ElementType::I32 | ElementType::U32 | ElementType::F32 => 4,
            ElementType::I64 | ElementType::U64 | ElementType::F64 => 8,
        }
    }

    /// `true` for the signed/unsigned integer variants (excludes `Bool`, `Char`, floats).
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ElementType::I8
                | ElementType::U8
                | ElementType::I16
                | ElementType::U16
                | ElementType::I32
                | ElementType::U32
                | ElementType::I64
                | ElementType::U64
        )
    }

    /// `true` for `F32`/`F64`.
    pub fn is_float(self) -> bool {
        matches!(self, ElementType::F32 | ElementType::F64)
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ElementType::Bool => "bool",
            ElementType::I8 => "i8",
            ElementType::U8 => "u8",
            ElementType::I16 => "i16",
            ElementType::U16 => "u16",
            ElementType::I32 => "i32",
            ElementType::U32 => "u32",
            ElementType::I64 => "i64",
            ElementType::U64 => "u64",
            ElementType::F32 => "f32",
            ElementType::F64 => "f64",
            ElementType::Char => "char",
        };
        f.write_str(s)
    }
}

/// A single decoded scalar, tagged with the [`ElementType`] it was read as. This is the
/// currency `DevFilter` rules and `Channel::read`/`write_scalar` trade in, since the rule
/// string format (`trigger=1`, `write=3.5`) has no compile-time type to anchor to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    Char(u8),
}

impl Value {
    /// The element type this value was decoded as.
    pub fn element_type(self) -> ElementType {
        match self {
            Value::Bool(_) => ElementType::Bool,
            Value::I8(_) => ElementType::I8,
            Value::U8(_) => ElementType::U8,
            Value::I16(_) => ElementType::I16,
            Value::U16(_) => ElementType::U16,
            Value::I32(_) => ElementType::I32,
            Value::U32(_) => ElementType::U32,
            Value::I64(_) => ElementType::I64,
            Value::U64(_) => ElementType::U64,
            Value::F32(_) => ElementType::F32,
            Value::F64(_) => ElementType::F64,
            Value::Char(_) => ElementType::Char,
        }
    }

    /// Widens any numeric variant to `f64` for cross-type comparison (the promotion
    /// `DevFilter` applies when a rule's literal type doesn't match the channel's element
    /// type, e.g. a `trigger=1` rule against an `f32` channel).
    pub fn as_f64(self) -> f64 {
        match self {
            Value::Bool(b) => {
                if b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::I8(v) => v as f64,
            Value::U8(v) => v as f64,
            Value::I16(v) => v as f64,
            Value::U16(v) => v as f64,
            Value::I32(v) => v as f64,
            Value::U32(v) => v as f64,
            Value::I64(v) => v as f64,
            Value::U64(v) => v as f64,
            Value::F32(v) => v as f64,
            Value::F64(v) => v,
            Value::Char(v) => v as f64,
        }
    }

    /// Widens any integer-like variant (including `Bool`/`Char`) to `i64`. Returns `None`
    /// for float variants, where bitwise operators (`ByteAnd`/`ByteOr`/`ByteXor`) are not
    /// meaningful.
    pub fn as_i64(self) -> Option<i64> {
        match self {
            Value::Bool(b) => Some(b as i64),
            Value::I8(v) => Some(v as i64),
            Value::U8(v) => Some(v as i64),
            Value::I16(v) => Some(v as i64),
            Value::U16(v) => Some(v as i64),
            Value::I32(v) => Some(v as i64),
            Value::U32(v) => Some(v as i64),
            Value::I64(v) => Some(v),
            Value::U64(v) => Some(v as i64),
            Value::Char(v) => Some(v as i64),
            Value::F32(_) | Value::F64(_) => None,
        }
    }

    fn write_le_bytes(self, out: &mut [u8]) {
        match self {
            Value::Bool(b) => out[0] = b as u8,
            Value::I8(v) => out[0] = v as u8,
            Value::U8(v) => out[0] = v,
            Value::I16(v) => out.copy_from_slice(&v.to_le_bytes()),
            Value::U16(v) => out.copy_from_slice(&v.to_le_bytes()),
            Value::I32(v) => out.copy_from_slice(&v.to_le_bytes()),
            Value::U32(v) => out.copy_from_slice(&v.to_le_bytes()),
            Value::I64(v) => out.copy_from_slice(&v.to_le_bytes()),
            Value::U64(v) => out.copy_from_slice(&v.to_le_bytes()),
            Value::F32(v) => out.copy_from_slice(&v.to_le_bytes()),
            Value::F64(v) => out.copy_from_slice(&v.to_le_bytes()),
            Value::Char(v) => out[0] = v,
        }
    }

    fn from_le_bytes(element_type: ElementType, bytes: &[u8]) -> Value {
        match element_type {
            ElementType::Bool => Value::Bool(bytes[0] != 0),
            ElementType::I8 => Value::I8(bytes[0] as i8),
            ElementType::U8 => Value::U8(bytes[0]),
            ElementType::I16 => Value::I16(i16::from_le_bytes(bytes.try_into().unwrap())),
            ElementType::U16 => Value::U16(u16::from_le_bytes(bytes.try_into().unwrap())),
            ElementType::I32 => Value::I32(i32::from_le_bytes(bytes.try_into().unwrap())),
            ElementType::U32 => Value::U32(u32::from_le_bytes(bytes.try_into().unwrap())),
            ElementType::I64 => Value::I64(i64::from_le_bytes(bytes.try_into().unwrap())),
            ElementType::U64 => Value::U64(u64::from_le_bytes(bytes.try_into().unwrap())),
            ElementType::F32 => Value::F32(f32::from_le_bytes(bytes.try_into().unwrap())),
            ElementType::F64 => Value::F64(f64::from_le_bytes(bytes.try_into().unwrap())),
            ElementType::Char => Value::Char(bytes[0]),
        }
    }
}

/// An owned, contiguous, singly-typed buffer. The element type and element count are fixed
/// once the buffer is non-empty; growing past the current capacity reallocates but never
/// changes `element_type`.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    element_type: ElementType,
    data: Vec<u8>,
}

impl Array {
    /// Creates an empty array of the given element type.
    pub fn new(element_type: ElementType) -> Self {
        Self { element_type, data: Vec::new() }
    }

    /// Creates an array of `count` zeroed elements.
    pub fn zeroed(element_type: ElementType, count: usize) -> Self {
        Self { element_type, data: vec![0u8; count * element_type.byte_width()] }
    }

    /// Builds an array from a raw little-endian byte buffer. `bytes.len()` must be a
    /// multiple of `element_type.byte_width()`.
    pub fn from_bytes(element_type: ElementType, bytes: &[u8]) -> Result<Self, ArrayError> {
        let width = element_type.byte_width();
        if bytes.len() % width != 0 {
            return Err(ArrayError::ByteRangeOutOfBounds {
                offset: 0,
                len: bytes.len(),
                capacity: (bytes.len() / width) * width,
            });
        }
        Ok(Self { element_type, data: bytes.to_vec() })
    }

    /// The element type this array was constructed with.
    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.data.len() / self.element_type.byte_width()
    }

    /// `true` if this array holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Total size in bytes (`len() * element_type().byte_width()`).
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// The raw backing bytes, little-endian.
    pub fn buf(&self) -> &[u8] {
        &self.data
    }

    /// The byte offset of element `index` within `buf()`.
    pub fn byte_index(&self, index: usize) -> usize {
        index * self.element_type.byte_width()
    }

    /// A view over this array's full contents, borrowing it.
    pub fn view(&self) -> ArrayView<'_> {
        ArrayView { element_type: self.element_type, data: &self.data }
    }

    /// `true` if `other` has the same element type as `self`.
    pub fn is_same_type(&self, other: &Array) -> bool {
        self.element_type == other.element_type
    }

    /// Reads the element at `index` as a tagged [`Value`].
    pub fn get(&self, index: usize) -> Result<Value, ArrayError> {
        self.view().get(index)
    }

    /// Overwrites the element at `index`. `value`'s element type must match this array's.
    pub fn set(&mut self, index: usize, value: Value) -> Result<(), ArrayError> {
        let width = self.element_type.byte_width();
        if index >= self.len() {
            return Err(ArrayError::IndexOutOfBounds { index, size: self.len() });
        }
        if value.element_type() != self.element_type {
            return Err(ArrayError::TypeMismatch {
                expected: self.element_type,
                actual: value.element_type(),
            });
        }
        let offset = index * width;
        value.write_le_bytes(&mut self.data[offset..offset + width]);
        Ok(())
    }

    /// Appends a single element. `value`'s element type must match this array's.
    pub fn push(&mut self, value: Value) -> Result<(), ArrayError> {
        if value.element_type() != self.element_type {
            return Err(ArrayError::TypeMismatch {
                expected: self.element_type,
                actual: value.element_type(),
            });
        }
        let width = self.element_type.byte_width();
        let old_len = self.data.len();
        self.data.resize(old_len + width, 0);
        value.write_le_bytes(&mut self.data[old_len..]);
        Ok(())
    }

    /// Grows or shrinks the array to `count` elements, zero-filling any newly added room.
    pub fn resize(&mut self, count: usize) {
        self.data.resize(count * self.element_type.byte_width(), 0);
    }

    /// Overwrites `self.byte_len()` bytes starting at `byte_offset` with `bytes`.
    /// Fails if the range would run past the current length (this never grows the array;
    /// use [`Array::resize`] first if growth is intended).
    pub fn copy_from_bytes(&mut self, bytes: &[u8], byte_offset: usize) -> Result<(), ArrayError> {
        let end = byte_offset + bytes.len();
        if end > self.data.len() {
            return Err(ArrayError::ByteRangeOutOfBounds {
                offset: byte_offset,
                len: bytes.len(),
                capacity: self.data.len(),
            });
        }
        self.data[byte_offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Copies `len` bytes starting at `byte_offset` out into a new `Vec<u8>`.
    pub fn copy_to_bytes(&self, byte_offset: usize, len: usize) -> Result<Vec<u8>, ArrayError> {
        self.view().copy_to_bytes(byte_offset, len)
    }

    /// Writes an entire view's contents over this array's contents, starting at
    /// `byte_offset`; the view's element type need not match (channels accept raw byte
    /// writes), but the byte range must fit.
    pub fn write_view(&mut self, view: ArrayView<'_>, byte_offset: usize) -> Result<(), ArrayError> {
        self.copy_from_bytes(view.buf(), byte_offset)
    }
}

/// A borrowed, read-only view over a contiguous typed byte range. Cheap to construct and
/// pass around (it is two words: a type tag and a slice), the way `Channel::write` accepts
/// the data to install without requiring the caller to hand over ownership.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArrayView<'a> {
    element_type: ElementType,
    data: &'a [u8],
}

impl<'a> ArrayView<'a> {
    /// Wraps a raw little-endian byte slice as a view of the given element type.
    /// `bytes.len()` must be a multiple of `element_type.byte_width()`.
    pub fn from_bytes(element_type: ElementType, bytes: &'a [u8]) -> Result<Self, ArrayError> {
        let width = element_type.byte_width();
        if bytes.len() % width != 0 {
            return Err(ArrayError::ByteRangeOutOfBounds {
                offset: 0,
                len: bytes.len(),
                capacity: (bytes.len() / width) * width,
            });
        }
        Ok(Self { element_type, data: bytes })
    }

    /// The element type this view is tagged with.
    pub fn element_type(&self) -> ElementType {
        self.element_type
    }

    /// Number of elements in view.
    pub fn len(&self) -> usize {
        self.data.len() / self.element_type.byte_width()
    }

    /// `true` if this view covers zero elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Total size in bytes.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// The raw borrowed bytes.
    pub fn buf(&self) -> &'a [u8] {
        self.data
    }

    /// `true` if `other` shares this view's element type.
    pub fn is_same_type(&self, other: &ArrayView<'_>) -> bool {
        self.element_type == other.element_type
    }

    /// Reads the element at `index` as a tagged [`Value`].
    pub fn get(&self, index: usize) -> Result<Value, ArrayError> {
        let width = self.element_type.byte_width();
        if index >= self.len() {
            return Err(ArrayError::IndexOutOfBounds { index, size: self.len() });
        }
        let offset = index * width;
        Ok(Value::from_le_bytes(self.element_type, &self.data[offset..offset + width]))
    }

    /// Copies `len` bytes starting at `byte_offset` into a new owned `Vec<u8>`.
    pub fn copy_to_bytes(&self, byte_offset: usize, len: usize) -> Result<Vec<u8>, ArrayError> {
        let end = byte_offset + len;
        if end > self.data.len() {
            return Err(ArrayError::ByteRangeOutOfBounds {
                offset: byte_offset,
                len,
                capacity: self.data.len(),
            });
        }
        Ok(self.data[byte_offset..end].to_vec())
    }

    /// Returns the sub-view `[pos, pos + count)`, clamped to this view's bounds.
    pub fn subview(&self, pos: usize, count: usize) -> ArrayView<'a> {
        let pos = pos.min(self.len());
        let count = count.min(self.len() - pos);
        let width = self.element_type.byte_width();
        let byte_pos = pos * width;
        ArrayView { element_type: self.element_type, data: &self.data[byte_pos..byte_pos + count * width] }
    }
}

impl<'a> From<&'a Array> for ArrayView<'a> {
    fn from(array: &'a Array) -> Self {
        array.view()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_and_get_round_trip() {
        let mut arr = Array::new(ElementType::I32);
        arr.push(Value::I32(42)).unwrap();
        arr.push(Value::I32(-7)).unwrap();
        assert_eq!(arr.len(), 2);
        assert_eq!(arr.get(0).unwrap(), Value::I32(42));
        assert_eq!(arr.get(1).unwrap(), Value::I32(-7));
    }

    #[test]
    fn set_rejects_type_mismatch() {
        let mut arr = Array::zeroed(ElementType::U8, 4);
        let err = arr.set(0, Value::I32(1)).unwrap_err();
        assert!(matches!(err, ArrayError::TypeMismatch { .. }));
    }

    #[test]
    fn index_out_of_bounds_is_reported() {
        let arr = Array::zeroed(ElementType::F64, 2);
        let err = arr.get(5).unwrap_err();
        assert!(matches!(err, ArrayError::IndexOutOfBounds { index: 5, size: 2 }));
    }

    #[test]
    fn byte_round_trip_is_identical() {
        let mut arr = Array::new(ElementType::U16);
        arr.push(Value::U16(1)).unwrap();
        arr.push(Value::U16(65535)).unwrap();
        let bytes = arr.buf().to_vec();
        let rebuilt = Array::from_bytes(ElementType::U16, &bytes).unwrap();
        assert_eq!(arr, rebuilt);
    }

    #[test]
    fn subview_clamps_to_bounds() {
        let arr = Array::from_bytes(ElementType::U8, &[1, 2, 3, 4, 5]).unwrap();
        let view = arr.view().subview(2, 100);
        assert_eq!(view.len(), 3);
        assert_eq!(view.get(0).unwrap(), Value::U8(3));
    }

    #[test]
    fn value_promotion_widens_integers_to_f64() {
        assert_eq!(Value::I32(3).as_f64(), 3.0);
        assert_eq!(Value::Bool(true).as_f64(), 1.0);
        assert_eq!(Value::U8(255).as_i64(), Some(255));
        assert_eq!(Value::F32(1.5).as_i64(), None);
    }
}
