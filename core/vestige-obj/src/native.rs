//! Fixed-width primitive codecs.
//!
//! A native-type table maps primitive names (`"unsigned long"`,
//! `"pointer"`, …) to a little-endian pack format. Two canonical tables
//! exist, one per memory model; a profile clones one and may specialize
//! entries (the 64-bit Linux profiles widen `long`, the Windows ones pin
//! `pointer64` to eight bytes).

use std::collections::BTreeMap;

/// Little-endian wire format of one primitive.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PackFormat {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

/// A decoded primitive.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum PrimitiveValue {
    Unsigned(u64),
    Signed(i64),
    Float(f64),
}

impl PrimitiveValue {
    /// Numeric view as `u64`; signed values are reinterpreted, floats
    /// truncated.
    #[must_use]
    pub fn as_u64(self) -> u64 {
        match self {
            Self::Unsigned(v) => v,
            Self::Signed(v) => v as u64,
            Self::Float(v) => v as u64,
        }
    }

    #[must_use]
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Unsigned(v) => v as i64,
            Self::Signed(v) => v,
            Self::Float(v) => v as i64,
        }
    }
}

impl PackFormat {
    /// Encoded size in bytes.
    #[must_use]
    pub const fn size(self) -> u64 {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
        }
    }

    /// Decode `bytes` (exactly [`size`](Self::size) of them).
    #[must_use]
    pub fn decode(self, bytes: &[u8]) -> Option<PrimitiveValue> {
        if bytes.len() != self.size() as usize {
            return None;
        }
        let value = match self {
            Self::U8 => PrimitiveValue::Unsigned(bytes[0].into()),
            Self::I8 => PrimitiveValue::Signed((bytes[0] as i8).into()),
            Self::U16 => {
                PrimitiveValue::Unsigned(u16::from_le_bytes(bytes.try_into().ok()?).into())
            }
            Self::I16 => PrimitiveValue::Signed(i16::from_le_bytes(bytes.try_into().ok()?).into()),
            Self::U32 => {
                PrimitiveValue::Unsigned(u32::from_le_bytes(bytes.try_into().ok()?).into())
            }
            Self::I32 => PrimitiveValue::Signed(i32::from_le_bytes(bytes.try_into().ok()?).into()),
            Self::U64 => PrimitiveValue::Unsigned(u64::from_le_bytes(bytes.try_into().ok()?)),
            Self::I64 => PrimitiveValue::Signed(i64::from_le_bytes(bytes.try_into().ok()?)),
            Self::F32 => PrimitiveValue::Float(f32::from_le_bytes(bytes.try_into().ok()?).into()),
            Self::F64 => PrimitiveValue::Float(f64::from_le_bytes(bytes.try_into().ok()?)),
        };
        Some(value)
    }
}

/// Primitive name to pack-format mapping for one memory model.
#[derive(Clone, Debug, Default)]
pub struct NativeTypeTable {
    entries: BTreeMap<String, PackFormat>,
}

impl NativeTypeTable {
    /// The canonical 32-bit table.
    #[must_use]
    pub fn x86() -> Self {
        Self::build(PackFormat::U32, PackFormat::I32, PackFormat::U32)
    }

    /// The canonical 64-bit table. Note `long` stays four bytes here
    /// (the Windows data model); Linux profiles widen it.
    #[must_use]
    pub fn x64() -> Self {
        Self::build(PackFormat::U64, PackFormat::I32, PackFormat::U32)
    }

    fn build(pointer: PackFormat, long: PackFormat, unsigned_long: PackFormat) -> Self {
        let mut entries = BTreeMap::new();
        let mut set = |name: &str, fmt| {
            entries.insert(name.to_string(), fmt);
        };
        set("char", PackFormat::I8);
        set("unsigned char", PackFormat::U8);
        set("short", PackFormat::I16);
        set("unsigned short", PackFormat::U16);
        set("int", PackFormat::I32);
        set("unsigned int", PackFormat::U32);
        set("long", long);
        set("unsigned long", unsigned_long);
        set("long long", PackFormat::I64);
        set("unsigned long long", PackFormat::U64);
        set("float", PackFormat::F32);
        set("double", PackFormat::F64);
        set("address", pointer);
        set("pointer", pointer);
        set("pointer64", PackFormat::U64);
        Self { entries }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<PackFormat> {
        self.entries.get(name).copied()
    }

    #[must_use]
    pub fn size_of(&self, name: &str) -> Option<u64> {
        self.get(name).map(PackFormat::size)
    }

    /// Clone-and-specialize hook: replace or add one entry.
    pub fn set(&mut self, name: impl Into<String>, fmt: PackFormat) {
        self.entries.insert(name.into(), fmt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_width_tracks_the_memory_model() {
        assert_eq!(NativeTypeTable::x86().size_of("pointer"), Some(4));
        assert_eq!(NativeTypeTable::x64().size_of("pointer"), Some(8));
        assert_eq!(NativeTypeTable::x64().size_of("unsigned long"), Some(4));
    }

    #[test]
    fn decode_round_trip() {
        let v = PackFormat::I16.decode(&(-2i16).to_le_bytes()).unwrap();
        assert_eq!(v.as_i64(), -2);

        let v = PackFormat::U64.decode(&0xDEAD_BEEFu64.to_le_bytes()).unwrap();
        assert_eq!(v.as_u64(), 0xDEAD_BEEF);

        assert!(PackFormat::U32.decode(&[0, 1]).is_none());
    }

    #[test]
    fn specialization_overrides() {
        let mut table = NativeTypeTable::x64();
        table.set("long", PackFormat::I64);
        assert_eq!(table.size_of("long"), Some(8));
    }
}
