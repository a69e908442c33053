//! 二进制格式的版本、块类型与块头布局。

use std::fmt;

use crate::SerializationError;

/// 文件格式版本。写入时按版本省略新字段，读取时按版本跳过。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FormatVersion {
    V2_0,
    V2_1,
    V2_2,
    V2_3,
}

impl FormatVersion {
    pub const CURRENT: FormatVersion = FormatVersion::V2_3;
    pub const SUPPORTED_READ: [FormatVersion; 4] = [
        FormatVersion::V2_0,
        FormatVersion::V2_1,
        FormatVersion::V2_2,
        FormatVersion::V2_3,
    ];
    pub const SUPPORTED_WRITE: [FormatVersion; 4] = Self::SUPPORTED_READ;

    pub fn as_f32(self) -> f32 {
        match self {
            FormatVersion::V2_0 => 2.0,
            FormatVersion::V2_1 => 2.1,
            FormatVersion::V2_2 => 2.2,
            FormatVersion::V2_3 => 2.3,
        }
    }

    /// 按文件头中的浮点版本号查找可读版本。
    pub fn from_f32(value: f32) -> Result<Self, SerializationError> {
        Self::SUPPORTED_READ
            .into_iter()
            .find(|version| (version.as_f32() - value).abs() < 1e-4)
            .ok_or(SerializationError::VersionInvalid(value))
    }

    pub fn parse(text: &str) -> Result<Self, SerializationError> {
        let value: f32 = text
            .trim()
            .parse()
            .map_err(|_| SerializationError::VersionInvalid(f32::NAN))?;
        Self::from_f32(value)
    }

    #[inline]
    pub fn gte(self, other: FormatVersion) -> bool {
        self >= other
    }

    #[inline]
    pub fn lte(self, other: FormatVersion) -> bool {
        self <= other
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.as_f32())
    }
}

/// 块类型标记，每个值或容器前写一个字节。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ContainerType {
    Bool = 0,
    Int = 1,
    UnsignedInt = 2,
    Short = 3,
    UnsignedShort = 4,
    Long = 5,
    UnsignedLong = 6,
    LongLong = 7,
    UnsignedLongLong = 8,
    Float = 9,
    Double = 10,
    UnsignedChar = 11,
    Char = 12,
    Chapter = 13,
    List = 14,
    Object = 15,
    Null = 16,
    Complex = 17,
}

impl ContainerType {
    pub fn from_u8(tag: u8) -> Option<Self> {
        use ContainerType::*;
        Some(match tag {
            0 => Bool,
            1 => Int,
            2 => UnsignedInt,
            3 => Short,
            4 => UnsignedShort,
            5 => Long,
            6 => UnsignedLong,
            7 => LongLong,
            8 => UnsignedLongLong,
            9 => Float,
            10 => Double,
            11 => UnsignedChar,
            12 => Char,
            13 => Chapter,
            14 => List,
            15 => Object,
            16 => Null,
            17 => Complex,
            _ => return None,
        })
    }

    /// 带 [`ContainerHeader`] 的块类型。
    #[inline]
    pub fn is_container(self) -> bool {
        matches!(
            self,
            ContainerType::Chapter | ContainerType::List | ContainerType::Object
        )
    }

    /// 定长标量的字节数；容器、空值与变长块返回 `None`。
    pub fn scalar_size(self) -> Option<usize> {
        use ContainerType::*;
        match self {
            Bool | UnsignedChar | Char => Some(1),
            Short | UnsignedShort => Some(2),
            Int | UnsignedInt | Long | UnsignedLong | Float => Some(4),
            LongLong | UnsignedLongLong | Double => Some(8),
            Chapter | List | Object | Null | Complex => None,
        }
    }

    #[inline]
    pub fn is_float(self) -> bool {
        matches!(self, ContainerType::Float | ContainerType::Double)
    }

    #[inline]
    pub fn is_signed(self) -> bool {
        use ContainerType::*;
        matches!(self, Int | Short | Long | LongLong | Char)
    }

    /// `self` 能否无损扩展为 `target`（同类数值、宽度更大）。
    pub fn widens_to(self, target: ContainerType) -> bool {
        match (self.scalar_size(), target.scalar_size()) {
            (Some(from), Some(to)) => {
                self != ContainerType::Bool
                    && target != ContainerType::Bool
                    && from < to
                    && self.is_float() == target.is_float()
            }
            _ => false,
        }
    }
}

/// 容器块头：`[type u8][block_size i32][list_count i32]`。
/// `block_size` 为块头之后到块结束的字节数，写入结束时回填。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    pub kind: ContainerType,
    pub block_size: i32,
    pub list_count: i32,
}

impl ContainerHeader {
    pub const SIZE: u64 = 9;

    pub fn new(kind: ContainerType, list_count: i32) -> Self {
        Self {
            kind,
            block_size: 0,
            list_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ComplexType {
    /// 字典中的字符串，负载为 `i32` 编号。
    String = 0,
    Bytes = 1,
}

impl ComplexType {
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ComplexType::String),
            1 => Some(ComplexType::Bytes),
            _ => None,
        }
    }
}

/// 变长块头：`[type u8][size i32]`，紧跟在 `Complex` 标记之后。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComplexTypeHeader {
    pub kind: ComplexType,
    pub size: i32,
}

impl ComplexTypeHeader {
    pub const SIZE: u64 = 5;
}

/// 文件头：`[version f32][dictionary offset u64]`。
pub const FILE_HEADER_SIZE: u64 = 12;

/// 文件中的绝对位置，只能在顶层（章节内、对象外）取得与跳转。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Bookmark(pub u64);

impl Bookmark {
    #[inline]
    pub fn offset(self) -> u64 {
        self.0
    }
}

/// 标量值。读写协议按类型标记区分，不做隐式转换。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    Bool(bool),
    Int(i32),
    UnsignedInt(u32),
    Short(i16),
    UnsignedShort(u16),
    Long(i32),
    UnsignedLong(u32),
    LongLong(i64),
    UnsignedLongLong(u64),
    Float(f32),
    Double(f64),
    UnsignedChar(u8),
    Char(i8),
}

impl ScalarValue {
    pub fn kind(&self) -> ContainerType {
        match self {
            ScalarValue::Bool(_) => ContainerType::Bool,
            ScalarValue::Int(_) => ContainerType::Int,
            ScalarValue::UnsignedInt(_) => ContainerType::UnsignedInt,
            ScalarValue::Short(_) => ContainerType::Short,
            ScalarValue::UnsignedShort(_) => ContainerType::UnsignedShort,
            ScalarValue::Long(_) => ContainerType::Long,
            ScalarValue::UnsignedLong(_) => ContainerType::UnsignedLong,
            ScalarValue::LongLong(_) => ContainerType::LongLong,
            ScalarValue::UnsignedLongLong(_) => ContainerType::UnsignedLongLong,
            ScalarValue::Float(_) => ContainerType::Float,
            ScalarValue::Double(_) => ContainerType::Double,
            ScalarValue::UnsignedChar(_) => ContainerType::UnsignedChar,
            ScalarValue::Char(_) => ContainerType::Char,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_compare_and_round_trip() {
        assert!(FormatVersion::V2_3.gte(FormatVersion::V2_1));
        assert!(FormatVersion::V2_0.lte(FormatVersion::V2_0));
        assert!(!FormatVersion::V2_1.gte(FormatVersion::V2_2));
        for version in FormatVersion::SUPPORTED_READ {
            assert_eq!(FormatVersion::from_f32(version.as_f32()).unwrap(), version);
        }
        assert_eq!(FormatVersion::parse("2.2").unwrap(), FormatVersion::V2_2);
        assert!(matches!(
            FormatVersion::from_f32(1.9),
            Err(SerializationError::VersionInvalid(_))
        ));
        assert_eq!(FormatVersion::CURRENT.to_string(), "2.3");
    }

    #[test]
    fn widening_rules() {
        assert!(ContainerType::Float.widens_to(ContainerType::Double));
        assert!(ContainerType::Int.widens_to(ContainerType::LongLong));
        assert!(!ContainerType::Double.widens_to(ContainerType::Float));
        assert!(!ContainerType::Int.widens_to(ContainerType::Double));
        assert!(!ContainerType::Bool.widens_to(ContainerType::Int));
    }

    #[test]
    fn tags_round_trip() {
        for tag in 0..=17u8 {
            let kind = ContainerType::from_u8(tag).unwrap();
            assert_eq!(kind as u8, tag);
        }
        assert!(ContainerType::from_u8(18).is_none());
    }
}
