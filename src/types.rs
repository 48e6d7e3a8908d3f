use std::fmt;

use bitflags::bitflags;

use crate::err::HookError;

/// Address of a method's metadata in the host runtime.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct MethodId(pub usize);

/// An opaque object handle issued by the host (local or global reference).
/// `0` is the null handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct JObject(pub usize);

impl JObject {
    /// The null handle.
    pub const NULL: JObject = JObject(0);

    /// Whether this is the null handle.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// A raw heap reference, as it is stored in a quick frame slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct MirrorRef(pub u32);

impl MirrorRef {
    /// The null reference.
    pub const NULL: MirrorRef = MirrorRef(0);

    /// Whether this is the null reference.
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

bitflags! {
    /// Access flags of a method.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u32 {
        /// public
        const PUBLIC = 0x0001;
        /// private, invoked directly without virtual dispatch
        const PRIVATE = 0x0002;
        /// protected
        const PROTECTED = 0x0004;
        /// static
        const STATIC = 0x0008;
        /// final
        const FINAL = 0x0010;
        /// synchronized
        const SYNCHRONIZED = 0x0020;
        /// native, called through the foreign-function path
        const NATIVE = 0x0100;
        /// abstract
        const ABSTRACT = 0x0400;
        /// constructor (`<init>` or `<clinit>`)
        const CONSTRUCTOR = 0x0001_0000;
    }
}

/// The kind of reflective object wrapping a method.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MemberKind {
    /// `java.lang.reflect.Method`
    Method,
    /// `java.lang.reflect.Constructor`
    Constructor,
}

/// Exceptions thrown by this crate through the host.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ExceptionKind {
    /// `java.lang.IllegalArgumentException`
    IllegalArgument,
    /// `java.lang.ClassCastException`
    ClassCast,
    /// `java.lang.NullPointerException`
    NullPointer,
    /// `java.lang.IllegalStateException`
    IllegalState,
}

/// Type kinds used in method shorties.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum PrimitiveType {
    /// Any reference type (`L`)
    Not,
    /// `Z`
    Boolean,
    /// `B`
    Byte,
    /// `C`
    Char,
    /// `S`
    Short,
    /// `I`
    Int,
    /// `J`
    Long,
    /// `F`
    Float,
    /// `D`
    Double,
    /// `V`, return kind only
    Void,
}

impl PrimitiveType {
    /// Parse a shorty character. Array types are references in a shorty.
    pub fn from_shorty_char(c: char) -> Option<Self> {
        Some(match c {
            'L' | '[' => PrimitiveType::Not,
            'Z' => PrimitiveType::Boolean,
            'B' => PrimitiveType::Byte,
            'C' => PrimitiveType::Char,
            'S' => PrimitiveType::Short,
            'I' => PrimitiveType::Int,
            'J' => PrimitiveType::Long,
            'F' => PrimitiveType::Float,
            'D' => PrimitiveType::Double,
            'V' => PrimitiveType::Void,
            _ => return None,
        })
    }

    /// The shorty character of this kind.
    pub fn shorty_char(self) -> char {
        match self {
            PrimitiveType::Not => 'L',
            PrimitiveType::Boolean => 'Z',
            PrimitiveType::Byte => 'B',
            PrimitiveType::Char => 'C',
            PrimitiveType::Short => 'S',
            PrimitiveType::Int => 'I',
            PrimitiveType::Long => 'J',
            PrimitiveType::Float => 'F',
            PrimitiveType::Double => 'D',
            PrimitiveType::Void => 'V',
        }
    }

    /// Whether values of this kind are passed as references.
    pub fn is_reference(self) -> bool {
        self == PrimitiveType::Not
    }

    /// Whether values of this kind take 64 bits.
    pub fn is_wide(self) -> bool {
        matches!(self, PrimitiveType::Long | PrimitiveType::Double)
    }

    /// Descriptor of the class boxing this kind.
    pub fn boxed_descriptor(self) -> Option<&'static str> {
        Some(match self {
            PrimitiveType::Boolean => "Ljava/lang/Boolean;",
            PrimitiveType::Byte => "Ljava/lang/Byte;",
            PrimitiveType::Char => "Ljava/lang/Character;",
            PrimitiveType::Short => "Ljava/lang/Short;",
            PrimitiveType::Int => "Ljava/lang/Integer;",
            PrimitiveType::Long => "Ljava/lang/Long;",
            PrimitiveType::Float => "Ljava/lang/Float;",
            PrimitiveType::Double => "Ljava/lang/Double;",
            PrimitiveType::Not | PrimitiveType::Void => return None,
        })
    }

    /// Source-level name, as used in exception messages.
    pub fn name(self) -> &'static str {
        match self {
            PrimitiveType::Not => "java.lang.Object",
            PrimitiveType::Boolean => "boolean",
            PrimitiveType::Byte => "byte",
            PrimitiveType::Char => "char",
            PrimitiveType::Short => "short",
            PrimitiveType::Int => "int",
            PrimitiveType::Long => "long",
            PrimitiveType::Float => "float",
            PrimitiveType::Double => "double",
            PrimitiveType::Void => "void",
        }
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A parsed method shorty: the return kind followed by one kind per declared
/// parameter. The receiver is never part of a shorty.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Shorty {
    ret: PrimitiveType,
    params: Vec<PrimitiveType>,
}

impl Shorty {
    /// Parse a shorty string such as `"IIJ"` (`int f(int, long)`).
    pub fn parse(s: &str) -> Result<Self, HookError> {
        let invalid = || HookError::InvalidShorty(s.to_owned());
        let mut chars = s.chars();
        let ret = chars
            .next()
            .and_then(PrimitiveType::from_shorty_char)
            .ok_or_else(invalid)?;
        let params = chars
            .map(|c| match PrimitiveType::from_shorty_char(c) {
                Some(PrimitiveType::Void) | None => Err(invalid()),
                Some(ty) => Ok(ty),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { ret, params })
    }

    /// The return kind.
    pub fn return_type(&self) -> PrimitiveType {
        self.ret
    }

    /// The declared parameter kinds, in declaration order.
    pub fn params(&self) -> &[PrimitiveType] {
        &self.params
    }
}

impl fmt::Display for Shorty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ret.shorty_char())?;
        self.params
            .iter()
            .try_for_each(|p| write!(f, "{}", p.shorty_char()))
    }
}
