//! Canonical FFI type model and the mapping from C type spellings into it.
//!
//! The model is deliberately small: 32/64-bit integers, 32/64-bit floats and
//! pointers. Everything the bridge marshals is one of these, independent of
//! how the source spelled it (`uint32_t`, `unsigned int` and `int` are all
//! `Int32`). `Void` only appears in return position.
//!
//! Integer scalars narrower than 32 bits are still `Int32` on the host side,
//! but keep their declared [`IntWidth`] so the call is made at that width.

use std::fmt;

/// Canonical FFI type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FfiType {
    /// No value (return position only)
    Void,
    Int32,
    Int64,
    Float32,
    Float64,
    /// Raw address; the bridge never infers a length from it
    Pointer(Pointee),
}

/// What a pointer points at
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Pointee {
    /// No element size (`void*`, 16-bit pointees)
    Opaque,
    /// Byte-sized elements (`char*`, `uint8_t*`); also the text pointee
    Byte,
    /// Element of canonical type
    Element(Box<FfiType>),
}

impl FfiType {
    /// Size of a value of this type in bytes (`Void` is 0)
    pub fn size(&self) -> usize {
        match self {
            FfiType::Void => 0,
            FfiType::Int32 | FfiType::Float32 => 4,
            FfiType::Int64 | FfiType::Float64 => 8,
            FfiType::Pointer(_) => std::mem::size_of::<usize>(),
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, FfiType::Pointer(_))
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, FfiType::Int32 | FfiType::Int64)
    }

    /// `char*`-style pointer, the only pointer shape decoded as text
    pub fn is_text_pointer(&self) -> bool {
        matches!(self, FfiType::Pointer(Pointee::Byte))
    }
}

impl Pointee {
    /// Element size in bytes, `None` for opaque pointees
    pub fn element_size(&self) -> Option<usize> {
        match self {
            Pointee::Opaque => None,
            Pointee::Byte => Some(1),
            Pointee::Element(ty) => Some(ty.size()),
        }
    }
}

impl fmt::Display for FfiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FfiType::Void => write!(f, "void"),
            FfiType::Int32 => write!(f, "i32"),
            FfiType::Int64 => write!(f, "i64"),
            FfiType::Float32 => write!(f, "f32"),
            FfiType::Float64 => write!(f, "f64"),
            FfiType::Pointer(p) => write!(f, "ptr<{}>", p),
        }
    }
}

impl fmt::Display for Pointee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pointee::Opaque => write!(f, "opaque"),
            Pointee::Byte => write!(f, "u8"),
            Pointee::Element(ty) => write!(f, "{}", ty),
        }
    }
}

/// Declared width and signedness of an integer scalar narrower than 32 bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntWidth {
    I8,
    U8,
    I16,
    U16,
}

impl IntWidth {
    pub fn bits(self) -> u32 {
        match self {
            IntWidth::I8 | IntWidth::U8 => 8,
            IntWidth::I16 | IntWidth::U16 => 16,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(self, IntWidth::I8 | IntWidth::I16)
    }

    /// `value` converted to this width and extended back to 32 bits, the way
    /// C converts an `int` argument to the parameter type
    pub fn wrap(self, value: i32) -> i32 {
        match self {
            IntWidth::I8 => value as i8 as i32,
            IntWidth::U8 => value as u8 as i32,
            IntWidth::I16 => value as i16 as i32,
            IntWidth::U16 => value as u16 as i32,
        }
    }
}

impl fmt::Display for IntWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntWidth::I8 => write!(f, "i8"),
            IntWidth::U8 => write!(f, "u8"),
            IntWidth::I16 => write!(f, "i16"),
            IntWidth::U16 => write!(f, "u16"),
        }
    }
}

/// A mapped C type: the canonical type plus the declared width of narrow
/// integer scalars
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeclaredType {
    pub ty: FfiType,
    pub width: Option<IntWidth>,
}

impl DeclaredType {
    pub fn new(ty: FfiType) -> Self {
        DeclaredType { ty, width: None }
    }
}

impl fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.width {
            Some(width) => write!(f, "{}", width),
            None => write!(f, "{}", self.ty),
        }
    }
}

/// Scalar base types before pointer declarators are applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Base {
    Void,
    Int8 { signed: bool },
    Int16 { signed: bool },
    Int32,
    Int64,
    Float32,
    Float64,
}

const QUALIFIERS: &[&str] = &[
    "const",
    "volatile",
    "restrict",
    "__restrict",
    "__restrict__",
    "register",
];

/// Type qualifier or storage word that does not change the canonical type
pub fn is_qualifier(word: &str) -> bool {
    QUALIFIERS.contains(&word)
}

/// Map a C type, given as its tokens (`["const", "uint8_t", "*"]`), to a
/// canonical type. On failure returns the offending spelling.
pub fn map_type(tokens: &[&str]) -> Result<FfiType, String> {
    map_declared(tokens).map(|declared| declared.ty)
}

/// Like [`map_type`], keeping the declared width of narrow integer scalars
pub fn map_declared(tokens: &[&str]) -> Result<DeclaredType, String> {
    let depth = tokens.iter().filter(|t| **t == "*").count();
    let words: Vec<&str> = tokens
        .iter()
        .copied()
        .filter(|t| *t != "*" && !QUALIFIERS.contains(t))
        .collect();

    let base = map_base(&words).ok_or_else(|| spelling(tokens))?;

    if depth == 0 {
        return Ok(match base {
            Base::Void => DeclaredType::new(FfiType::Void),
            Base::Int8 { signed } => DeclaredType {
                ty: FfiType::Int32,
                width: Some(if signed { IntWidth::I8 } else { IntWidth::U8 }),
            },
            Base::Int16 { signed } => DeclaredType {
                ty: FfiType::Int32,
                width: Some(if signed { IntWidth::I16 } else { IntWidth::U16 }),
            },
            Base::Int32 => DeclaredType::new(FfiType::Int32),
            Base::Int64 => DeclaredType::new(FfiType::Int64),
            Base::Float32 => DeclaredType::new(FfiType::Float32),
            Base::Float64 => DeclaredType::new(FfiType::Float64),
        });
    }

    let mut pointee = match base {
        Base::Void | Base::Int16 { .. } => Pointee::Opaque,
        Base::Int8 { .. } => Pointee::Byte,
        Base::Int32 => Pointee::Element(Box::new(FfiType::Int32)),
        Base::Int64 => Pointee::Element(Box::new(FfiType::Int64)),
        Base::Float32 => Pointee::Element(Box::new(FfiType::Float32)),
        Base::Float64 => Pointee::Element(Box::new(FfiType::Float64)),
    };
    for _ in 1..depth {
        pointee = Pointee::Element(Box::new(FfiType::Pointer(pointee)));
    }
    Ok(DeclaredType::new(FfiType::Pointer(pointee)))
}

fn spelling(tokens: &[&str]) -> String {
    tokens.join(" ").replace(" *", "*")
}

fn map_base(words: &[&str]) -> Option<Base> {
    if let [single] = words {
        let fixed = match *single {
            "int8_t" => Some(Base::Int8 { signed: true }),
            "uint8_t" => Some(Base::Int8 { signed: false }),
            "int16_t" => Some(Base::Int16 { signed: true }),
            "uint16_t" => Some(Base::Int16 { signed: false }),
            "int32_t" | "uint32_t" => Some(Base::Int32),
            "int64_t" | "uint64_t" | "size_t" | "ssize_t" | "intptr_t" | "uintptr_t"
            | "ptrdiff_t" | "off_t" => Some(Base::Int64),
            _ => None,
        };
        if fixed.is_some() {
            return fixed;
        }
    }

    let mut longs = 0;
    let mut has_char = false;
    let mut has_short = false;
    let mut has_int = false;
    let mut has_sign = false;
    let mut unsigned = false;
    let mut float = None;
    let mut void = false;

    for word in words {
        match *word {
            "long" => longs += 1,
            "char" => has_char = true,
            "short" => has_short = true,
            "int" => has_int = true,
            "signed" => has_sign = true,
            "unsigned" => {
                has_sign = true;
                unsigned = true;
            }
            "float" => float = Some(Base::Float32),
            "double" => float = Some(Base::Float64),
            "void" => void = true,
            _ => return None,
        }
    }

    if void {
        return (words.len() == 1).then_some(Base::Void);
    }
    if let Some(f) = float {
        // `long double` has no canonical counterpart
        return (words.len() == 1).then_some(f);
    }
    // Plain `char` is signed on the supported targets
    if has_char {
        let plain = longs == 0 && !has_short && !has_int;
        return plain.then_some(Base::Int8 { signed: !unsigned });
    }
    if has_short {
        return (longs == 0).then_some(Base::Int16 { signed: !unsigned });
    }
    match longs {
        0 if has_int || has_sign => Some(Base::Int32),
        1 | 2 => Some(Base::Int64),
        _ => None,
    }
}
