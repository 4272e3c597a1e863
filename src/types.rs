use std::fmt;

use serde::{Deserialize, Serialize};

/// Semantic type attached to every expression by the upstream type checker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KilnType {
    Int,
    Float,
    Bool,
    String,
    Void,
    Array(Box<KilnType>),
    Struct(String),
    Enum(String),
    Fn(Vec<KilnType>, Box<KilnType>),
    Optional(Box<KilnType>),
    Result(Box<KilnType>, Box<KilnType>),
    Future(Box<KilnType>),
}

impl KilnType {
    pub fn array(elem: KilnType) -> Self {
        KilnType::Array(Box::new(elem))
    }

    pub fn func(params: Vec<KilnType>, ret: KilnType) -> Self {
        KilnType::Fn(params, Box::new(ret))
    }

    pub fn future(inner: KilnType) -> Self {
        KilnType::Future(Box::new(inner))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, KilnType::Void)
    }

    /// Types represented by a pointer (or a pointer-sized handle) at run time.
    pub fn is_heap(&self) -> bool {
        !matches!(
            self,
            KilnType::Int | KilnType::Float | KilnType::Bool | KilnType::Void | KilnType::Enum(_)
        )
    }

    /// Element type of an array, `None` for anything else.
    pub fn element(&self) -> Option<&KilnType> {
        match self {
            KilnType::Array(elem) => Some(elem),
            _ => None,
        }
    }

    /// Resolved type of a future, `None` for anything else.
    pub fn awaited(&self) -> Option<&KilnType> {
        match self {
            KilnType::Future(inner) => Some(inner),
            _ => None,
        }
    }
}

impl fmt::Display for KilnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KilnType::Int => write!(f, "int"),
            KilnType::Float => write!(f, "float"),
            KilnType::Bool => write!(f, "bool"),
            KilnType::String => write!(f, "string"),
            KilnType::Void => write!(f, "void"),
            KilnType::Array(elem) => write!(f, "[{elem}]"),
            KilnType::Struct(name) | KilnType::Enum(name) => write!(f, "{name}"),
            KilnType::Fn(params, ret) => {
                write!(f, "fn(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ") -> {ret}")
            }
            KilnType::Optional(inner) => write!(f, "{inner}?"),
            KilnType::Result(ok, err) => write!(f, "Result<{ok}, {err}>"),
            KilnType::Future(inner) => write!(f, "Future<{inner}>"),
        }
    }
}
