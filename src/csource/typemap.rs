use std::collections::HashMap;

use crate::typemap::{DataLayout, TypeMapper};
use crate::types::KilnType;

/// Semantic types to C type spellings.
#[derive(Debug, Default)]
pub struct CTypeMapper {
    cache: HashMap<KilnType, String>,
    layout: Option<DataLayout>,
}

impl CTypeMapper {
    pub fn new(layout: Option<DataLayout>) -> Self {
        Self { cache: HashMap::new(), layout }
    }
}

pub fn kiln_to_c(ty: &KilnType) -> String {
    match ty {
        KilnType::Int | KilnType::Enum(_) => "long long".into(),
        KilnType::Float => "double".into(),
        KilnType::Bool => "bool".into(),
        KilnType::String => "const char*".into(),
        KilnType::Void => "void".into(),
        KilnType::Array(_) => "KilnSlot*".into(),
        KilnType::Struct(name) => format!("{}*", c_ident(name)),
        KilnType::Fn(_, _) => "KilnClosure*".into(),
        KilnType::Optional(_) | KilnType::Result(_, _) => "KilnBox*".into(),
        KilnType::Future(_) => "void*".into(),
    }
}

impl TypeMapper for CTypeMapper {
    type Backend = String;

    fn map_uncached(&self, ty: &KilnType) -> String {
        kiln_to_c(ty)
    }

    fn cache(&mut self) -> &mut HashMap<KilnType, String> {
        &mut self.cache
    }

    fn layout(&self) -> Option<&DataLayout> {
        self.layout.as_ref()
    }

    fn is_integer(&self, backend: &String) -> bool {
        backend == "long long"
    }

    fn is_float(&self, backend: &String) -> bool {
        backend == "double"
    }
}

/// `KilnSlot` member that holds a value of `ty`.
pub fn slot_member(ty: &KilnType) -> &'static str {
    match ty {
        KilnType::Int | KilnType::Bool | KilnType::Enum(_) => "i",
        KilnType::Float => "f",
        _ => "p",
    }
}

/// Read a slot lvalue (`a[3]`, `__box[0]`) back as `ty`.
pub fn from_slot(slot: &str, ty: &KilnType) -> String {
    match ty {
        KilnType::Int | KilnType::Enum(_) => format!("{slot}.i"),
        KilnType::Float => format!("{slot}.f"),
        KilnType::Bool => format!("({slot}.i != 0)"),
        other => format!("({}){slot}.p", kiln_to_c(other)),
    }
}

/// Store `value` of type `ty` into a slot lvalue.
pub fn to_slot(slot: &str, value: &str, ty: &KilnType) -> String {
    match ty {
        KilnType::Int | KilnType::Bool | KilnType::Enum(_) => format!("{slot}.i = {value};"),
        KilnType::Float => format!("{slot}.f = {value};"),
        _ => format!("{slot}.p = (void*){value};"),
    }
}

/// `value` reinterpreted as the `long long` payload the boxing helpers take.
pub fn slot_bits(value: &str, ty: &KilnType) -> String {
    match ty {
        KilnType::Int | KilnType::Enum(_) => value.to_string(),
        KilnType::Bool => format!("(long long){value}"),
        KilnType::Float => format!("((KilnSlot){{ .f = {value} }}).i"),
        _ => format!("((KilnSlot){{ .p = (void*){value} }}).i"),
    }
}

/// Zero value of `ty`, used for default returns.
pub fn zero_value(ty: &KilnType) -> &'static str {
    match ty {
        KilnType::Int | KilnType::Enum(_) => "0LL",
        KilnType::Float => "0.0",
        KilnType::Bool => "false",
        _ => "NULL",
    }
}

const C_KEYWORDS: &[&str] = &[
    "auto", "bool", "break", "case", "char", "const", "continue", "default", "do", "double", "else", "enum",
    "extern", "float", "for", "goto", "if", "inline", "int", "long", "main", "register", "restrict", "return",
    "short", "signed", "sizeof", "static", "struct", "switch", "typedef", "union", "unsigned", "void",
    "volatile", "while", "NULL", "true", "false",
];

/// A source name usable as a C identifier (struct and field names).
pub fn c_ident(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) || C_KEYWORDS.contains(&out.as_str()) {
        out.insert(0, '_');
    }
    out
}

/// C string literal with the bytes of `s`. Non-printable bytes become octal
/// escapes, which (unlike `\x`) never swallow a following hex digit.
pub fn c_string_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for b in s.bytes() {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            b'?' => out.push_str("\\?"),
            0x20..=0x7e => out.push(b as char),
            other => out.push_str(&format!("\\{other:03o}")),
        }
    }
    out.push('"');
    out
}
