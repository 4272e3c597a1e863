//! The runtime ABI: every `__kiln_*` symbol the generated code may call, and
//! the source-level built-ins that map onto them. Both backends declare their
//! imports from these tables, so the two can never disagree on a signature.

use crate::types::KilnType;

/// C-level parameter and return classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abi {
    Int,
    Float,
    /// Passed as a C `int`.
    Bool,
    /// `const char*`
    Str,
    /// `void*`
    Ptr,
    Void,
}

impl Abi {
    pub fn c_type(self) -> &'static str {
        match self {
            Abi::Int => "long long",
            Abi::Float => "double",
            Abi::Bool => "int",
            Abi::Str => "const char*",
            Abi::Ptr => "void*",
            Abi::Void => "void",
        }
    }

    /// Semantic type a value of this class has once back in generated code.
    pub fn semantic(self) -> KilnType {
        match self {
            Abi::Int => KilnType::Int,
            Abi::Float => KilnType::Float,
            Abi::Bool => KilnType::Bool,
            Abi::Str => KilnType::String,
            Abi::Ptr => KilnType::Int,
            Abi::Void => KilnType::Void,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeFn {
    pub symbol: &'static str,
    pub params: &'static [Abi],
    pub ret: Abi,
}

const fn rt(symbol: &'static str, params: &'static [Abi], ret: Abi) -> RuntimeFn {
    RuntimeFn { symbol, params, ret }
}

use Abi::{Bool, Float, Int, Ptr, Str, Void};

pub const RUNTIME: &[RuntimeFn] = &[
    // Memory and process
    rt("__kiln_alloc", &[Int], Ptr),
    rt("__kiln_free", &[Ptr], Void),
    rt("__kiln_panic", &[Str], Void),
    rt("__kiln_exit", &[Int], Void),
    rt("__kiln_assert", &[Bool, Str], Void),
    // Printing
    rt("__kiln_print_int", &[Int], Void),
    rt("__kiln_print_float", &[Float], Void),
    rt("__kiln_print_bool", &[Bool], Void),
    rt("__kiln_print_str", &[Str], Void),
    rt("__kiln_print_newline", &[], Void),
    // Math
    rt("__kiln_min_int", &[Int, Int], Int),
    rt("__kiln_max_int", &[Int, Int], Int),
    rt("__kiln_abs_int", &[Int], Int),
    rt("__kiln_min_float", &[Float, Float], Float),
    rt("__kiln_max_float", &[Float, Float], Float),
    rt("__kiln_abs_float", &[Float], Float),
    rt("__kiln_sqrt", &[Float], Float),
    rt("__kiln_floor", &[Float], Float),
    rt("__kiln_ceil", &[Float], Float),
    rt("__kiln_pow", &[Float, Float], Float),
    rt("__kiln_div", &[Int, Int], Int),
    rt("__kiln_rem", &[Int, Int], Int),
    // System
    rt("__kiln_sleep_ms", &[Int], Void),
    rt("__kiln_rand", &[], Int),
    rt("__kiln_time_now", &[], Int),
    rt("__kiln_system", &[Str], Int),
    // Files
    rt("__kiln_read_file", &[Str], Str),
    rt("__kiln_write_file", &[Str, Str], Bool),
    rt("__kiln_append_file", &[Str, Str], Bool),
    rt("__kiln_file_exists", &[Str], Bool),
    rt("__kiln_delete_file", &[Str], Bool),
    // Strings
    rt("__kiln_string_eq", &[Str, Str], Bool),
    rt("__kiln_string_len", &[Str], Int),
    rt("__kiln_string_concat", &[Str, Str], Str),
    rt("__kiln_str_upper", &[Str], Str),
    rt("__kiln_str_lower", &[Str], Str),
    rt("__kiln_str_trim", &[Str], Str),
    rt("__kiln_str_contains", &[Str, Str], Bool),
    rt("__kiln_substring", &[Str, Int, Int], Str),
    rt("__kiln_int_to_string", &[Int], Str),
    rt("__kiln_float_to_string", &[Float], Str),
    rt("__kiln_string_to_int", &[Str], Int),
    // Boxed values (payload is one 8-byte slot)
    rt("__kiln_some", &[Int], Ptr),
    rt("__kiln_ok", &[Int], Ptr),
    rt("__kiln_err", &[Int], Ptr),
    // Closures and tasks
    rt("__kiln_closure_new", &[Ptr, Ptr], Ptr),
    rt("__kiln_spawn", &[Ptr, Ptr], Ptr),
    rt("__kiln_await", &[Ptr], Ptr),
];

pub fn runtime_fn(symbol: &str) -> Option<&'static RuntimeFn> {
    RUNTIME.iter().find(|f| f.symbol == symbol)
}

/// A source-level built-in with a fixed signature.
#[derive(Debug, Clone, Copy)]
pub struct Builtin {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub symbol: &'static str,
}

const fn bi(name: &'static str, aliases: &'static [&'static str], symbol: &'static str) -> Builtin {
    Builtin { name, aliases, symbol }
}

pub const TABLE: &[Builtin] = &[
    bi("exit", &["System::exit"], "__kiln_exit"),
    bi("panic", &[], "__kiln_panic"),
    bi("sleep", &["Time::sleep"], "__kiln_sleep_ms"),
    bi("rand", &[], "__kiln_rand"),
    bi("time_now", &["Time::now"], "__kiln_time_now"),
    bi("system", &["System::exec"], "__kiln_system"),
    bi("read_file", &["File::read"], "__kiln_read_file"),
    bi("write_file", &["File::write"], "__kiln_write_file"),
    bi("append_file", &["File::append"], "__kiln_append_file"),
    bi("file_exists", &["File::exists"], "__kiln_file_exists"),
    bi("delete_file", &["File::delete"], "__kiln_delete_file"),
    bi("str_upper", &["String::upper"], "__kiln_str_upper"),
    bi("str_lower", &["String::lower"], "__kiln_str_lower"),
    bi("str_trim", &["String::trim"], "__kiln_str_trim"),
    bi("str_contains", &["String::contains"], "__kiln_str_contains"),
    bi("substring", &["String::substring"], "__kiln_substring"),
    bi("int_to_string", &[], "__kiln_int_to_string"),
    bi("float_to_string", &[], "__kiln_float_to_string"),
    bi("string_to_int", &[], "__kiln_string_to_int"),
    bi("sqrt", &["Math::sqrt"], "__kiln_sqrt"),
    bi("floor", &["Math::floor"], "__kiln_floor"),
    bi("ceil", &["Math::ceil"], "__kiln_ceil"),
    bi("pow", &["Math::pow"], "__kiln_pow"),
];

/// Resolves a call name (plain or `Module::function`) to its runtime entry.
pub fn lookup(name: &str) -> Option<&'static RuntimeFn> {
    TABLE
        .iter()
        .find(|b| b.name == name || b.aliases.contains(&name))
        .and_then(|b| runtime_fn(b.symbol))
}

/// Built-ins whose lowering depends on argument types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Special {
    Print,
    Println,
    Assert,
    Min,
    Max,
    Abs,
    Len,
    TypeOf,
    Some,
    Ok,
    Err,
}

pub fn special(name: &str) -> Option<Special> {
    Some(match name {
        "print" => Special::Print,
        "println" => Special::Println,
        "assert" => Special::Assert,
        "min" => Special::Min,
        "max" => Special::Max,
        "abs" => Special::Abs,
        "len" => Special::Len,
        "typeof" => Special::TypeOf,
        "some" => Special::Some,
        "ok" => Special::Ok,
        "err" => Special::Err,
        _ => return None,
    })
}

pub fn is_builtin(name: &str) -> bool {
    special(name).is_some() || lookup(name).is_some()
}
