//! Class-file level structures: the byte reader, interned symbols, the raw
//! class-file parser and the attribute readers.

pub mod attributes;
pub mod builder;
pub mod parser;
pub mod reader;
mod symbol;

pub use attributes::*;
pub use parser::{ClassFile, MemberInfo, parse_class_file};
pub use reader::BytecodeReader;
pub use symbol::Symbol;
