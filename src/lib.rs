//! Compiler and stack-machine VM core for a line-numbered BASIC dialect.

#[macro_use]
extern crate lazy_static;

pub mod bytecode;
pub mod compiler;
pub mod config;
pub mod console;
pub mod error;
pub mod functions;
pub mod graphics;
pub mod lexer;
pub mod program;
pub mod symtab;
pub mod timer;
pub mod value;
pub mod vm;
