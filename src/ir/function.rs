//! Function container: the unit IR transforms run on.

use crate::common::target::Target;
use super::buffer::Buffer;
use super::stmt::Stmt;

/// A tile function: parameter buffers, a body, and the compilation target.
///
/// Parameter buffers seed the buffer-identity scope during analysis;
/// `Stmt::Block` allocations inside the body shadow them with stack
/// discipline.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub params: Vec<Buffer>,
    pub body: Stmt,
    pub target: Target,
}

impl Function {
    pub fn new(name: &str, params: Vec<Buffer>, body: Stmt, target: Target) -> Self {
        Function { name: name.to_string(), params, body, target }
    }
}
