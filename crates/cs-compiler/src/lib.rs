//! CleanSlate Filter List Compiler
//!
//! This crate compiles cosmetic filter rules into the descriptor form the
//! core engine evaluates.

pub mod compiler;
pub mod rules;

pub use compiler::Compiler;
pub use rules::{parse_filter_list, parse_rule_line, CosmeticRule, RuleKind};
