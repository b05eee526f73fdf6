//! # Code
//!
//! Instruction encoding and relocation

pub mod x64;
