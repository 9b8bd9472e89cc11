//! # Code
//!
//! This module covers machine code generation for the hooks the engine installs

pub mod x86;
