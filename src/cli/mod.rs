//! CLI Module
//!
//! Exit codes for scripted and supervised runs

pub mod exit_codes;

pub use exit_codes::{exit_code_description, exit_code_for, finish, print_exit_codes, ExitCodes};
