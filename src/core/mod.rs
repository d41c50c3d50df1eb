//! Core onboarding logic

pub mod announcement;
pub mod error;
pub mod machine;
pub mod scanner;
pub mod state;
pub mod types;
