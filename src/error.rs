//! Error-code contract shared by every error enum in the crate.
//!
//! DESIGN
//! ======
//! UI layers map failures by stable string code rather than by matching on
//! Rust enum variants, so each module error reports an `E_*` code and
//! whether retrying the same call could plausibly succeed.

pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}
