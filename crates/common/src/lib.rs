//! Types shared by the auth and gateway crates.

pub mod panic;

pub use panic::{OnPanic, PanicReport};
