//! The optimizer: two IR-to-IR passes ([`condense`] and [`loops`]) plus a
//! fixed-point [`driver`] that alternates them until the content hash stops
//! changing.

pub mod condense;
pub mod driver;
pub mod loops;

pub use condense::condense;
pub use driver::{optimize, OptLevel, DEFAULT_MAX_ITERATIONS};
pub use loops::recognize_loops;
