pub mod counter;
pub mod error;

pub use counter::{AtomicCounter, CounterSnapshot};
pub use error::{CounterError, Result};
