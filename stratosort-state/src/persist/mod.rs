//! Write path: atomic file replacement, a single-writer chain, debounce, and
//! health tracking.

pub mod atomic;
pub mod coalescer;
pub mod health;
pub mod serializer;

pub use atomic::AtomicWriter;
pub use coalescer::{SaveCoalescer, SaveRequest};
pub use health::{SaveErrorRecord, SaveHealth, SaveHealthSnapshot};
pub use serializer::WriteSerializer;
