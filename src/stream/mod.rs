pub mod dedup;
pub mod filter;
pub mod idle;
pub mod sse;

pub use dedup::ReplayDetector;
pub use filter::TagFilter;
pub use idle::idle_guard;
pub use sse::json_line_stream;
