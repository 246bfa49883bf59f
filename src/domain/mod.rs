// Domain layer: core models and ports (interfaces).

pub mod model;
pub mod ports;
pub mod table;
pub mod value;

pub use model::{ExtractedBatch, RawTranscript, Record, TimeWindow, TransformResult};
pub use table::Table;
pub use value::{Timestamp, Value};
