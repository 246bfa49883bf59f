pub mod contacts;
pub mod etl;
pub mod persist;
pub mod registry;
pub mod spec;
pub mod transcript;
pub mod transformer;
pub mod transforms;

pub use crate::domain::model::{Record, TransformResult};
pub use crate::domain::ports::{ConfigProvider, Pipeline, RecordSource, Storage};
pub use crate::utils::error::Result;
