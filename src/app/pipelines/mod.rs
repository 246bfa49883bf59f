pub mod contact_pipeline;

pub use contact_pipeline::ContactPipeline;
