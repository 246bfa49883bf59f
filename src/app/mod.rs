// Application layer: concrete pipelines wiring sources, transforms and storage.

pub mod pipelines;
