//! Ingest/retrieve orchestration over prober, transcoder and the two stores.

mod conversion_pipeline;

pub use conversion_pipeline::{ConversionPipeline, PipelineConfig};
