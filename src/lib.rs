pub mod config;
pub mod connector;
pub mod frame;
pub mod ingest;
pub mod mapping;
pub mod math;
pub mod pipeline;
pub mod record;
pub mod retarget;
pub mod sink;
pub mod smooth;
pub mod stream;
