//! Configuration types shared by the notary library and service.

mod base;
mod pipeline;
mod service;
mod store;

pub use base::ValidationError;
pub use pipeline::PipelineConfig;
pub use service::ServiceConfig;
pub use store::StoreConfig;
