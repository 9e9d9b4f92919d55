pub mod alerts;
pub mod batch;
pub mod cluster;
pub mod ledger;
pub mod location_pool;
pub mod pixel;
pub mod route_assigner;
pub mod sample_buffer;
pub mod sticker_classifier;
pub mod tablets;
pub mod temperature_policy;
