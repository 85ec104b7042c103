//! HTTP layer: router and upgrade endpoints

pub mod routes;

pub use routes::build_router;
