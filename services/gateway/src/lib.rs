pub mod app;
pub mod router;

#[cfg(test)]
mod tests;

pub use app::{build_backend, build_supervisor};
pub use router::{create_router, AppState, StatusResponse};
