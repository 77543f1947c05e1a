pub mod billing;
pub mod clock;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod status;
pub mod timer;
pub mod wire;
