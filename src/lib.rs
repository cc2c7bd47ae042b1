pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod market_data;
pub mod session;
pub mod telemetry;
pub mod transport;

pub use client::{logging_dispatcher, ClientFacade};
pub use error::{ClientError, ClientResult};
