//! The Gateway Publisher (§4.5): reflects plugin state into an external API
//! gateway's admin API.

pub mod publisher;

pub use publisher::{GatewayPublisher, HttpGatewayPublisher};
