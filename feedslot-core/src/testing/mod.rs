//! Testing utilities and mocks
//!
//! - `MockGateway`: scripted broker gateway with call recording
//! - Builders for bars, positions and fast-cycling configs

pub mod helpers;
pub mod mock_gateway;

pub use helpers::*;
pub use mock_gateway::MockGateway;
