//! Integration test common infrastructure.
//!
//! A [`TestGateway`] runs the real gateway in-process against a scripted
//! [`MockBackend`]; [`TestClient`] speaks IRC to it over loopback.

pub mod client;
pub mod gateway;
pub mod mock_backend;

#[allow(unused_imports)]
pub use client::TestClient;
#[allow(unused_imports)]
pub use gateway::{TestGateway, test_config};
#[allow(unused_imports)]
pub use mock_backend::{Call, ConnectMode, MockBackend};
