//! Shared fixtures for gateway integration tests.

pub mod mock_servers;
