//! Business logic services
//!
//! This module contains the request handlers separated from HTTP concerns.
//! Services are stateless and receive the stores and device client they
//! operate on, so they can be tested with mocks.

pub mod config_access;
pub mod device;
pub mod marker;
pub mod pending;
pub mod permission;
pub mod system_status;
pub mod wifi;
