//! SpotX outstream video bidder adapter.
//!
//! Translates header-bidding bid request descriptors into a SpotX OpenRTB 2.3
//! request, interprets the SpotX response into framework bids, and renders
//! winning outstream bids by appending the SpotX player script to the page.
//!
//! # Modules
//!
//! - [`adapter`]: The `BidderAdapter` trait and its SpotX implementation
//! - [`constants`]: Bidder code, endpoints and protocol defaults
//! - [`error`]: Error types and error handling utilities
//! - [`openrtb`]: Request and response wire types
//! - [`page`]: Page environment abstraction and an in-memory implementation
//! - [`params`]: Bid request descriptors and bidder params
//! - [`renderer`]: Outstream player rendering
//! - [`request`]: Request builder
//! - [`response`]: Response interpreter
//! - [`settings`]: Configuration management and validation
//! - [`test_support`]: Testing utilities and fixtures
//! - [`validation`]: Descriptor validation

pub mod adapter;
pub mod constants;
pub mod error;
pub mod openrtb;
pub mod page;
pub mod params;
pub mod renderer;
pub mod request;
pub mod response;
pub mod settings;
pub mod validation;

pub use adapter::{register_adapter, BidderAdapter, SpotxAdapter};
pub use error::AdapterError;
pub use settings::Settings;
