//! Bidder adapter surface exposed to the host framework.

use std::sync::Arc;

use error_stack::Report;

use crate::constants::BIDDER_CODE;
use crate::error::AdapterError;
use crate::page::PageEnvironment;
use crate::params::BidRequestDescriptor;
use crate::request::{build_requests, AuctionContext, OutboundRequest};
use crate::response::{interpret_response, InterpretedBid, MediaType};
use crate::settings::Settings;
use crate::validation;

/// A user sync pixel or iframe the host should load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserSync {
    Image(String),
    Iframe(String),
}

/// Trait implemented by bidder adapters.
pub trait BidderAdapter: Send + Sync {
    /// Bidder code publishers use in their ad unit config.
    fn code(&self) -> &str;

    /// Alternative codes that resolve to this adapter.
    fn aliases(&self) -> &[&'static str] {
        &[]
    }

    fn supported_media_types(&self) -> &[MediaType];

    /// Check if this adapter supports a specific media type.
    fn supports_media_type(&self, media_type: &MediaType) -> bool {
        self.supported_media_types().contains(media_type)
    }

    /// Check a descriptor, possibly backfilling params from the page.
    fn is_valid(&self, descriptor: &mut BidRequestDescriptor, page: &dyn PageEnvironment) -> bool;

    /// Build the request for the valid descriptors of one auction.
    ///
    /// # Errors
    ///
    /// Returns an error when no request can be built from the descriptors.
    fn build_requests(
        &self,
        descriptors: &[BidRequestDescriptor],
        context: &AuctionContext,
        page: &dyn PageEnvironment,
    ) -> Result<OutboundRequest, Report<AdapterError>>;

    /// Parse the body returned for `request`.
    ///
    /// # Errors
    ///
    /// Returns an error when the body cannot be parsed.
    fn interpret_response(
        &self,
        body: &[u8],
        request: &OutboundRequest,
    ) -> Result<Vec<InterpretedBid>, Report<AdapterError>>;

    /// User syncs to run after the auction.
    fn user_syncs(&self) -> Vec<UserSync> {
        Vec::new()
    }

    /// Called when the auction timed out before the adapter answered.
    fn on_timeout(&self, timed_out: &[BidRequestDescriptor]) {
        log::debug!("{}: {} bid request(s) timed out", self.code(), timed_out.len());
    }
}

/// SpotX implementation of [`BidderAdapter`].
pub struct SpotxAdapter {
    settings: Settings,
}

impl SpotxAdapter {
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

impl BidderAdapter for SpotxAdapter {
    fn code(&self) -> &str {
        &self.settings.adapter.bidder_code
    }

    fn supported_media_types(&self) -> &[MediaType] {
        &[MediaType::Banner, MediaType::Video]
    }

    fn is_valid(&self, descriptor: &mut BidRequestDescriptor, page: &dyn PageEnvironment) -> bool {
        validation::is_valid(descriptor, page)
    }

    fn build_requests(
        &self,
        descriptors: &[BidRequestDescriptor],
        context: &AuctionContext,
        page: &dyn PageEnvironment,
    ) -> Result<OutboundRequest, Report<AdapterError>> {
        build_requests(&self.settings, descriptors, context, page)
    }

    fn interpret_response(
        &self,
        body: &[u8],
        request: &OutboundRequest,
    ) -> Result<Vec<InterpretedBid>, Report<AdapterError>> {
        interpret_response(&self.settings, body, request)
    }
}

/// Register the SpotX adapter if it is enabled in settings.
#[must_use]
pub fn register_adapter(settings: &Settings) -> Vec<Arc<dyn BidderAdapter>> {
    let mut adapters: Vec<Arc<dyn BidderAdapter>> = Vec::new();

    if settings.adapter.enabled {
        log::info!(
            "Registering {BIDDER_CODE} adapter (code: {}, endpoint: {})",
            settings.adapter.bidder_code,
            settings.adapter.endpoint
        );
        adapters.push(Arc::new(SpotxAdapter::new(settings.clone())));
    } else {
        log::debug!("{BIDDER_CODE} adapter is disabled");
    }

    adapters
}
