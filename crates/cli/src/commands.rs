//! Adapter commands run against JSON fixtures.
//!
//! A page fixture is a serialized `StaticPage`: the page location, its HTML,
//! optional iframe documents and rendered sizes. Bids are a JSON array of
//! bid request descriptors in the host framework's camelCase shape.

use std::fs;
use std::path::Path;

use serde_json::{json, Value};
use spotx_adapter::adapter::{BidderAdapter, SpotxAdapter};
use spotx_adapter::page::{InjectionTarget, StaticPage};
use spotx_adapter::params::BidRequestDescriptor;
use spotx_adapter::renderer::RenderOutcome;
use spotx_adapter::request::{AuctionContext, OutboundRequest};
use spotx_adapter::Settings;

use crate::error::CliError;

/// Load settings from a TOML file, or the embedded defaults when none is
/// given. Environment overrides apply in both cases.
pub fn load_settings(file: Option<&Path>) -> Result<Settings, CliError> {
    let settings = match file {
        Some(path) => {
            log::debug!("Loading settings from {}", path.display());
            let content = fs::read_to_string(path)?;
            Settings::from_toml(&content)?
        }
        None => Settings::new()?,
    };
    Ok(settings)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| CliError::Input(format!("Failed to parse {}: {e}", path.display())))
}

/// Run the validator on every descriptor.
///
/// Returns one entry per descriptor with its verdict and its params after
/// backfilling.
pub fn validate(settings: Settings, page: &Path, bids: &Path) -> Result<Value, CliError> {
    let adapter = SpotxAdapter::new(settings);
    let page: StaticPage = read_json(page)?;
    let mut descriptors: Vec<BidRequestDescriptor> = read_json(bids)?;

    let verdicts = descriptors
        .iter_mut()
        .map(|descriptor| {
            let valid = adapter.is_valid(descriptor, &page);
            json!({
                "bidId": descriptor.bid_id,
                "valid": valid,
                "params": descriptor.params,
            })
        })
        .collect();

    Ok(Value::Array(verdicts))
}

/// Validate the descriptors and build the outbound request for the valid
/// ones.
pub fn build(
    settings: Settings,
    page: &Path,
    bids: &Path,
    context: Option<&Path>,
) -> Result<Value, CliError> {
    let adapter = SpotxAdapter::new(settings);
    let page: StaticPage = read_json(page)?;
    let descriptors: Vec<BidRequestDescriptor> = read_json(bids)?;
    let mut context: AuctionContext = match context {
        Some(path) => read_json(path)?,
        None => AuctionContext::default(),
    };
    if context.bids.is_empty() {
        context.bids.clone_from(&descriptors);
    }

    let valid: Vec<_> = descriptors
        .into_iter()
        .filter_map(|mut descriptor| {
            if adapter.is_valid(&mut descriptor, &page) {
                Some(descriptor)
            } else {
                log::warn!("Dropping invalid bid request {}", descriptor.bid_id);
                None
            }
        })
        .collect();

    let request = adapter.build_requests(&valid, &context, &page)?;
    Ok(serde_json::to_value(&request)?)
}

/// Interpret a response body against a previously built request.
pub fn interpret(settings: Settings, request: &Path, response: &Path) -> Result<Value, CliError> {
    let adapter = SpotxAdapter::new(settings);
    let request: OutboundRequest = read_json(request)?;
    let body = fs::read(response)?;

    let bids = adapter.interpret_response(&body, &request)?;
    Ok(serde_json::to_value(&bids)?)
}

/// Render the first bid that carries a renderer and return the rewritten
/// document the player script landed in.
pub fn render(
    settings: Settings,
    page: &Path,
    request: &Path,
    response: &Path,
) -> Result<String, CliError> {
    let adapter = SpotxAdapter::new(settings);
    let mut page: StaticPage = read_json(page)?;
    let request: OutboundRequest = read_json(request)?;
    let body = fs::read(response)?;

    let bids = adapter.interpret_response(&body, &request)?;
    let (bid, renderer) = bids
        .iter()
        .find_map(|bid| bid.renderer.as_ref().map(|renderer| (bid, renderer)))
        .ok_or_else(|| CliError::Adapter("Response has no renderable bid".to_string()))?;

    let outcome = renderer.render(bid, &mut page, None)?;
    match outcome {
        RenderOutcome::Injected(ad) => match &ad.target {
            InjectionTarget::Element(_) => Ok(page.document),
            InjectionTarget::IframeBody(id) => page
                .frames
                .remove(id)
                .ok_or_else(|| CliError::Adapter(format!("iframe '{id}' has no document"))),
        },
        RenderOutcome::Delegated => Err(CliError::Adapter(
            "Bid was handed to a custom outstream function".to_string(),
        )),
    }
}
