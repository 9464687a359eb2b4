//! Descriptor validation against the page.

use serde_json::json;

use crate::constants::BIDDER_CODE;
use crate::page::{PageEnvironment, Size};
use crate::params::BidRequestDescriptor;

/// Check a descriptor before it is offered to SpotX.
///
/// Returns `false` (and logs why) when the params are malformed, a mandatory
/// param is missing, or either slot element is absent from the page. Rejected
/// descriptors are left untouched. Accepted descriptors without an explicit
/// content size get one backfilled from the video slot.
pub fn is_valid(descriptor: &mut BidRequestDescriptor, page: &dyn PageEnvironment) -> bool {
    let params = match descriptor.spotx_params() {
        Ok(params) => params,
        Err(err) => {
            log::info!("{BIDDER_CODE}: video params is missing or is incorrect: {err:?}");
            return false;
        }
    };
    let video = params.video;

    let missing = video.missing_required();
    if !missing.is_empty() {
        log::info!(
            "{BIDDER_CODE}: channel_id, slot and/or video_slot are not present in bidder params (missing: {})",
            missing.join(", ")
        );
        return false;
    }

    let (Some(slot), Some(video_slot)) = (video.slot.as_deref(), video.video_slot.as_deref())
    else {
        return false;
    };

    let Some(container) = page.element(video_slot) else {
        log::info!("{BIDDER_CODE}: video_slot HTML node id does not exist on the page");
        return false;
    };

    if page.element(slot).is_none() {
        log::info!("{BIDDER_CODE}: slot HTML node id does not exist on the page");
        return false;
    }

    if video.content_width.is_none() || video.content_height.is_none() {
        let rendered = player_size(page, video_slot, container.size);

        if video.content_width.is_none() {
            descriptor.set_video_param("content_width", json!(rendered.width));
        }
        if video.content_height.is_none() {
            descriptor.set_video_param("content_height", json!(rendered.height));
        }
        log::debug!(
            "{BIDDER_CODE}: backfilled content size {}x{} for bid {}",
            rendered.width,
            rendered.height,
            descriptor.bid_id
        );
    }

    true
}

/// Size of the first `<video>` in the slot, else the slot container's size.
fn player_size(page: &dyn PageEnvironment, video_slot: &str, container: Size) -> Size {
    page.first_video_within(video_slot)
        .map_or(container, |video| video.size)
}
