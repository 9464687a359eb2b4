//! Outstream video renderer.
//!
//! Video bids carry a [`Renderer`]. When the host decides to display the bid it
//! calls [`Renderer::render`], which either hands the bid to a publisher
//! supplied [`OutstreamFunction`] or appends the SpotX player script to the
//! page.

use std::fmt;
use std::sync::Arc;

use error_stack::Report;
use serde::Serialize;

use crate::constants::{AD_DONE_FUNCTION_NAME, DATA_ATTRIBUTE_PREFIX};
use crate::error::AdapterError;
use crate::page::{InjectionTarget, PageEnvironment};
use crate::params::OutstreamOptions;
use crate::response::InterpretedBid;

/// Publisher supplied render hook.
#[derive(Clone)]
pub struct OutstreamFunction(Arc<dyn Fn(&InterpretedBid) + Send + Sync>);

impl OutstreamFunction {
    pub fn new(render: impl Fn(&InterpretedBid) + Send + Sync + 'static) -> Self {
        Self(Arc::new(render))
    }

    pub fn call(&self, bid: &InterpretedBid) {
        (self.0)(bid);
    }
}

impl fmt::Debug for OutstreamFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OutstreamFunction(..)")
    }
}

/// Called by the player once it knows whether an ad was found.
pub type AdDoneCallback = Box<dyn FnMut(bool) + Send>;

fn default_ad_done() -> AdDoneCallback {
    Box::new(|ad_found| {
        if ad_found {
            log::info!("[SPOTX][renderer] ad playing here");
        } else {
            log::info!("[SPOTX][renderer] code to place backup ad request here");
        }
    })
}

/// A `<script>` element to be appended to the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptElement {
    pub src: String,
    /// Attributes in insertion order, excluding `type` and `src`.
    pub attributes: Vec<(String, String)>,
}

impl ScriptElement {
    #[must_use]
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            attributes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attribute(name, value);
        self
    }

    /// Set an attribute, replacing any previous value.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(n, _)| *n == name) {
            Some(existing) => existing.1 = value,
            None => self.attributes.push((name, value)),
        }
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Serialize as HTML markup.
    #[must_use]
    pub fn to_html(&self) -> String {
        let mut html = format!(
            "<script type=\"text/javascript\" src=\"{}\"",
            escape_attribute(&self.src)
        );
        for (name, value) in &self.attributes {
            html.push_str(&format!(" {}=\"{}\"", name, escape_attribute(value)));
        }
        html.push_str("></script>");
        html
    }
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Override keys become attribute names, so only `[A-Za-z0-9_-]` is allowed.
fn is_attribute_suffix(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Player lifecycle events reported back by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererEvent {
    Impression,
    Loaded,
    Ended,
}

#[derive(Debug, Clone, Serialize)]
pub struct RendererConfig {
    pub ad_text: String,
    pub player_width: u32,
    pub player_height: u32,
    pub content_page_url: String,
    pub outstream_static: bool,
    pub ad_mute: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outstream_options: Option<OutstreamOptions>,
    #[serde(skip)]
    pub outstream_function: Option<OutstreamFunction>,
}

/// Result of a render call.
pub enum RenderOutcome {
    /// The publisher's outstream function handled the bid.
    Delegated,
    /// The player script was appended to the page.
    Injected(RenderedAd),
}

impl fmt::Debug for RenderOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderOutcome::Delegated => f.write_str("Delegated"),
            RenderOutcome::Injected(ad) => f.debug_tuple("Injected").field(ad).finish(),
        }
    }
}

/// A player script placed on the page, with the callback bound to it.
pub struct RenderedAd {
    pub script: ScriptElement,
    pub target: InjectionTarget,
    ad_done: AdDoneCallback,
}

impl RenderedAd {
    /// Forward the player's ad-done notification to this render's callback.
    pub fn ad_done(&mut self, ad_found: bool) {
        (self.ad_done)(ad_found);
    }
}

impl fmt::Debug for RenderedAd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderedAd")
            .field("script", &self.script)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// Renderer attached to outstream video bids.
#[derive(Debug, Clone, Serialize)]
pub struct Renderer {
    /// Base URL the channel id and `.js` suffix are appended to.
    pub player_base_url: String,
    pub config: RendererConfig,
}

impl Renderer {
    #[must_use]
    pub fn new(player_base_url: impl Into<String>, config: RendererConfig) -> Self {
        Self {
            player_base_url: player_base_url.into(),
            config,
        }
    }

    /// Log a player lifecycle event.
    pub fn handle_event(&self, event: RendererEvent) {
        match event {
            RendererEvent::Impression => log::info!("SpotX outstream video impression event"),
            RendererEvent::Loaded => log::info!("SpotX outstream video loaded event"),
            RendererEvent::Ended => log::info!("SpotX outstream renderer video event"),
        }
    }

    /// Build the player script for a bid without touching the page.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Render`] when the bid has no VAST URL.
    pub fn player_script(&self, bid: &InterpretedBid) -> Result<ScriptElement, Report<AdapterError>> {
        let vast_url = bid.vast_url.as_deref().ok_or_else(|| {
            Report::new(AdapterError::Render {
                message: format!("bid {} has no VAST URL", bid.request_id),
            })
        })?;

        let config = &self.config;
        let attr = |name: &str| format!("{DATA_ATTRIBUTE_PREFIX}{name}");

        let mut script = ScriptElement::new(format!(
            "{}{}.js",
            self.player_base_url, bid.channel_id
        ))
        .with_attribute(attr("channel_id"), bid.channel_id.clone())
        .with_attribute(attr("vast_url"), vast_url)
        .with_attribute(attr("content_width"), config.player_width.to_string())
        .with_attribute(attr("content_height"), config.player_height.to_string())
        .with_attribute(attr("content_page_url"), config.content_page_url.clone())
        .with_attribute(attr("ad_done_function"), AD_DONE_FUNCTION_NAME);

        let muted = config
            .outstream_options
            .as_ref()
            .and_then(|options| options.ad_mute)
            .unwrap_or(config.ad_mute);
        if muted {
            script.set_attribute(attr("ad_mute"), "1");
        }

        if config.outstream_static {
            script.set_attribute(attr("ad_unit"), "instream");
            script.set_attribute(attr("ad_skippable"), "0");
            script.set_attribute(attr("custom_skin"), "1");
        } else {
            script.set_attribute(attr("ad_unit"), "incontent");
            script.set_attribute(attr("collapse"), "0");
        }

        script.set_attribute(attr("autoplay"), "1");
        script.set_attribute(attr("video_slot_can_autoplay"), "1");

        if let Some(options) = &config.outstream_options {
            if options.playersize_auto_adapt == Some(true) {
                script.set_attribute(attr("playersize_auto_adapt"), "1");
            }
            let mut overrides: Vec<_> = options.custom_override.iter().collect();
            overrides.sort();
            for (name, value) in overrides {
                if is_attribute_suffix(name) {
                    script.set_attribute(attr(name.as_str()), value.clone());
                } else {
                    log::warn!("[SPOTX][renderer] ignoring custom_override key {name:?}");
                }
            }
        }

        Ok(script)
    }

    /// Resolve where the player script goes.
    ///
    /// A configured `in_iframe` id wins when it names an iframe on the page;
    /// anything else falls through to the bid's video slot.
    pub fn target(&self, bid: &InterpretedBid, page: &dyn PageEnvironment) -> InjectionTarget {
        let iframe = self
            .config
            .outstream_options
            .as_ref()
            .and_then(|options| options.in_iframe.as_deref());

        if let Some(id) = iframe {
            match page.element(id) {
                Some(element) if element.is_iframe() => {
                    return InjectionTarget::IframeBody(id.to_string());
                }
                Some(element) => log::debug!(
                    "in_iframe '{id}' is a <{}>, rendering into the video slot",
                    element.tag_name
                ),
                None => log::debug!("in_iframe '{id}' not found, rendering into the video slot"),
            }
        }

        InjectionTarget::Element(bid.video_slot.clone())
    }

    /// Render the bid.
    ///
    /// `ad_done` is bound to this render only; `None` installs a callback that
    /// logs whether an ad was found.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Render`] when the player script cannot be built
    /// or appended to the page. The failure is also logged.
    pub fn render(
        &self,
        bid: &InterpretedBid,
        page: &mut dyn PageEnvironment,
        ad_done: Option<AdDoneCallback>,
    ) -> Result<RenderOutcome, Report<AdapterError>> {
        if let Some(outstream_function) = &self.config.outstream_function {
            outstream_function.call(bid);
            return Ok(RenderOutcome::Delegated);
        }

        log::info!("[SPOTX][renderer] Handle SpotX outstream/inbanner renderer");

        let result = self.player_script(bid).and_then(|script| {
            let target = self.target(bid, page);
            page.append_script(&target, &script)?;
            Ok((script, target))
        });

        match result {
            Ok((script, target)) => Ok(RenderOutcome::Injected(RenderedAd {
                script,
                target,
                ad_done: ad_done.unwrap_or_else(default_ad_done),
            })),
            Err(err) => {
                log::error!("[SPOTX][renderer] failed to render outstream player: {err:?}");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::StaticPage;
    use crate::test_support::tests::{outstream_bid, publisher_page};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    fn renderer(config: RendererConfig) -> Renderer {
        Renderer::new("https://js.spotx.tv/easi/v1/", config)
    }

    fn base_config() -> RendererConfig {
        RendererConfig {
            ad_text: "SpotX Outstream Video Ad via Prebid.js".to_string(),
            player_width: 640,
            player_height: 360,
            content_page_url: "https://publisher.example/article".to_string(),
            outstream_static: false,
            ad_mute: false,
            outstream_options: None,
            outstream_function: None,
        }
    }

    #[test]
    fn player_script_sets_incontent_attributes() {
        let bid = outstream_bid();
        let script = renderer(base_config())
            .player_script(&bid)
            .expect("should build script");

        assert_eq!(script.src, "https://js.spotx.tv/easi/v1/85394.js");
        assert_eq!(script.attribute("data-spotx_channel_id"), Some("85394"));
        assert_eq!(
            script.attribute("data-spotx_vast_url"),
            Some("https://search.spotxchange.com/ad/vast.html?key=k1")
        );
        assert_eq!(script.attribute("data-spotx_content_width"), Some("640"));
        assert_eq!(script.attribute("data-spotx_content_height"), Some("360"));
        assert_eq!(
            script.attribute("data-spotx_content_page_url"),
            Some("https://publisher.example/article")
        );
        assert_eq!(
            script.attribute("data-spotx_ad_done_function"),
            Some("mySpotXAdDoneFunction")
        );
        assert_eq!(script.attribute("data-spotx_ad_unit"), Some("incontent"));
        assert_eq!(script.attribute("data-spotx_collapse"), Some("0"));
        assert_eq!(script.attribute("data-spotx_autoplay"), Some("1"));
        assert_eq!(
            script.attribute("data-spotx_video_slot_can_autoplay"),
            Some("1")
        );
        assert_eq!(script.attribute("data-spotx_ad_mute"), None);
        assert_eq!(script.attribute("data-spotx_ad_skippable"), None);
    }

    #[test]
    fn player_script_sets_static_and_mute_attributes() {
        let bid = outstream_bid();
        let config = RendererConfig {
            outstream_static: true,
            ad_mute: true,
            ..base_config()
        };
        let script = renderer(config)
            .player_script(&bid)
            .expect("should build script");

        assert_eq!(script.attribute("data-spotx_ad_unit"), Some("instream"));
        assert_eq!(script.attribute("data-spotx_ad_skippable"), Some("0"));
        assert_eq!(script.attribute("data-spotx_custom_skin"), Some("1"));
        assert_eq!(script.attribute("data-spotx_ad_mute"), Some("1"));
        assert_eq!(script.attribute("data-spotx_collapse"), None);
    }

    #[test]
    fn custom_overrides_become_data_attributes() {
        let bid = outstream_bid();
        let config = RendererConfig {
            outstream_options: Some(OutstreamOptions {
                custom_override: HashMap::from([
                    ("content_type".to_string(), "news".to_string()),
                    ("autoplay".to_string(), "0".to_string()),
                ]),
                ..OutstreamOptions::default()
            }),
            ..base_config()
        };
        let script = renderer(config)
            .player_script(&bid)
            .expect("should build script");

        assert_eq!(script.attribute("data-spotx_content_type"), Some("news"));
        assert_eq!(script.attribute("data-spotx_autoplay"), Some("0"));
    }

    #[test]
    fn unsafe_override_keys_are_skipped() {
        let bid = outstream_bid();
        let config = RendererConfig {
            outstream_options: Some(OutstreamOptions {
                custom_override: HashMap::from([
                    ("x onload=\"alert(1)\"".to_string(), "1".to_string()),
                    (String::new(), "1".to_string()),
                    ("content-type_2".to_string(), "ok".to_string()),
                ]),
                ..OutstreamOptions::default()
            }),
            ..base_config()
        };
        let script = renderer(config)
            .player_script(&bid)
            .expect("should build script");

        assert_eq!(script.attribute("data-spotx_content-type_2"), Some("ok"));
        assert!(!script.to_html().contains("onload"));
        assert!(script
            .attributes
            .iter()
            .all(|(name, _)| name != "data-spotx_"));
    }

    #[test]
    fn player_script_requires_vast_url() {
        let mut bid = outstream_bid();
        bid.vast_url = None;

        let err = renderer(base_config())
            .player_script(&bid)
            .expect_err("missing vast url should fail");
        assert!(matches!(err.current_context(), AdapterError::Render { .. }));
    }

    #[test]
    fn renders_into_video_slot() {
        let bid = outstream_bid();
        let mut page = publisher_page();

        let outcome = renderer(base_config())
            .render(&bid, &mut page, None)
            .expect("should render");

        let RenderOutcome::Injected(ad) = outcome else {
            unreachable!("expected injection");
        };
        assert_eq!(ad.target, InjectionTarget::Element("v1".to_string()));
        assert!(page
            .document
            .contains(r#"src="https://js.spotx.tv/easi/v1/85394.js""#));
    }

    #[test]
    fn renders_into_configured_iframe() {
        let bid = outstream_bid();
        let mut page = publisher_page().with_frame("frame1", "<html><body></body></html>");
        let config = RendererConfig {
            outstream_options: Some(OutstreamOptions {
                in_iframe: Some("frame1".to_string()),
                ..OutstreamOptions::default()
            }),
            ..base_config()
        };

        let outcome = renderer(config)
            .render(&bid, &mut page, None)
            .expect("should render");

        assert!(matches!(
            outcome,
            RenderOutcome::Injected(RenderedAd {
                target: InjectionTarget::IframeBody(_),
                ..
            })
        ));
        let frame = page.frames.get("frame1").expect("frame exists");
        assert!(frame.contains("data-spotx_channel_id=\"85394\""));
    }

    #[test]
    fn in_iframe_naming_non_iframe_falls_back_to_slot() {
        let bid = outstream_bid();
        let page = publisher_page();
        let config = RendererConfig {
            outstream_options: Some(OutstreamOptions {
                in_iframe: Some("s1".to_string()),
                ..OutstreamOptions::default()
            }),
            ..base_config()
        };

        assert_eq!(
            renderer(config).target(&bid, &page),
            InjectionTarget::Element("v1".to_string())
        );
    }

    #[test]
    fn outstream_function_replaces_default_rendering() {
        let bid = outstream_bid();
        let mut page = publisher_page();
        let called = Arc::new(AtomicBool::new(false));
        let called_in_hook = called.clone();
        let config = RendererConfig {
            outstream_function: Some(OutstreamFunction::new(move |bid| {
                assert_eq!(bid.request_id, "bid-1");
                called_in_hook.store(true, Ordering::SeqCst);
            })),
            ..base_config()
        };
        let before = page.document.clone();

        let outcome = renderer(config)
            .render(&bid, &mut page, None)
            .expect("should render");

        assert!(matches!(outcome, RenderOutcome::Delegated));
        assert!(called.load(Ordering::SeqCst));
        assert_eq!(page.document, before);
    }

    #[test]
    fn ad_done_callback_is_bound_per_render() {
        let bid = outstream_bid();
        let mut page = publisher_page();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in_callback = seen.clone();

        let outcome = renderer(base_config())
            .render(
                &bid,
                &mut page,
                Some(Box::new(move |found| {
                    seen_in_callback
                        .lock()
                        .expect("lock should not be poisoned")
                        .push(found);
                })),
            )
            .expect("should render");

        let RenderOutcome::Injected(mut ad) = outcome else {
            unreachable!("expected injection");
        };
        ad.ad_done(true);
        ad.ad_done(false);

        assert_eq!(
            *seen.lock().expect("lock should not be poisoned"),
            vec![true, false]
        );
    }

    #[test]
    fn render_fails_when_slot_missing() {
        let mut bid = outstream_bid();
        bid.video_slot = "gone".to_string();
        let mut page = StaticPage::new("https://publisher.example/", "<html></html>");

        assert!(renderer(base_config())
            .render(&bid, &mut page, None)
            .is_err());
    }

    #[test]
    fn script_markup_escapes_attribute_values() {
        let script = ScriptElement::new("https://x.example/a.js?x=1&y=2")
            .with_attribute("data-spotx_content_page_url", "https://p.example/?q=\"a\"");

        assert_eq!(
            script.to_html(),
            "<script type=\"text/javascript\" src=\"https://x.example/a.js?x=1&amp;y=2\" data-spotx_content_page_url=\"https://p.example/?q=&quot;a&quot;\"></script>"
        );
    }
}
