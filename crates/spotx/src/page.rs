//! Page environment the adapter validates against and renders into.
//!
//! The adapter never touches a live document directly. Everything it needs
//! from the page (element lookups, rendered sizes, browser signals and script
//! injection) goes through [`PageEnvironment`], so hosts can back it with a
//! real DOM bridge and tests can use [`StaticPage`].
//!
//! [`StaticPage`] holds the page as HTML. Element lookups and script injection
//! run `lol_html` over that markup; rendered sizes come from an explicit layout
//! table, falling back to `width`/`height` attributes.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use error_stack::{Report, ResultExt};
use lol_html::{element, HtmlRewriter, Settings as RewriterSettings};
use serde::{Deserialize, Serialize};

use crate::error::AdapterError;
use crate::renderer::ScriptElement;

/// Width and height in CSS pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.width == 0 && self.height == 0
    }
}

/// An element found on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementInfo {
    /// Lowercase tag name.
    pub tag_name: String,
    /// Rendered size (`offsetWidth`/`offsetHeight`).
    pub size: Size,
}

impl ElementInfo {
    #[must_use]
    pub fn is_iframe(&self) -> bool {
        self.tag_name == "iframe"
    }
}

/// Browser signals copied into the device block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigatorSignals {
    #[serde(default)]
    pub do_not_track: bool,
    /// Full language tag, e.g. `en-US`.
    #[serde(default)]
    pub language: Option<String>,
    /// `navigator.vendor`.
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub user_agent: String,
}

/// Where a player script is appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectionTarget {
    /// Append as the last child of the element with this id.
    Element(String),
    /// Append to the body of the document loaded in the iframe with this id.
    IframeBody(String),
}

/// Capabilities the adapter needs from the hosting page.
pub trait PageEnvironment {
    /// Look up an element by id.
    fn element(&self, id: &str) -> Option<ElementInfo>;

    /// First `<video>` element inside the element with this id.
    fn first_video_within(&self, id: &str) -> Option<ElementInfo>;

    /// URL of the top-level window.
    fn location(&self) -> String;

    /// Inner size of the top-level window.
    fn viewport(&self) -> Size;

    /// Screen size.
    fn screen(&self) -> Size;

    fn navigator(&self) -> NavigatorSignals;

    /// Append a script element at the given target.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Render`] when the target does not exist or the
    /// markup cannot be rewritten.
    fn append_script(
        &mut self,
        target: &InjectionTarget,
        script: &ScriptElement,
    ) -> Result<(), Report<AdapterError>>;
}

/// In-memory page backed by HTML markup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StaticPage {
    pub location: String,
    #[serde(default)]
    pub viewport: Size,
    #[serde(default)]
    pub screen: Size,
    #[serde(default)]
    pub navigator: NavigatorSignals,
    /// Markup of the top-level document.
    #[serde(default)]
    pub document: String,
    /// Documents loaded in iframes, keyed by iframe id.
    #[serde(default)]
    pub frames: HashMap<String, String>,
    /// Rendered sizes keyed by element id.
    #[serde(default)]
    pub layout: HashMap<String, Size>,
}

impl StaticPage {
    #[must_use]
    pub fn new(location: impl Into<String>, document: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            document: document.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_layout(mut self, id: impl Into<String>, size: Size) -> Self {
        self.layout.insert(id.into(), size);
        self
    }

    #[must_use]
    pub fn with_frame(mut self, id: impl Into<String>, document: impl Into<String>) -> Self {
        self.frames.insert(id.into(), document.into());
        self
    }

    fn rendered_size(&self, found: &FoundElement) -> Size {
        found
            .id
            .as_ref()
            .and_then(|id| self.layout.get(id))
            .copied()
            .unwrap_or(found.attribute_size)
    }

    fn lookup(&self, selector: &str) -> Option<ElementInfo> {
        match first_match(&self.document, selector) {
            Ok(found) => found.map(|found| ElementInfo {
                tag_name: found.tag_name.clone(),
                size: self.rendered_size(&found),
            }),
            Err(err) => {
                log::debug!("element lookup '{selector}' failed: {err:?}");
                None
            }
        }
    }
}

impl PageEnvironment for StaticPage {
    fn element(&self, id: &str) -> Option<ElementInfo> {
        self.lookup(&id_selector(id)?)
    }

    fn first_video_within(&self, id: &str) -> Option<ElementInfo> {
        self.lookup(&format!("{} video", id_selector(id)?))
    }

    fn location(&self) -> String {
        self.location.clone()
    }

    fn viewport(&self) -> Size {
        self.viewport
    }

    fn screen(&self) -> Size {
        self.screen
    }

    fn navigator(&self) -> NavigatorSignals {
        self.navigator.clone()
    }

    fn append_script(
        &mut self,
        target: &InjectionTarget,
        script: &ScriptElement,
    ) -> Result<(), Report<AdapterError>> {
        let markup = script.to_html();
        match target {
            InjectionTarget::Element(id) => {
                let selector = id_selector(id).ok_or_else(|| {
                    Report::new(AdapterError::Render {
                        message: format!("invalid element id '{id}'"),
                    })
                })?;
                self.document = append_to_first(&self.document, &selector, &markup)?;
            }
            InjectionTarget::IframeBody(id) => {
                let frame = self.frames.get_mut(id).ok_or_else(|| {
                    Report::new(AdapterError::Render {
                        message: format!("iframe '{id}' has no document"),
                    })
                })?;
                *frame = append_to_first(frame, "body", &markup)?;
            }
        }
        Ok(())
    }
}

struct FoundElement {
    tag_name: String,
    id: Option<String>,
    attribute_size: Size,
}

/// Attribute selector for an element id, `None` for ids that cannot be quoted.
fn id_selector(id: &str) -> Option<String> {
    if id.is_empty() || id.contains(['"', '\\']) {
        return None;
    }
    Some(format!("[id=\"{id}\"]"))
}

fn attribute_px(el: &lol_html::html_content::Element, name: &str) -> u32 {
    el.get_attribute(name)
        .and_then(|value| value.trim().trim_end_matches("px").parse::<u32>().ok())
        .unwrap_or(0)
}

/// Reject selectors `element!` would fail to parse.
fn check_selector(selector: &str) -> Result<(), Report<AdapterError>> {
    selector
        .parse::<lol_html::Selector>()
        .map(|_| ())
        .change_context(AdapterError::Render {
            message: format!("invalid selector '{selector}'"),
        })
}

fn first_match(html: &str, selector: &str) -> Result<Option<FoundElement>, Report<AdapterError>> {
    check_selector(selector)?;
    let found: Rc<RefCell<Option<FoundElement>>> = Rc::new(RefCell::new(None));
    let found_in_handler = found.clone();

    let rewriter_settings = RewriterSettings {
        element_content_handlers: vec![element!(selector, move |el| {
            let mut slot = found_in_handler.borrow_mut();
            if slot.is_none() {
                *slot = Some(FoundElement {
                    tag_name: el.tag_name().to_ascii_lowercase(),
                    id: el.get_attribute("id"),
                    attribute_size: Size::new(attribute_px(el, "width"), attribute_px(el, "height")),
                });
            }
            Ok(())
        })],
        ..RewriterSettings::default()
    };

    let mut rewriter = HtmlRewriter::new(rewriter_settings, |_: &[u8]| {});
    rewriter
        .write(html.as_bytes())
        .change_context(AdapterError::Render {
            message: format!("failed to scan page for '{selector}'"),
        })?;
    rewriter.end().change_context(AdapterError::Render {
        message: format!("failed to scan page for '{selector}'"),
    })?;

    let result = found.borrow_mut().take();
    Ok(result)
}

fn append_to_first(
    html: &str,
    selector: &str,
    markup: &str,
) -> Result<String, Report<AdapterError>> {
    check_selector(selector)?;
    let injected = Rc::new(RefCell::new(false));
    let injected_in_handler = injected.clone();
    let markup = markup.to_string();

    let mut output = Vec::with_capacity(html.len() + markup.len());
    let rewriter_settings = RewriterSettings {
        element_content_handlers: vec![element!(selector, move |el| {
            let mut done = injected_in_handler.borrow_mut();
            if !*done {
                el.append(&markup, lol_html::html_content::ContentType::Html);
                *done = true;
            }
            Ok(())
        })],
        ..RewriterSettings::default()
    };

    let mut rewriter =
        HtmlRewriter::new(rewriter_settings, |chunk: &[u8]| output.extend_from_slice(chunk));
    rewriter
        .write(html.as_bytes())
        .change_context(AdapterError::Render {
            message: format!("failed to rewrite page at '{selector}'"),
        })?;
    rewriter.end().change_context(AdapterError::Render {
        message: format!("failed to rewrite page at '{selector}'"),
    })?;

    if !*injected.borrow() {
        return Err(Report::new(AdapterError::Render {
            message: format!("no element matches '{selector}'"),
        }));
    }

    String::from_utf8(output).change_context(AdapterError::Render {
        message: "rewritten page is not valid UTF-8".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body>
        <div id="s1" width="300" height="250"></div>
        <div id="v1"><video width="640" height="360"></video></div>
        <div id="v2" width="400" height="225"></div>
        <iframe id="frame1"></iframe>
    </body></html>"#;

    fn page() -> StaticPage {
        StaticPage::new("https://publisher.example/article", PAGE)
    }

    fn script() -> ScriptElement {
        ScriptElement::new("https://js.spotx.tv/easi/v1/123.js")
            .with_attribute("data-spotx_channel_id", "123")
    }

    #[test]
    fn finds_elements_by_id() {
        let page = page();

        let slot = page.element("s1").expect("slot should exist");
        assert_eq!(slot.tag_name, "div");
        assert_eq!(slot.size, Size::new(300, 250));

        assert!(page.element("frame1").expect("iframe exists").is_iframe());
        assert!(page.element("missing").is_none());
        assert!(page.element("").is_none());
        assert!(page.element("bad\"id").is_none());
    }

    #[test]
    fn unparseable_ids_are_not_found() {
        let mut page = page();
        for id in ["v\n1", "s 1", "a]b"] {
            assert!(page.element(id).is_none(), "{id:?} should not match");
            assert!(page.first_video_within(id).is_none());
            let err = page
                .append_script(&InjectionTarget::Element(id.to_string()), &script())
                .expect_err("unparseable id should fail");
            assert!(matches!(err.current_context(), AdapterError::Render { .. }));
        }
    }

    #[test]
    fn layout_overrides_attribute_size() {
        let page = page().with_layout("s1", Size::new(728, 90));
        assert_eq!(
            page.element("s1").expect("slot should exist").size,
            Size::new(728, 90)
        );
    }

    #[test]
    fn finds_first_video_within_container() {
        let page = page();

        let video = page.first_video_within("v1").expect("video should exist");
        assert_eq!(video.tag_name, "video");
        assert_eq!(video.size, Size::new(640, 360));

        assert!(page.first_video_within("v2").is_none());
    }

    #[test]
    fn appends_script_to_element() {
        let mut page = page();
        page.append_script(&InjectionTarget::Element("v2".to_string()), &script())
            .expect("should inject");

        assert!(page.document.contains(
            r#"<div id="v2" width="400" height="225"><script type="text/javascript" src="https://js.spotx.tv/easi/v1/123.js" data-spotx_channel_id="123"></script></div>"#
        ));
    }

    #[test]
    fn appends_script_to_iframe_body() {
        let mut page = page().with_frame("frame1", "<html><body><p>ad</p></body></html>");
        page.append_script(&InjectionTarget::IframeBody("frame1".to_string()), &script())
            .expect("should inject");

        let frame = page.frames.get("frame1").expect("frame exists");
        assert!(frame.contains("<p>ad</p><script"));
        assert!(!page.document.contains("<script"));
    }

    #[test]
    fn injection_into_missing_targets_fails() {
        let mut page = page();

        let err = page
            .append_script(&InjectionTarget::Element("nope".to_string()), &script())
            .expect_err("missing element should fail");
        assert!(matches!(err.current_context(), AdapterError::Render { .. }));

        assert!(page
            .append_script(&InjectionTarget::IframeBody("frame1".to_string()), &script())
            .is_err());
    }
}
