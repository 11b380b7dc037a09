//! The page the verification widget runs in.
//!
//! [`ProviderHost`] is everything the adapter needs from the hosting
//! document: script injection, the body's scroll-lock styles, an off-screen
//! trigger, and a view of the nodes and frames the provider adds. A browser
//! shell implements it over the DOM; tests implement it in memory.

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;

/// Id of the off-screen container holding the provider trigger.
pub const CONTAINER_ID: &str = "provider-container";

/// A host operation failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct HostError(pub String);

/// Scroll-related inline styles of the document, captured before a
/// provider interaction and restored afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyStyle {
    pub body_overflow: String,
    pub body_position: String,
    pub html_overflow: String,
}

impl BodyStyle {
    /// The same styles with page scrolling suspended.
    #[must_use]
    pub fn locked(&self) -> Self {
        Self {
            body_overflow: "hidden".to_owned(),
            body_position: self.body_position.clone(),
            html_overflow: "hidden".to_owned(),
        }
    }
}

/// Attributes of the off-screen provider trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerSpec {
    pub container_id: &'static str,
    pub client_id: String,
    pub flow_id: String,
    /// JSON-encoded metadata map.
    pub metadata: String,
    /// Ask the provider not to persist the session in the browser.
    pub nopersist: bool,
}

/// Opaque handle to a node in the host document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(pub u64);

/// CSS `position` values the overlay heuristic distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Position {
    #[default]
    Static,
    Relative,
    Absolute,
    Fixed,
    Sticky,
}

/// Computed style of a node, reduced to what the heuristics read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputedStyle {
    pub position: Position,
    pub z_index: i32,
    /// `inset` computes to `auto`.
    pub inset_auto: bool,
    pub display_none: bool,
    pub visibility_hidden: bool,
    pub opacity_zero: bool,
}

impl Default for ComputedStyle {
    fn default() -> Self {
        Self {
            position: Position::Static,
            z_index: 0,
            inset_auto: true,
            display_none: false,
            visibility_hidden: false,
            opacity_zero: false,
        }
    }
}

/// An element whose id or class names the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostNode {
    pub handle: NodeHandle,
    pub id: String,
    pub style: ComputedStyle,
    /// The node sits inside the adapter's own trigger container.
    pub inside_container: bool,
}

impl HostNode {
    /// Positioned above the page like a modal overlay.
    #[must_use]
    pub const fn looks_like_overlay(&self) -> bool {
        matches!(self.style.position, Position::Fixed | Position::Absolute)
            && (self.style.z_index >= 999 || !self.style.inset_auto)
    }

    #[must_use]
    pub const fn is_visible(&self) -> bool {
        !self.style.display_none && !self.style.visibility_hidden && !self.style.opacity_zero
    }

    /// Part of the provider's own UI rather than the adapter's trigger.
    #[must_use]
    pub fn is_provider_ui(&self) -> bool {
        self.id != CONTAINER_ID && !self.inside_container
    }
}

/// An iframe in the host document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameNode {
    pub handle: Option<NodeHandle>,
    pub src: String,
    pub title: String,
    pub aria_label: String,
    pub name: String,
}

impl FrameNode {
    /// Whether the frame's source points at the provider.
    #[must_use]
    pub fn src_matches(&self, pattern: &Regex) -> bool {
        pattern.is_match(&self.src)
    }

    /// Whether any identifying attribute mentions the provider.
    #[must_use]
    pub fn mentions(&self, pattern: &Regex) -> bool {
        [&self.src, &self.title, &self.aria_label, &self.name]
            .iter()
            .any(|attr| pattern.is_match(attr))
    }
}

/// The document hosting the verification widget.
#[async_trait]
pub trait ProviderHost: Send + Sync {
    /// Whether the widget script is already present.
    fn has_script(&self, src: &str) -> bool;

    /// Inject the widget script and wait for it to load.
    ///
    /// # Errors
    ///
    /// Returns an error if the script fails to load.
    async fn load_script(&self, src: &str) -> Result<(), HostError>;

    fn body_style(&self) -> BodyStyle;

    fn set_body_style(&self, style: &BodyStyle);

    /// Create the off-screen container and provider trigger element.
    ///
    /// # Errors
    ///
    /// Returns an error if the element cannot be created.
    fn mount_trigger(&self, trigger: &TriggerSpec) -> Result<(), HostError>;

    /// Synthetically activate the trigger so the provider's modal opens.
    ///
    /// # Errors
    ///
    /// Returns an error if the activation throws.
    fn activate_trigger(&self) -> Result<(), HostError>;

    /// Whether the trigger container is still attached.
    fn has_container(&self) -> bool;

    fn remove_container(&self);

    /// Elements whose id or class mentions the provider.
    fn provider_nodes(&self) -> Vec<HostNode>;

    /// Every iframe in the document.
    fn frames(&self) -> Vec<FrameNode>;

    fn remove_node(&self, handle: NodeHandle);
}
