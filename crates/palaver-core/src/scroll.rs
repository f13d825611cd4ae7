//! Auto-scroll decision and geometry for a chat message list.
//!
//! Everything here is pure over explicit geometry inputs: the functions
//! decide what to do and compute pixel values, and the caller applies them
//! to its rendering layer. Scrolling is a best-effort affordance; every
//! function degrades to `None` or a passthrough when a required handle is
//! missing, and nothing here panics on odd geometry.

use tracing::trace;

/// Padding added above the pinned message so it does not sit flush against
/// the viewport edge.
pub const AUTO_SCROLL_EXTRA: f64 = 8.0;

/// A pin target taller than this fraction of the viewport is "very tall".
pub const VERY_TALL_FRACTION: f64 = 0.25;

/// How much of a very tall pin target stays visible at the top of the
/// viewport, so the response below it is not pushed entirely out of view.
pub const VERY_TALL_VISIBLE_BOTTOM: f64 = 100.0;

/// Read/write view of the scrollable container.
pub trait ScrollRegion {
    fn scroll_height(&self) -> f64;
    fn client_height(&self) -> f64;
    fn scroll_top(&self) -> f64;
    /// The implementation is expected to clamp like a browser does:
    /// `scroll_top <= scroll_height - client_height`.
    fn set_scroll_top(&self, px: f64);
}

/// Read-only view of one rendered element inside the region.
pub trait RegionChild {
    /// Offset of the element's top edge within the region's content.
    fn offset_within_region(&self) -> f64;
    fn height(&self) -> f64;
}

/// The trailing bottom-padding element. Its height is the only geometry this
/// module ever writes besides `scroll_top`.
pub trait SpacerHandle: RegionChild {
    fn set_min_height(&self, px: f64);
}

/// One entry of the rendered message list, reduced to what the pin scan
/// needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageItem {
    /// A user request bubble. Silent requests render no bubble and cannot
    /// anchor the scroll.
    Request { silent: bool },
    /// A response; `request_silent` is the silent flag of the request that
    /// produced it.
    Response { request_silent: bool },
    /// Notices, separators, and other non-anchorable content.
    Other,
}

impl MessageItem {
    /// A plain request always anchors. A response anchors only when its
    /// request was silent, because then no request bubble exists to pin.
    fn qualifies_as_pin(self) -> bool {
        match self {
            MessageItem::Request { silent } => !silent,
            MessageItem::Response { request_silent } => request_silent,
            MessageItem::Other => false,
        }
    }
}

/// Explicit caller overrides. Either flag wins over the scan.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScrollOptions {
    pub scroll_to_top: bool,
    pub scroll_to_bottom: bool,
}

/// What the caller should do in response to a list mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAction {
    ScrollToTop,
    ScrollToBottom,
    /// The list is empty; force the scroll position back to zero in case the
    /// browser restored a stale one.
    ResetToTop,
    /// Anchor the viewport to the item at this index.
    PinMessage { index: usize },
    /// The pin target is unchanged but geometry below it may have moved.
    RecalculateSpacer,
    None,
}

/// Decides how to react to a message-list mutation.
///
/// Precedence: explicit override, then empty-list reset, then a backward
/// scan for the last qualifying pin target. Index 0 is never scanned; the
/// first message of a conversation stays at the natural top position.
pub fn resolve_auto_scroll_action(
    items: &[MessageItem],
    pinned: Option<usize>,
    options: ScrollOptions,
) -> ScrollAction {
    if options.scroll_to_top {
        return ScrollAction::ScrollToTop;
    }
    if options.scroll_to_bottom {
        return ScrollAction::ScrollToBottom;
    }
    if items.is_empty() {
        return ScrollAction::ResetToTop;
    }

    let target = (1..items.len())
        .rev()
        .find(|&index| items[index].qualifies_as_pin());

    match target {
        Some(index) if pinned != Some(index) => ScrollAction::PinMessage { index },
        _ if pinned.is_some() => ScrollAction::RecalculateSpacer,
        _ => ScrollAction::None,
    }
}

/// Geometry committed by a pin, kept by the caller as the baseline for
/// streaming-delta accounting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinResult {
    pub spacer_height: f64,
    /// Snapshot of `scroll_height` after the spacer write.
    pub last_scroll_height: f64,
    /// The scroll position actually reached, post-clamping.
    pub scroll_top: f64,
}

/// Spacer write from a recalculation; `scroll_top` is deliberately absent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpacerResult {
    pub spacer_height: f64,
    pub last_scroll_height: f64,
}

/// In-memory spacer accounting carried across streaming chunks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamingSpacerState {
    pub current_spacer_height: f64,
    pub last_scroll_height: f64,
}

fn pin_geometry(
    target: &dyn RegionChild,
    region: &dyn ScrollRegion,
    spacer: &dyn SpacerHandle,
) -> (f64, f64) {
    let client_height = region.client_height();
    let target_offset = target.offset_within_region();
    let target_height = target.height();

    let mut scroll_top = (target_offset + AUTO_SCROLL_EXTRA).floor().max(0.0);
    if target_height > client_height * VERY_TALL_FRACTION {
        // Keep only the bottom slice of a very tall target visible so the
        // response under it stays on screen.
        let tall_top = (target_offset + target_height - VERY_TALL_VISIBLE_BOTTOM).floor();
        scroll_top = scroll_top.max(tall_top).max(0.0);
    }

    // Minimum trailing padding that makes `scroll_top` reachable at all:
    // browsers clamp to `scroll_height - client_height`, so the content must
    // extend to the viewport's bottom edge at the target position.
    let visible_bottom = scroll_top + client_height;
    let spacer_height = (visible_bottom - spacer.offset_within_region())
        .ceil()
        .max(0.0);

    (scroll_top, spacer_height)
}

/// Anchors the viewport to `target`: commits the spacer needed to make the
/// position reachable, then writes `scroll_top`. The spacer write must come
/// first or the browser clamps the scroll short of the target.
pub fn pin_message_and_scroll(
    target: Option<&dyn RegionChild>,
    region: &dyn ScrollRegion,
    spacer: Option<&dyn SpacerHandle>,
) -> Option<PinResult> {
    let target = target?;
    let spacer = spacer?;

    let (scroll_top, spacer_height) = pin_geometry(target, region, spacer);
    spacer.set_min_height(spacer_height);
    region.set_scroll_top(scroll_top);

    let result = PinResult {
        spacer_height,
        last_scroll_height: region.scroll_height(),
        scroll_top: region.scroll_top(),
    };
    trace!(
        target: "palaver::scroll",
        scroll_top = result.scroll_top,
        spacer = result.spacer_height,
        "pinned message"
    );
    Some(result)
}

/// Re-runs the pin geometry and writes only the spacer. Used when content
/// below the pin changes without needing to re-anchor; the user's scroll
/// position is left alone.
pub fn recalculate_pinned_message_spacer(
    target: Option<&dyn RegionChild>,
    region: &dyn ScrollRegion,
    spacer: Option<&dyn SpacerHandle>,
) -> Option<SpacerResult> {
    let target = target?;
    let spacer = spacer?;

    let (_, spacer_height) = pin_geometry(target, region, spacer);
    spacer.set_min_height(spacer_height);

    Some(SpacerResult {
        spacer_height,
        last_scroll_height: region.scroll_height(),
    })
}

/// Absorbs one streaming growth step into the in-memory spacer.
///
/// The DOM spacer is never written here. Shrinking it mid-stream would
/// shrink `scroll_height` and make the browser clamp `scroll_top`, yanking a
/// user who scrolled away back toward the pin. The accounting is reconciled
/// against the DOM once, at stream end, by the pin/recalculate functions.
pub fn consume_streaming_chunk(
    state: StreamingSpacerState,
    region: Option<&dyn ScrollRegion>,
) -> StreamingSpacerState {
    let Some(region) = region else {
        return state;
    };
    if state.current_spacer_height <= 0.0 {
        return state;
    }

    let scroll_height = region.scroll_height();
    let delta = scroll_height - state.last_scroll_height;
    StreamingSpacerState {
        // Growth consumes the spacer; contraction gives it back.
        current_spacer_height: (state.current_spacer_height - delta).max(0.0),
        last_scroll_height: scroll_height,
    }
}
