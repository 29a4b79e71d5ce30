//! Viewport anchor policy. Presentation reads the current [`ScrollAnchor`]
//! from a watch channel and performs the actual scrolling; this module only
//! decides where the viewport should be.

use uuid::Uuid;

/// Where the viewport should sit right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAnchor {
    /// Pinned to the newest message. `animated` is false only for the very
    /// first paint so the initial population doesn't visibly scroll.
    Bottom { animated: bool },
    /// Anchored on a specific message after a reply jump. The highlight is
    /// transient and cleared on a timer.
    Message { id: Uuid, highlighted: bool },
}

/// Stick-to-bottom by default; a reply jump overrides the anchor once but
/// never the default, so the next append snaps back to the bottom.
#[derive(Debug)]
pub struct AnchorController {
    current: ScrollAnchor,
}

impl Default for AnchorController {
    fn default() -> Self {
        Self::new()
    }
}

impl AnchorController {
    pub fn new() -> Self {
        Self {
            current: ScrollAnchor::Bottom { animated: false },
        }
    }

    pub fn current(&self) -> ScrollAnchor {
        self.current
    }

    /// Initial population: jump straight to the bottom, no animation.
    pub fn on_initial_load(&mut self) -> ScrollAnchor {
        self.current = ScrollAnchor::Bottom { animated: false };
        self.current
    }

    /// The local user sent a message: follow it down.
    pub fn on_local_send(&mut self) -> ScrollAnchor {
        self.current = ScrollAnchor::Bottom { animated: true };
        self.current
    }

    /// A remote message appended while live: scroll down, animated. This
    /// also ends any reply-jump anchor — stick-to-bottom is the default.
    pub fn on_live_append(&mut self) -> ScrollAnchor {
        self.current = ScrollAnchor::Bottom { animated: true };
        self.current
    }

    /// Jump to a quoted message with a transient highlight.
    pub fn on_jump(&mut self, id: Uuid) -> ScrollAnchor {
        self.current = ScrollAnchor::Message {
            id,
            highlighted: true,
        };
        self.current
    }

    /// Timer fired: drop the highlight but keep the position.
    pub fn clear_highlight(&mut self) -> ScrollAnchor {
        if let ScrollAnchor::Message { id, .. } = self.current {
            self.current = ScrollAnchor::Message {
                id,
                highlighted: false,
            };
        }
        self.current
    }
}
