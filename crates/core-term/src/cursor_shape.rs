//! Pointer-shape names (OSC 22): the W3C CSS cursor set plus the xterm
//! aliases applications still send.

use std::str::FromStr;

/// A pointer shape the embedder can map to its windowing system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseShape {
    Default,
    ContextMenu,
    Help,
    Pointer,
    Progress,
    Wait,
    Cell,
    Crosshair,
    Text,
    VerticalText,
    Alias,
    Copy,
    Move,
    NoDrop,
    NotAllowed,
    Grab,
    Grabbing,
    AllScroll,
    ColResize,
    RowResize,
    NResize,
    EResize,
    SResize,
    WResize,
    NeResize,
    NwResize,
    SeResize,
    SwResize,
    EwResize,
    NsResize,
    NeswResize,
    NwseResize,
    ZoomIn,
    ZoomOut,
}

impl FromStr for MouseShape {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        let name = s.trim().to_ascii_lowercase();
        Ok(match name.as_str() {
            "default" => Self::Default,
            "context-menu" => Self::ContextMenu,
            "help" => Self::Help,
            "pointer" => Self::Pointer,
            "progress" => Self::Progress,
            "wait" => Self::Wait,
            "cell" => Self::Cell,
            "crosshair" => Self::Crosshair,
            "text" => Self::Text,
            "vertical-text" => Self::VerticalText,
            "alias" => Self::Alias,
            "copy" => Self::Copy,
            "move" => Self::Move,
            "no-drop" => Self::NoDrop,
            "not-allowed" => Self::NotAllowed,
            "grab" => Self::Grab,
            "grabbing" => Self::Grabbing,
            "all-scroll" => Self::AllScroll,
            "col-resize" => Self::ColResize,
            "row-resize" => Self::RowResize,
            "n-resize" => Self::NResize,
            "e-resize" => Self::EResize,
            "s-resize" => Self::SResize,
            "w-resize" => Self::WResize,
            "ne-resize" => Self::NeResize,
            "nw-resize" => Self::NwResize,
            "se-resize" => Self::SeResize,
            "sw-resize" => Self::SwResize,
            "ew-resize" => Self::EwResize,
            "ns-resize" => Self::NsResize,
            "nesw-resize" => Self::NeswResize,
            "nwse-resize" => Self::NwseResize,
            "zoom-in" => Self::ZoomIn,
            "zoom-out" => Self::ZoomOut,
            // xterm aliases.
            "left_ptr" | "arrow" | "top_left_arrow" => Self::Default,
            "xterm" | "ibeam" => Self::Text,
            "hand" | "hand1" | "hand2" | "pointing_hand" => Self::Pointer,
            "cross" | "tcross" => Self::Crosshair,
            "watch" | "clock" => Self::Wait,
            "question_arrow" | "whats_this" => Self::Help,
            "fleur" | "size_all" => Self::Move,
            "left_side" => Self::WResize,
            "right_side" => Self::EResize,
            "top_side" => Self::NResize,
            "bottom_side" => Self::SResize,
            "sb_h_double_arrow" => Self::EwResize,
            "sb_v_double_arrow" => Self::NsResize,
            "forbidden" | "crossed_circle" => Self::NotAllowed,
            "openhand" => Self::Grab,
            "closedhand" | "dnd-move" => Self::Grabbing,
            _ => return Err(()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn css_names() {
        assert_eq!("text".parse(), Ok(MouseShape::Text));
        assert_eq!("nesw-resize".parse(), Ok(MouseShape::NeswResize));
        assert_eq!("zoom-in".parse(), Ok(MouseShape::ZoomIn));
    }

    #[test]
    fn xterm_aliases() {
        assert_eq!("left_ptr".parse(), Ok(MouseShape::Default));
        assert_eq!("xterm".parse(), Ok(MouseShape::Text));
        assert_eq!("hand".parse(), Ok(MouseShape::Pointer));
    }

    #[test]
    fn case_insensitive_and_unknown() {
        assert_eq!("TEXT".parse(), Ok(MouseShape::Text));
        assert_eq!(MouseShape::from_str("sparkles"), Err(()));
    }
}
