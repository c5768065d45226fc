//! Drawing detections and emoji overlays onto images.

pub mod annotate;
pub mod emoji;
pub mod geometry;
pub mod render;
pub mod settings;

pub use annotate::{DEFAULT_OUTPUT, annotate_detections, load_font};
pub use emoji::{
    EmojiPicker, EmojiPlacement, add_placement, load_placements, plan_placements,
    save_placements, update_placement,
};
pub use render::{draw_emoji, draw_placements};
pub use settings::{DEFAULT_EMOJIS, EmojiSettings};
