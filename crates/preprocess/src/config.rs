/// Model input (height, width) the face pipeline targets.
pub const DEFAULT_INPUT_SIZE: (usize, usize) = (640, 640);

pub const DEFAULT_LETTERBOX_FILL: u8 = 0;

/// Longest image side fed to detection by the emoji front end.
pub const MAX_DETECTION_SIDE: u32 = 1024;
