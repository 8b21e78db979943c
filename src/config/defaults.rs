//! Default values for configuration

/// Seconds between scan-and-convert ticks
pub fn default_scan_interval() -> u64 {
    10
}

/// A PDF must be untouched this long before it is converted
pub fn default_settle_secs() -> u64 {
    2
}

/// Render attempts per file per tick
pub fn default_scan_max_attempts() -> u32 {
    3
}

/// Pause between render attempts (milliseconds)
pub fn default_retry_delay_ms() -> u64 {
    2000
}

/// Files converted in parallel within one tick
pub fn default_scan_concurrency() -> usize {
    2
}

/// Seconds between OCR backlog ticks
pub fn default_ocr_interval() -> u64 {
    60
}

/// Tesseract languages, tried together
pub fn default_ocr_languages() -> Vec<String> {
    vec!["pol".to_string(), "eng".to_string()]
}

/// Rasterization resolution for OCR
pub fn default_ocr_dpi() -> u32 {
    300
}

/// Words below this tesseract confidence (0-100) are dropped
pub fn default_min_confidence() -> f32 {
    30.0
}

/// Tesseract executable
pub fn default_tesseract_path() -> String {
    std::env::var("VERIDOCK_TESSERACT").unwrap_or_else(|_| "tesseract".to_string())
}

/// Tesseract OCR engine mode (3 = default, LSTM when available)
pub fn default_ocr_oem() -> u8 {
    3
}

/// Tesseract page segmentation mode (6 = single uniform block)
pub fn default_ocr_psm() -> u8 {
    6
}

/// Recorded OCR failures after which the daemon stops retrying
pub fn default_ocr_max_attempts() -> u32 {
    3
}

/// Containers processed in parallel within one OCR tick
pub fn default_ocr_concurrency() -> usize {
    1
}

/// Thumbnail rasterization resolution
pub fn default_thumbnail_dpi() -> u32 {
    150
}

/// Thumbnail tile width in pixels
pub fn default_tile_width() -> u32 {
    200
}

/// Thumbnail tile height in pixels
pub fn default_tile_height() -> u32 {
    280
}

/// Tiles per grid row
pub fn default_max_columns() -> u32 {
    4
}

/// pdftoppm executable
pub fn default_pdftoppm_path() -> String {
    std::env::var("VERIDOCK_PDFTOPPM").unwrap_or_else(|_| "pdftoppm".to_string())
}

/// Seconds `stop` waits for the daemon to exit
pub fn default_stop_timeout() -> u64 {
    30
}

/// Persist a registry snapshot after every tick
pub fn default_registry_snapshot() -> bool {
    true
}

/// Directories seeded into a fresh watch list
pub fn default_watch_dirs() -> Vec<&'static str> {
    vec!["~/Downloads", "~/Documents"]
}
