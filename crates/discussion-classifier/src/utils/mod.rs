//! Utilities module - text normalization shared by the pipeline and the stores

pub mod text_utils;

pub use text_utils::TextUtils;
