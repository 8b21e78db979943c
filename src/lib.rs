//! veridock - turns PDFs dropped into watched folders into self-contained
//! SVG containers
//!
//! This crate provides:
//! - The container codec: original PDF, metadata, thumbnail grid and OCR
//!   text in one viewable SVG file
//! - A daemon that converts settled PDFs and runs OCR on a schedule
//! - CLI commands for single-shot conversion, OCR, extraction, validation
//!   and JSON export/import

pub mod commands;
pub mod config;
pub mod container;
pub mod daemon;
pub mod error;
pub mod export;
pub mod fsutil;
pub mod models;
pub mod ocr;
pub mod progress;
pub mod registry;
pub mod render;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{Error, Result};
