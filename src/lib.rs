//! Transformer nameplate coding: read attributes off nameplate photos,
//! derive `POWTR-…` classification codes, audit existing codes and build
//! asset-loader rows.

pub mod attributes;
pub mod config;
pub mod heuristics;
pub mod loader;
pub mod nameplate_db;
pub mod pipeline;
pub mod table;
pub mod vision;
