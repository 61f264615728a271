//! Viewport control and self-contained export for rendered Mermaid diagrams.
//!
//! A [`session::Session`] holds the source text, the diagram the rendering
//! collaborator produced from it, the [`viewport::ViewportController`] and the
//! theme. An [`export::ExportDispatcher`] turns the session's diagram into a
//! standalone SVG, PNG or JPEG file.

#[cfg(feature = "cli")]
pub mod cli;
pub mod color;
pub mod config;
pub mod document;
pub mod error;
pub mod export;
pub mod geometry;
pub mod raster;
pub mod renderer;
pub mod sanitize;
pub mod session;
pub mod style;
pub mod theme;
pub mod title;
pub mod viewport;

#[cfg(feature = "cli")]
pub use cli::run;
