//! Client side of rendition.
//!
//! This crate provides URL normalization and the headless-browser render
//! engine used by the server.

pub mod normalize;
pub mod render;

pub use normalize::{NormalizedUrl, Normalizer, UrlError};

pub use render::{
    BlockPolicy, Browser, Navigation, RenderEngine, RenderError, RenderOptions, RenderResult, Renderer, Session,
    SessionPool,
};

#[cfg(feature = "render")]
pub use render::chrome::{ChromeBrowser, ChromeSettings};
