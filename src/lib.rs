//! Download proxy for TikTok/Douyin posts.
//!
//! `/tiktok` resolves a post through the hybrid scraper API and answers with
//! sealed, self-expiring download links; `/download` and `/download-slideshow`
//! redeem them. See [`token`] for the link format.

pub mod config;
pub mod error;
pub mod links;
pub mod media;
pub mod routes;
pub mod scraper;
pub mod slideshow;
pub mod token;

pub use config::AppConfig;
pub use error::ApiError;
pub use routes::{AppState, build_cors_layer, build_router};
pub use token::{LinkSealer, TokenError, seal, unseal};
