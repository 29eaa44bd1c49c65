pub mod annotate;
pub mod assets;
pub mod components;
pub mod config;
pub mod errors;
pub mod figma_client;
pub mod frame_render;
pub mod pipeline;
pub mod retry;
pub mod source;
pub mod tokens;
pub mod types;
pub mod walker;
