pub mod capture;
pub mod content;
pub mod error;
pub mod export;
pub mod render;
