//! deskcast - real-time transport core for a shared remote desktop
//!
//! This crate connects many viewers to one desktop: a signaling websocket
//! per viewer, a WebRTC peer connection per watching viewer and the session
//! registry that elects who controls the desktop.

pub mod capture;
pub mod config;
pub mod desktop;
pub mod error;
pub mod events;
pub mod session;
pub mod state;
pub mod utils;
pub mod web;
pub mod webrtc;
pub mod websocket;

pub use error::{AppError, Result};
