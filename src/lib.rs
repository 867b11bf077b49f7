//! StageCanvas: a zoomable multi-row photo canvas for AI-assisted staging.
//!
//! The crate is split so everything except [`app`] runs without a window:
//! the model, layout, viewport, selection and generation orchestration are
//! driven through [`controller::CanvasController`].

pub mod logger;

pub mod app;
pub mod backend;
pub mod cli;
pub mod compositor;
pub mod controller;
pub mod generation;
pub mod ids;
pub mod layout;
pub mod model;
pub mod selection;
pub mod settings;
pub mod viewport;
