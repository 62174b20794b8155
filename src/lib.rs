//! Core library for the vlips-capture application.
//!
//! An asynchronous still-image sampling pipeline. A device handle drives an
//! imaging device through focus/exposure convergence while an experiment
//! scheduler sequences repeated captures and hands every frame to a
//! persistence worker together with its computed metadata. The hardware
//! itself sits behind the [`camera::backend::CameraBackend`] trait; a
//! simulated implementation ships in-tree for tests and demos.

pub mod camera;
pub mod config;
pub mod error;
pub mod experiment;
pub mod metadata;
pub mod storage;
