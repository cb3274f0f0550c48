//! splashcursor - GPU-resident fluid simulation cursor effect
//!
//! An incompressible Navier-Stokes-style solver (semi-Lagrangian advection,
//! Jacobi pressure projection, vorticity confinement) running as a chain of
//! fragment-shader passes over ping-pong render targets, driven by pointer
//! input. The library owns all GPU state; the binary wires it to a winit
//! window.

pub mod color;
pub mod config;
pub mod context;
pub mod material;
pub mod pointer;
pub mod sim;
pub mod targets;

pub use color::Color;
pub use config::SplashConfig;
pub use context::{GpuCaps, GpuContext};
pub use pointer::Pointer;
pub use sim::Simulation;
