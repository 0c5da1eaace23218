#![deny(nonstandard_style)]
#![deny(future_incompatible)]
#![deny(rust_2018_idioms)]
#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(unused)]

//! Borealis is a render hardware interface: a thin, handle-based layer that sits between an
//! engine's renderer and a low-level GPU driver. The crate owns resource identity (generational
//! handles), resource lifetime (typed pools plus deferred deletion), command recording,
//! submission and presentation. Everything above that - scenes, materials, windows, input -
//! belongs to the engine.

pub mod rhi;
pub mod surface;
