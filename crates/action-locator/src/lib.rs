//! Element location and self-healing actions
//!
//! This crate implements the element resolution side of Optics:
//! - Capability ports for element sources, drivers and detectors
//! - Location strategies over every enabled (source, detector) pairing
//! - A strategy manager yielding successful locations lazily, in order
//! - The self-healing pipeline that falls back across located candidates
//! - The keyword action surface, presence verification and keyword registry

pub mod actions;
pub mod errors;
pub mod healer;
pub mod keywords;
pub mod ports;
pub mod resolver;
pub mod strategies;
pub mod verifier;

pub use actions::*;
pub use errors::*;
pub use healer::*;
pub use keywords::*;
pub use ports::*;
pub use resolver::*;
pub use strategies::*;
pub use verifier::*;
