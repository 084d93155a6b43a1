//! Audio handling outside the detectors.

pub mod convert;
pub mod wav;
