//! Public prelude of the crate containing the most commonly used types and functions.

pub use crate::{
    AiRange, AnalogIn, AnalogOut, Device, DigitalIn, DigitalOut, Error, Registry, Result,
    SampleMode, TrigSource, Wait,
};
