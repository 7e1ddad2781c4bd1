use crate::error::DeviceError;

/// Interface for a switchable light source
pub trait Illumination: Send {
    fn set_on(&mut self) -> Result<(), DeviceError>;

    fn set_off(&mut self) -> Result<(), DeviceError>;

    fn is_on(&self) -> bool;
}
