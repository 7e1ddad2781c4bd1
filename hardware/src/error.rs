use thiserror::Error;

/// Failure reported by a device or by the device context
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("capture failed: {0}")]
    Capture(String),

    #[error("stage motion failed: {0}")]
    Motion(String),

    #[error("illumination failed: {0}")]
    Illumination(String),

    #[error("devices busy: '{requested}' refused while '{active}' holds the session")]
    Busy { requested: String, active: String },

    #[error("configuration error: {0}")]
    Configuration(String),
}
