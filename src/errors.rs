// Error types for taller

use snafu::Snafu;
use std::io;

#[derive(Debug, Snafu)]
pub enum TallerError {
    // Registration form errors
    #[snafu(display("Missing required input: {field}"))]
    MissingInput { field: String },
    #[snafu(display("Invalid user input: {field} - {reason}"))]
    InvalidUserInput { field: String, reason: String },

    // Shared store errors
    #[snafu(display("Could not write to shared store at {path}: {reason}"))]
    StoreWrite { path: String, reason: String },
    #[snafu(display("Could not read from shared store at {path}: {reason}"))]
    StoreRead { path: String, reason: String },
    #[snafu(display("Unexpected value in shared store at {path}"))]
    StoreDecode {
        path: String,
        source: serde_json::Error,
    },

    // Image errors
    #[snafu(display("Unable to read image file"))]
    ImageIOError { source: io::Error },
    #[snafu(display("Unable to decode image"))]
    ImageDecode { source: image::ImageError },
    #[snafu(display("Unable to encode image"))]
    ImageEncode { source: image::ImageError },
    #[snafu(display("Invalid image data: {reason}"))]
    InvalidImageData { reason: String },

    // Config management errors
    #[snafu(display("Could not find application data directory to save config file"))]
    NoConfigDir,
    #[snafu(display("Error writing config file"))]
    ConfigIOError { source: io::Error },
    #[snafu(display("Error serializing config file"))]
    ConfigSerializeError { source: serde_json::Error },

    // CLI scenario and event log errors
    #[snafu(display("Error loading scenario file"))]
    ScenarioLoaderError { source: io::Error },
    #[snafu(display("Error writing event log"))]
    EventWriterError { source: io::Error },
}

impl TallerError {
    /// Errors the user can fix by completing or correcting the form, as opposed to
    /// transport or decode failures that need a retry.
    pub fn is_user_input(&self) -> bool {
        matches!(
            self,
            TallerError::MissingInput { .. } | TallerError::InvalidUserInput { .. }
        )
    }
}
