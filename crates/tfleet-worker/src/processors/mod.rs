//! Built-in processors.

mod image;
mod video;

pub use image::ImageProcessor;
pub use video::VideoProcessor;

use serde::{Deserialize, Deserializer};

use tfleet_storage::ResourceHandle;

/// Accept either a single object or a list of them.
fn one_or_many<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    // Lists first: structs with defaults also accept sequences
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany<T> {
        Many(Vec<T>),
        One(T),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::Many(items) => items,
        OneOrMany::One(item) => vec![item],
    })
}

/// URL reported back for an output: its public URL, or the URI it was
/// written to when it has none.
fn reported_url(handle: &ResourceHandle) -> String {
    handle.public_url().unwrap_or_else(|| handle.url().to_string())
}
