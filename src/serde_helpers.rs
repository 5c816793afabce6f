//! Decoding of response payloads into caller-chosen types.
//!
//! When the `tracing` feature is enabled, fields the target type does not capture are
//! logged, which surfaces daemon upgrades that add or rename fields.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::Result;
use crate::error::Error;

/// Decode `value` into `T`, failing with [`crate::error::Kind::MalformedResponse`]
/// when the payload does not fit.
#[cfg(feature = "tracing")]
pub(crate) fn deserialize_with_warnings<T: DeserializeOwned>(value: Value) -> Result<T> {
    use std::any::type_name;

    tracing::trace!(type_name = %type_name::<T>(), json = %value, "deserializing JSON");

    let mut unknown_paths: Vec<String> = Vec::new();
    let mut track = serde_path_to_error::Track::new();
    let result: T = serde_ignored::deserialize(
        serde_path_to_error::Deserializer::new(value, &mut track),
        |path| unknown_paths.push(path.to_string()),
    )
    .map_err(|e| {
        let path = track.path();
        tracing::error!(
            type_name = %type_name::<T>(),
            path = %path,
            error = %e,
            "deserialization failed"
        );
        Error::malformed(format!("{} at {path}: {e}", type_name::<T>()))
    })?;

    for path in unknown_paths {
        tracing::warn!(
            type_name = %type_name::<T>(),
            field = %path,
            "unknown field in server response"
        );
    }

    Ok(result)
}

/// Pass-through decoding when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub(crate) fn deserialize_with_warnings<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| {
        Error::malformed(format!("{}: {e}", std::any::type_name::<T>()))
    })
}
