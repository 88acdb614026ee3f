use crate::error::{EngineError, EngineResult};
use serde::de::DeserializeOwned;

/// Deserialize with JSON-path context in error messages.
pub fn from_str<T: DeserializeOwned>(src: &str) -> EngineResult<T> {
    let de = &mut serde_json::Deserializer::from_str(src);
    serde_path_to_error::deserialize::<_, T>(de).map_err(into_decode_error)
}

pub fn from_slice<T: DeserializeOwned>(bytes: &[u8]) -> EngineResult<T> {
    let de = &mut serde_json::Deserializer::from_slice(bytes);
    serde_path_to_error::deserialize::<_, T>(de).map_err(into_decode_error)
}

/// Same as [`from_str`] for an already parsed value.
pub fn from_value<T: DeserializeOwned>(value: serde_json::Value) -> EngineResult<T> {
    serde_path_to_error::deserialize::<_, T>(value).map_err(|err| EngineError::Decode {
        path: err.path().to_string(),
        message: err.into_inner().to_string(),
    })
}

/// Malformed JSON has no meaningful field path and is reported as is.
fn into_decode_error(err: serde_path_to_error::Error<serde_json::Error>) -> EngineError {
    if err.inner().is_syntax() || err.inner().is_eof() {
        return EngineError::Serialization(err.into_inner());
    }
    EngineError::Decode {
        path: err.path().to_string(),
        message: err.into_inner().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::Patch;

    #[test]
    fn bad_field_reports_its_path() {
        let err = from_str::<Vec<Patch>>(r#"[{"op": "replace", "path": "/a"}, {"op": "bogus", "path": "/b"}]"#)
            .unwrap_err();
        let EngineError::Decode { path, .. } = &err else {
            panic!("unexpected error {err}");
        };
        assert_eq!(path, "[1].op");
    }

    #[test]
    fn malformed_json_is_a_serialization_error() {
        let err = from_str::<Vec<Patch>>(r#"[{"op": "replace""#).unwrap_err();
        assert!(matches!(err, EngineError::Serialization(ref inner) if inner.is_eof()), "{err}");

        let err = from_slice::<Vec<Patch>>(b"[1,,]").unwrap_err();
        assert!(matches!(err, EngineError::Serialization(ref inner) if inner.is_syntax()), "{err}");
    }
}
