use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::{Bird, Sighting};

/// These are the request "commands" that a client can send to the server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    /// add a new bird to the store
    Add {
        /// unique name of the bird
        name: String,
        /// color of the bird
        color: String,
        /// weight of the bird
        weight: f64,
        /// height of the bird
        height: f64,
    },
    /// remove a bird and all of its sightings
    Remove {
        /// the name of the bird to remove
        name: String,
    },
    /// record a sighting of an existing bird
    AddSight {
        /// the name of the sighted bird
        name: String,
        /// where the bird was sighted
        location: String,
        /// when the bird was sighted, in epoch milliseconds
        timestamp: i64,
    },
    /// list all birds, sorted by name
    List,
    /// list sightings of birds whose name matches a pattern, within a time range
    ListSights {
        /// regular expression that bird names must fully match
        name: String,
        /// inclusive start of the time range, in epoch milliseconds
        start: i64,
        /// inclusive end of the time range, in epoch milliseconds
        end: i64,
    },
    /// stop the server
    Quit,
}

/// The payload of a successful query response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResultData {
    /// the birds returned by a `List` request
    Birds(Vec<Bird>),
    /// the sightings returned by a `ListSights` request
    Sightings(Vec<Sighting>),
}

/// The answer the server sends back for every request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// whether the request was executed successfully
    pub success: bool,
    /// a description of the failure when `success` is false
    pub error: Option<String>,
    /// query results, present for `List` and `ListSights` requests
    pub result: Option<ResultData>,
}

impl Response {
    /// a successful response carrying no data
    pub fn ok() -> Self {
        Response {
            success: true,
            error: None,
            result: None,
        }
    }

    /// a successful response carrying query results
    pub fn with_result(result: ResultData) -> Self {
        Response {
            success: true,
            error: None,
            result: Some(result),
        }
    }

    /// an unsuccessful response carrying an error message
    pub fn err(message: impl Into<String>) -> Self {
        Response {
            success: false,
            error: Some(message.into()),
            result: None,
        }
    }
}

/// Encodes a request or response value into its wire payload bytes.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Decodes wire payload bytes back into a request or response value.
///
/// # Errors
/// returns [`AviaryError::Decode`] if `bytes` does not contain a valid payload
///
/// [`AviaryError::Decode`]: ../enum.AviaryError.html
pub fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AviaryError;

    #[test]
    fn malformed_payload_is_a_decode_error() {
        let err = decode::<Request>(b"{ not json").unwrap_err();
        assert!(matches!(err, AviaryError::Decode(_)));
    }

    #[test]
    fn request_survives_the_wire_codec() {
        let req = Request::Add {
            name: "robin".to_owned(),
            color: "red".to_owned(),
            weight: 1.0,
            height: 2.0,
        };
        let bytes = encode(&req).unwrap();
        let decoded: Request = decode(&bytes).unwrap();
        match decoded {
            Request::Add { name, color, .. } => {
                assert_eq!(name, "robin");
                assert_eq!(color, "red");
            }
            other => panic!("decoded the wrong variant: {:?}", other),
        }
    }
}
