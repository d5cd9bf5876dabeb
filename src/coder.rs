use crate::error::{Error, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// An object that can encode a particular type to, and decode it from, a
/// `Vec<u8>`. The implementation can be based on a `serde` data format, or
/// anything else.
pub trait Coder {
    type Type;

    /// Consume an instance of the encodable type and convert it to bytes.
    fn encode(&self, inst: Self::Type) -> Result<Vec<u8>>;

    /// Decode a buffer of bytes to the decodable type.
    fn decode(&self, data: &[u8]) -> Result<Self::Type>;
}

/// The closed set of values that can travel in a message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Text(String),
    Integer(i64),
}

impl Payload {
    /// A short name for the variant, used in type-mismatch errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Text(_) => "text",
            Payload::Integer(_) => "integer",
        }
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_owned())
    }
}

impl From<i64> for Payload {
    fn from(x: i64) -> Self {
        Payload::Integer(x)
    }
}

impl From<i32> for Payload {
    fn from(x: i32) -> Self {
        Payload::Integer(x.into())
    }
}

impl From<u32> for Payload {
    fn from(x: u32) -> Self {
        Payload::Integer(x.into())
    }
}

impl TryFrom<Payload> for String {
    type Error = Error;

    fn try_from(payload: Payload) -> Result<Self> {
        match payload {
            Payload::Text(s) => Ok(s),
            other => Err(Error::TypeMismatch {
                expected: "text",
                found: other.kind(),
            }),
        }
    }
}

impl TryFrom<Payload> for i64 {
    type Error = Error;

    fn try_from(payload: Payload) -> Result<Self> {
        match payload {
            Payload::Integer(x) => Ok(x),
            other => Err(Error::TypeMismatch {
                expected: "integer",
                found: other.kind(),
            }),
        }
    }
}

/// A type that a call site can both send and receive. Each `send`/`receive`
/// pair commits to one of these at compile time.
pub trait Value: Into<Payload> + TryFrom<Payload, Error = Error> {}

impl<T> Value for T where T: Into<Payload> + TryFrom<Payload, Error = Error> {}

/// A `Coder` based on the CBOR data format.
pub struct CborCoder<T> {
    phantom: std::marker::PhantomData<T>,
}

impl<T> CborCoder<T> {
    pub fn new() -> Self {
        Self {
            phantom: std::marker::PhantomData::<T> {},
        }
    }
}

impl<T> Default for CborCoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Coder for CborCoder<T>
where
    T: Serialize + DeserializeOwned,
{
    type Type = T;

    fn encode(&self, inst: Self::Type) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        ciborium::ser::into_writer(&inst, &mut buffer)
            .map_err(|e| Error::Codec(format!("{:?}", e)))?;
        Ok(buffer)
    }

    fn decode(&self, data: &[u8]) -> Result<Self::Type> {
        ciborium::de::from_reader(data).map_err(|e| Error::Codec(format!("{:?}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_variant_survives_encoding() {
        let coder = CborCoder::<Payload>::new();
        let text = coder.encode(Payload::from("42")).unwrap();
        let integer = coder.encode(Payload::from(42i64)).unwrap();
        assert_eq!(coder.decode(&text).unwrap(), Payload::Text("42".into()));
        assert_eq!(coder.decode(&integer).unwrap(), Payload::Integer(42));
    }

    #[test]
    fn wrong_variant_is_a_type_mismatch() {
        match i64::try_from(Payload::from("Ping!")) {
            Err(Error::TypeMismatch { expected, found }) => {
                assert_eq!(expected, "integer");
                assert_eq!(found, "text");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(String::try_from(Payload::Integer(3)).is_err());
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let coder = CborCoder::<Payload>::new();
        assert!(matches!(coder.decode(&[0xff, 0x00, 0x13]), Err(Error::Codec(_))));
    }
}
