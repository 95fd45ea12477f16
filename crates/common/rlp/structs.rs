use bytes::BufMut;

use super::{
    decode::{RLPDecode, get_item_with_prefix},
    encode::{RLPEncode, encode_list_header},
    error::RLPDecodeError,
};

/// # Struct decoding helper
///
/// Decodes a struct from an RLP list, field by field, in the order the fields
/// are passed to [`Decoder::decode_field`]. [`Decoder::finish`] checks the
/// whole payload was consumed.
#[derive(Debug)]
#[must_use = "`Decoder` must be consumed with `finish` to perform decoding checks"]
pub struct Decoder<'a> {
    payload: &'a [u8],
    remaining: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Result<Self, RLPDecodeError> {
        match super::decode::decode_rlp_item(buf)? {
            (true, payload, remaining) => Ok(Self { payload, remaining }),
            (false, _, _) => Err(RLPDecodeError::UnexpectedString),
        }
    }

    pub fn decode_field<T: RLPDecode>(self, name: &str) -> Result<(T, Self), RLPDecodeError> {
        let (field, rest) = <T as RLPDecode>::decode_unfinished(self.payload)
            .map_err(|err| RLPDecodeError::Custom(format!("field '{name}': {err}")))?;
        Ok((
            field,
            Self {
                payload: rest,
                ..self
            },
        ))
    }

    /// Returns the next field without decoding it, prefix included.
    pub fn get_encoded_item(self) -> Result<(&'a [u8], Self), RLPDecodeError> {
        let (item, rest) = get_item_with_prefix(self.payload)?;
        Ok((
            item,
            Self {
                payload: rest,
                ..self
            },
        ))
    }

    pub fn is_done(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn finish(self) -> Result<&'a [u8], RLPDecodeError> {
        if !self.payload.is_empty() {
            return Err(RLPDecodeError::MalformedData);
        }
        Ok(self.remaining)
    }
}

/// # Struct encoding helper
///
/// Encodes a struct as an RLP list, buffering the fields and emitting the
/// list header on [`Encoder::finish`].
#[must_use = "`Encoder` must be consumed with `finish` to write the encoded data"]
pub struct Encoder<'a> {
    buf: &'a mut dyn BufMut,
    temp_buf: Vec<u8>,
}

impl<'a> core::fmt::Debug for Encoder<'a> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Encoder").finish_non_exhaustive()
    }
}

impl<'a> Encoder<'a> {
    pub fn new(buf: &'a mut dyn BufMut) -> Self {
        Self {
            buf,
            temp_buf: Vec::new(),
        }
    }

    pub fn encode_field<T: RLPEncode>(mut self, value: &T) -> Self {
        value.encode(&mut self.temp_buf);
        self
    }

    /// Appends a field that is already RLP-encoded.
    pub fn encode_raw(mut self, value: &[u8]) -> Self {
        self.temp_buf.extend_from_slice(value);
        self
    }

    pub fn finish(self) {
        encode_list_header(self.temp_buf.len(), self.buf);
        self.buf.put_slice(&self.temp_buf);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    struct Simple {
        a: u8,
        b: u64,
    }

    impl RLPEncode for Simple {
        fn encode(&self, buf: &mut dyn BufMut) {
            Encoder::new(buf)
                .encode_field(&self.a)
                .encode_field(&self.b)
                .finish();
        }
    }

    impl RLPDecode for Simple {
        fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
            let decoder = Decoder::new(rlp)?;
            let (a, decoder) = decoder.decode_field("a")?;
            let (b, decoder) = decoder.decode_field("b")?;
            Ok((Simple { a, b }, decoder.finish()?))
        }
    }

    #[test]
    fn struct_roundtrip() {
        let value = Simple { a: 61, b: 75 };
        let encoded = value.encode_to_vec();
        assert_eq!(encoded, [0xc2, 61, 75]);
        assert_eq!(Simple::decode(&encoded).unwrap(), value);
    }
}
