use bytes::{Buf, Bytes, BytesMut};
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};

const HEADER_END: &[u8] = b"\r\n\r\n";
const MAX_HEADERS: usize = 32;
/// Largest body accepted; a bigger Content-Length ends the connection.
pub const MAX_BODY: usize = 64 * 1024 * 1024;

/// Content-Length framing: a header block ending in `\r\n\r\n`, followed by
/// exactly that many bytes of JSON body.
///
/// Decoding yields raw bodies so that a body which is not valid JSON can
/// still be reported per message instead of tearing down the stream.
#[derive(Debug, Default)]
pub struct MessageCodec {
    content_length: Option<usize>,
}

fn invalid(reason: impl Into<String>) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, reason.into())
}

impl MessageCodec {
    fn parse_header(&self, src: &[u8]) -> Result<Option<(usize, usize)>, std::io::Error> {
        let Some(end) = memchr::memmem::find(src, HEADER_END) else {
            return Ok(None);
        };
        let block = &src[..end + HEADER_END.len()];

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let parsed = match httparse::parse_headers(block, &mut headers) {
            Ok(httparse::Status::Complete((_, parsed))) => parsed,
            Ok(httparse::Status::Partial) => return Ok(None),
            Err(e) => return Err(invalid(format!("bad header block: {e}"))),
        };

        let length = parsed
            .iter()
            .find(|header| header.name.eq_ignore_ascii_case("Content-Length"))
            .ok_or_else(|| invalid("missing Content-Length header"))?;
        let length = std::str::from_utf8(length.value)
            .ok()
            .and_then(|value| value.trim().parse::<usize>().ok())
            .ok_or_else(|| invalid("Content-Length is not a number"))?;
        if length > MAX_BODY {
            return Err(invalid(format!(
                "Content-Length exceeds {MAX_BODY} bytes: {length}"
            )));
        }

        Ok(Some((block.len(), length)))
    }
}

impl Decoder for MessageCodec {
    type Item = Bytes;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.content_length.is_none() {
            match self.parse_header(src)? {
                Some((header_len, content_length)) => {
                    src.advance(header_len);
                    self.content_length = Some(content_length);
                }
                None => return Ok(None),
            }
        }

        match self.content_length {
            Some(len) if src.len() >= len => {
                self.content_length = None;
                Ok(Some(src.split_to(len).freeze()))
            }
            Some(len) => {
                // bounded by MAX_BODY in parse_header
                src.reserve(len - src.len());
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

impl<T: Serialize> Encoder<T> for MessageCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = serde_json::to_vec(&item)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        dst.reserve(header.len() + body.len());
        dst.extend_from_slice(header.as_bytes());
        dst.extend_from_slice(&body);
        Ok(())
    }
}
