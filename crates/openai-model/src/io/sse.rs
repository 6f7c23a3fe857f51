use super::{Chunks, ChunksError};

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    ChunksError(ChunksError),
    InvalidPayload,
}

/// A type for reading the `data` payloads of server-sent events from a
/// chunk stream.
///
/// Comment lines and fields other than `data` are skipped. Multiple
/// `data` lines of one event are joined with a line feed.
pub struct Sse {
    buf: String,
    // Holds the tail of a chunk that ended in the middle of a UTF-8
    // sequence.
    raw: Vec<u8>,
    chunks: Chunks,
}

impl Sse {
    #[inline]
    pub fn new(chunks: Chunks) -> Self {
        Self {
            buf: String::new(),
            raw: Vec::new(),
            chunks,
        }
    }

    pub async fn next_event(&mut self) -> Result<Option<String>, Error> {
        loop {
            // Drain what we already have before touching the network.
            if let Some(event) = self.try_parse_event()? {
                return Ok(Some(event));
            }

            let Some(bytes) =
                self.chunks.next_chunk().await.map_err(Error::ChunksError)?
            else {
                return Ok(None);
            };
            self.raw.extend_from_slice(&bytes);
            let valid_len = match str::from_utf8(&self.raw) {
                Ok(s) => s.len(),
                // `error_len() == None` means the input is just truncated.
                Err(err) if err.error_len().is_none() => err.valid_up_to(),
                Err(_) => return Err(Error::InvalidPayload),
            };
            let rest = self.raw.split_off(valid_len);
            let text = std::mem::replace(&mut self.raw, rest);
            let text =
                String::from_utf8(text).map_err(|_| Error::InvalidPayload)?;
            self.buf.push_str(&text.replace("\r\n", "\n"));
        }
    }

    fn try_parse_event(&mut self) -> Result<Option<String>, Error> {
        loop {
            let Some(eol_idx) = self.buf.find("\n\n") else {
                return Ok(None);
            };
            let block: String = self.buf.drain(..eol_idx + 2).collect();

            let mut data: Option<String> = None;
            for line in block.lines() {
                if line.is_empty() || line.starts_with(':') {
                    continue;
                }
                let Some((name, value)) = line.split_once(':') else {
                    return Err(Error::InvalidPayload);
                };
                if name != "data" {
                    continue;
                }
                let value = value.strip_prefix(' ').unwrap_or(value);
                match &mut data {
                    Some(data) => {
                        data.push('\n');
                        data.push_str(value);
                    }
                    None => data = Some(value.to_owned()),
                }
            }

            // Blocks made of comments only (keep-alives) carry no event.
            if let Some(data) = data {
                return Ok(Some(data));
            }
        }
    }
}
