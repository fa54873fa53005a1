use std::io::{BufRead, BufReader, ErrorKind, Read};

use serde::de::{DeserializeOwned, IgnoredAny};

use super::{PeerError, MAX_REQUEST_SIZE};

/// Splits a stream of back to back JSON objects into single requests.
///
/// Reads up to each `}` and stops as soon as the bytes read so far form a
/// complete JSON value.
#[derive(Debug)]
pub struct RequestFramer<R> {
    reader: BufReader<R>,
    max_size: usize,
}

impl<R: Read> RequestFramer<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            max_size: MAX_REQUEST_SIZE,
        }
    }

    /// Override [MAX_REQUEST_SIZE].
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;

        self
    }

    pub fn get_ref(&self) -> &R {
        self.reader.get_ref()
    }

    /// Next complete request, or `None` if the stream ended between requests.
    pub fn next_request(&mut self) -> Result<Option<Vec<u8>>, PeerError> {
        let mut request = Vec::new();

        loop {
            // One byte past the limit is enough to tell the request is too large.
            let limit = (self.max_size + 1).saturating_sub(request.len()) as u64;

            let read = (&mut self.reader)
                .take(limit)
                .read_until(b'}', &mut request)?;

            if request.len() > self.max_size {
                return Err(PeerError::RequestTooLarge(request.len()));
            }

            if read == 0 {
                if request.iter().all(u8::is_ascii_whitespace) {
                    return Ok(None);
                }

                return Err(PeerError::Truncated);
            }

            if request.last() == Some(&b'}') && is_valid_json(&request) {
                return Ok(Some(request));
            }
        }
    }

    /// Next message decoded as `T`, failing if the stream ended.
    pub fn next_message<T: DeserializeOwned>(&mut self) -> Result<T, PeerError> {
        let bytes = self.next_request()?.ok_or(PeerError::ConnectionClosed)?;

        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Exactly `len` raw bytes following the last message, like a blob.
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, PeerError> {
        let mut bytes = vec![0; len];

        self.reader
            .read_exact(&mut bytes)
            .map_err(|error| match error.kind() {
                ErrorKind::UnexpectedEof => PeerError::Truncated,
                _ => PeerError::IO(error),
            })?;

        Ok(bytes)
    }
}

fn is_valid_json(bytes: &[u8]) -> bool {
    serde_json::from_slice::<IgnoredAny>(bytes).is_ok()
}
