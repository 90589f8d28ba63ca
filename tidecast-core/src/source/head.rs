//! Bounded capture of a stream's head for probing, with replay.
//!
//! Probing needs the first megabytes of the container, but the same upstream
//! connection must then feed the transcoder. The captured chunks are replayed
//! in front of the untouched remainder so the source is never re-opened.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use futures::stream;

use super::{ByteStream, SourceResult};

/// The first bytes of an upstream stream plus the unread remainder.
pub struct SourceHead {
    chunks: Vec<Bytes>,
    len: usize,
    rest: Option<ByteStream>,
}

impl SourceHead {
    /// Reads chunks from `stream` until at least `limit` bytes are buffered
    /// or the stream ends.
    ///
    /// At most one chunk past `limit` is held, so memory stays bounded by
    /// `limit` plus the upstream chunk size.
    ///
    /// # Errors
    ///
    /// - `SourceError::Body` - The upstream failed while the head was read
    pub async fn capture(mut stream: ByteStream, limit: usize) -> SourceResult<Self> {
        let mut chunks = Vec::new();
        let mut len = 0;

        while len < limit {
            match stream.next().await {
                Some(Ok(chunk)) => {
                    len += chunk.len();
                    chunks.push(chunk);
                }
                Some(Err(e)) => return Err(e),
                None => {
                    return Ok(Self {
                        chunks,
                        len,
                        rest: None,
                    });
                }
            }
        }

        Ok(Self {
            chunks,
            len,
            rest: Some(stream),
        })
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing was buffered.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the whole upstream body fit in the head.
    pub fn is_complete(&self) -> bool {
        self.rest.is_none()
    }

    /// Buffered bytes as one contiguous block.
    pub fn contiguous(&self) -> Bytes {
        match self.chunks.as_slice() {
            [] => Bytes::new(),
            [single] => single.clone(),
            chunks => {
                let mut joined = BytesMut::with_capacity(self.len);
                for chunk in chunks {
                    joined.extend_from_slice(chunk);
                }
                joined.freeze()
            }
        }
    }

    /// Replays the buffered head followed by the rest of the upstream.
    pub fn replay(self) -> ByteStream {
        let head = stream::iter(self.chunks.into_iter().map(Ok));
        match self.rest {
            Some(rest) => head.chain(rest).boxed(),
            None => head.boxed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;

    use super::*;
    use crate::source::SourceError;

    fn chunked(chunks: &[&'static str]) -> ByteStream {
        let chunks: Vec<_> = chunks
            .iter()
            .map(|c| Ok(Bytes::from_static(c.as_bytes())))
            .collect();
        stream::iter(chunks).boxed()
    }

    #[tokio::test]
    async fn test_capture_stops_at_limit_and_replays_everything() {
        let source = chunked(&["abcd", "efgh", "ijkl", "mnop"]);

        let head = SourceHead::capture(source, 6).await.unwrap();
        assert_eq!(head.len(), 8);
        assert!(!head.is_complete());
        assert_eq!(head.contiguous(), Bytes::from_static(b"abcdefgh"));

        let replayed: Vec<Bytes> = head.replay().try_collect().await.unwrap();
        assert_eq!(replayed.concat(), b"abcdefghijklmnop".to_vec());
    }

    #[tokio::test]
    async fn test_short_stream_is_complete() {
        let head = SourceHead::capture(chunked(&["tiny"]), 1024)
            .await
            .unwrap();

        assert!(head.is_complete());
        assert_eq!(head.contiguous(), Bytes::from_static(b"tiny"));
    }

    #[tokio::test]
    async fn test_upstream_error_during_capture() {
        let source = stream::iter(vec![
            Ok(Bytes::from_static(b"ok")),
            Err(SourceError::Body {
                reason: "reset".to_string(),
            }),
        ])
        .boxed();

        let result = SourceHead::capture(source, 1024).await;
        assert!(matches!(result, Err(SourceError::Body { .. })));
    }
}
