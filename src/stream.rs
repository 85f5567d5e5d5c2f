//! Chunked streaming of stored documents.
//!
//! [`document_stream`] turns a store reader into a `Stream` of byte chunks of
//! at most [`CHUNK_SIZE`] bytes, so a caller can forward a paper to a socket
//! or file without holding it in memory. The reader is closed when the
//! stream ends, fails, or is dropped.

use crate::error::{PaperError, StorageError};
use crate::store::DocumentReader;
use futures::stream;
use std::pin::Pin;
use tokio::io::AsyncReadExt;
use tokio_stream::Stream;

/// Read buffer size.
pub const CHUNK_SIZE: usize = 8 * 1024;

/// A boxed stream of document chunks.
pub type DocumentStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, PaperError>> + Send>>;

pub fn document_stream(reader: DocumentReader, paper_id: impl Into<String>) -> DocumentStream {
    let paper_id = paper_id.into();
    let s = stream::unfold(Some(reader), move |state| {
        let paper_id = paper_id.clone();
        async move {
            let mut reader = state?;
            let mut buf = vec![0u8; CHUNK_SIZE];
            match reader.read(&mut buf).await {
                Ok(0) => None,
                Ok(n) => {
                    buf.truncate(n);
                    Some((Ok(buf), Some(reader)))
                }
                Err(e) => {
                    let err = StorageError::io("stream document", paper_id.as_str(), e);
                    Some((Err(err.into()), None))
                }
            }
        }
    });
    Box::pin(s)
}
