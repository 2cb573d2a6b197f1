//! Plaintext download handle.

use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::error::{VaultError, VaultResult};
use crate::record::FileSummary;
use filevault_common::{ByteStream, Error};
use filevault_storage::StagedFile;

/// Read buffer size for staged plaintext.
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Decrypted file contents, streamed from a staged plaintext file.
///
/// The staged file is removed as soon as the stream ends, fails or the
/// handle is dropped, whichever comes first.
pub struct Download {
    summary: FileSummary,
    stream: ByteStream,
    staged: Option<StagedFile>,
}

impl Download {
    pub(crate) fn new(summary: FileSummary, staged: StagedFile, reader: File) -> Self {
        let stream = ReaderStream::with_capacity(reader, READ_CHUNK_SIZE)
            .map_ok(|chunk| chunk.to_vec())
            .map_err(Error::Io)
            .boxed();

        Self {
            summary,
            stream,
            staged: Some(staged),
        }
    }

    /// Record summary of the downloaded file.
    pub fn summary(&self) -> &FileSummary {
        &self.summary
    }

    /// Collect the whole plaintext into memory.
    pub async fn into_bytes(mut self) -> VaultResult<Vec<u8>> {
        let capacity = usize::try_from(self.summary.size_bytes).unwrap_or(0);
        let mut data = Vec::with_capacity(capacity);
        while let Some(chunk) = self.next().await {
            data.extend_from_slice(&chunk?);
        }
        Ok(data)
    }

    /// Close the reader and remove the staged file.
    fn release(&mut self) {
        self.stream = stream::empty().boxed();
        if let Some(staged) = self.staged.take() {
            drop(staged);
            debug!(file_id = %self.summary.id, "Download released");
        }
    }
}

impl Stream for Download {
    type Item = VaultResult<Vec<u8>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.staged.is_none() {
            return Poll::Ready(None);
        }

        match this.stream.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => Poll::Ready(Some(Ok(chunk))),
            Poll::Ready(Some(Err(e))) => {
                warn!(file_id = %this.summary.id, error = %e, "Staged plaintext read failed");
                this.release();
                Poll::Ready(Some(Err(VaultError::DecryptionFailed)))
            }
            Poll::Ready(None) => {
                this.release();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for Download {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Download {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Download")
            .field("summary", &self.summary)
            .field("staged", &self.staged.is_some())
            .finish()
    }
}
