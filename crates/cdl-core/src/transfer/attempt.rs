//! Body sink for one transfer attempt: range checks, throttling, writes, checkpoints.

use std::time::Instant;

use super::{ProgressSink, TransferContext};
use crate::job::UnitUpdate;
use crate::retry::TransferError;
use crate::storage::PartFile;
use crate::transport::{BodySink, FetchError, FetchRequest, ResponseHead};

pub(super) struct AttemptSink<'a, 'c> {
    part: &'a mut PartFile,
    ctx: &'a TransferContext<'c>,
    progress: &'a mut dyn ProgressSink,
    expected: &'a mut Option<u64>,
    offset: u64,
    /// Bytes of already-written prefix still to drop (server ignored `Range`).
    skip: u64,
    last_checkpoint: Instant,
}

impl<'a, 'c> AttemptSink<'a, 'c> {
    pub(super) fn new(
        part: &'a mut PartFile,
        ctx: &'a TransferContext<'c>,
        progress: &'a mut dyn ProgressSink,
        expected: &'a mut Option<u64>,
    ) -> Self {
        let offset = part.len();
        Self {
            part,
            ctx,
            progress,
            expected,
            offset,
            skip: 0,
            last_checkpoint: Instant::now(),
        }
    }

    pub(super) fn run(&mut self, url: &str) -> Result<(), FetchError> {
        let req = FetchRequest {
            url,
            headers: self.ctx.headers,
            offset: self.offset,
            chunk_size: self.ctx.chunk_size,
        };
        let transport = self.ctx.transport;
        transport.get(&req, self)
    }

    fn storage(e: std::io::Error) -> FetchError {
        FetchError::Failed(TransferError::Storage(e))
    }
}

impl BodySink for AttemptSink<'_, '_> {
    fn on_head(&mut self, head: &ResponseHead) -> Result<(), FetchError> {
        let body_offset = if head.status == 206 {
            if let Some(range) = head.content_range {
                if range.start != self.offset {
                    return Err(FetchError::Failed(TransferError::RangeMismatch {
                        requested: self.offset,
                        served: range.start,
                    }));
                }
            }
            self.offset
        } else {
            if self.offset > 0 {
                tracing::debug!(
                    status = head.status,
                    offset = self.offset,
                    "server ignored range request; discarding prefix"
                );
            }
            self.skip = self.offset;
            0
        };

        let total = head.total_length(body_offset);
        if total != *self.expected {
            *self.expected = total;
            self.progress.update(UnitUpdate::Length(total));
        }
        Ok(())
    }

    fn on_chunk(&mut self, chunk: &[u8]) -> Result<(), FetchError> {
        let mut data = chunk;
        if self.skip > 0 {
            let n = (self.skip as usize).min(data.len());
            self.skip -= n as u64;
            data = &data[n..];
        }

        if !data.is_empty() {
            self.ctx
                .limiter
                .acquire(data.len() as u64, self.ctx.signal)
                .map_err(FetchError::Stopped)?;
            self.part.append(data).map_err(Self::storage)?;
            self.progress.update(UnitUpdate::Progress(self.part.len()));

            if self.last_checkpoint.elapsed() >= self.ctx.checkpoint_interval {
                self.part.sync().map_err(Self::storage)?;
                self.progress.update(UnitUpdate::Checkpoint(self.part.len()));
                self.last_checkpoint = Instant::now();
            }
        }

        match self.ctx.signal.check() {
            Some(stop) => Err(FetchError::Stopped(stop)),
            None => Ok(()),
        }
    }
}
