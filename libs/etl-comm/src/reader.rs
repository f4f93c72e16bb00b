// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Readers returned by batch transforms

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use xcopy_cluster::ObjReader;
use xcopy_types::SIZE_UNKNOWN;

use crate::deadline::Deadline;
use crate::stats::Stats;

type CloseCb = Box<dyn FnOnce() + Send>;

/// Stream of transformed bytes.
///
/// Closing (or dropping) the reader releases its deadline. The completion
/// callback then runs once, and only if the stream reached a clean EOF; a
/// reader abandoned early, failed, or cut off by its deadline skips it.
pub struct TransformReader {
    inner: ObjReader,
    size: i64,
    deadline: Deadline,
    read_counter: Option<Arc<Stats>>,
    on_complete: Option<CloseCb>,
    eof: bool,
    failed: bool,
}

impl TransformReader {
    pub fn new(inner: ObjReader, size: i64) -> Self {
        Self {
            inner,
            size,
            deadline: Deadline::none(),
            read_counter: None,
            on_complete: None,
            eof: false,
            failed: false,
        }
    }

    /// Fail reads with `TimedOut` once `deadline` passes.
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    /// Count bytes read into `stats.out_bytes`.
    pub fn counting(mut self, stats: Arc<Stats>) -> Self {
        self.read_counter = Some(stats);
        self
    }

    pub fn on_complete(mut self, cb: impl FnOnce() + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(cb));
        self
    }

    /// True once a read hit EOF without an earlier error.
    pub fn is_complete(&self) -> bool {
        self.eof && !self.failed
    }

    /// Byte count if known up front, else `SIZE_UNKNOWN`.
    pub fn size(&self) -> i64 {
        if self.size < 0 { SIZE_UNKNOWN } else { self.size }
    }

    pub fn close(self) {
        drop(self);
    }
}

impl AsyncRead for TransformReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        let before = buf.filled().len();
        let room = buf.remaining() > 0;
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let n = buf.filled().len() - before;
                if n == 0 && room {
                    this.eof = true;
                }
                if let Some(stats) = &this.read_counter {
                    stats.add_out(n as u64);
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => {
                this.failed = true;
                Poll::Ready(Err(e))
            }
            Poll::Pending => {
                if this.deadline.poll_expired(cx) {
                    this.failed = true;
                    return Poll::Ready(Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "transform deadline exceeded",
                    )));
                }
                Poll::Pending
            }
        }
    }
}

impl Drop for TransformReader {
    fn drop(&mut self) {
        self.deadline = Deadline::none();
        let complete = self.is_complete();
        if let Some(cb) = self.on_complete.take() {
            if complete {
                cb();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_counts_and_completes_once() {
        let stats = Arc::new(Stats::new());
        let closes = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&closes);

        let mut reader = TransformReader::new(Box::new(&b"0123456789"[..]), 10)
            .counting(Arc::clone(&stats))
            .on_complete(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert!(reader.is_complete());
        assert_eq!(out.len(), 10);
        assert_eq!(stats.snapshot().out_bytes, 10);
        assert_eq!(closes.load(Ordering::SeqCst), 0);

        reader.close();
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deadline_interrupts_stalled_read() {
        let (_writer, pipe) = tokio::io::duplex(64);
        let mut reader = TransformReader::new(Box::new(pipe), SIZE_UNKNOWN)
            .with_deadline(Deadline::new(Duration::from_millis(20)));
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_timed_out_reader_is_not_complete() {
        let completions = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&completions);
        let (_writer, pipe) = tokio::io::duplex(64);
        let mut reader = TransformReader::new(Box::new(pipe), SIZE_UNKNOWN)
            .with_deadline(Deadline::new(Duration::from_millis(20)))
            .on_complete(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });

        assert!(reader.read_to_end(&mut Vec::new()).await.is_err());
        assert!(!reader.is_complete());
        reader.close();
        assert_eq!(completions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_abandoned_reader_is_not_complete() {
        let completions = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&completions);
        let mut reader = TransformReader::new(Box::new(&b"0123456789"[..]), 10).on_complete(
            move || {
                c.fetch_add(1, Ordering::SeqCst);
            },
        );
        let mut head = [0u8; 4];
        reader.read_exact(&mut head).await.unwrap();
        drop(reader);
        assert_eq!(completions.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unknown_size() {
        let reader = TransformReader::new(Box::new(tokio::io::empty()), -5);
        assert_eq!(reader.size(), SIZE_UNKNOWN);
    }
}
