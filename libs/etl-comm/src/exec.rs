// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Exec strategy: each object is piped through a local process, object
//! bytes on stdin and transformed bytes on stdout.

use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use bytes::Bytes;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::{Request, Response, StatusCode};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::io::StreamReader;

use xcopy_cluster::{ClusterError, Lom, ObjectStore, memsys};
use xcopy_types::{Bck, CommStats, CommType, SIZE_UNKNOWN};

use crate::comm::{BaseComm, Communicator};
use crate::deadline::Deadline;
use crate::error::EtlError;
use crate::push::CONTENT_BINARY;
use crate::reader::TransformReader;
use crate::stats::Stats;

/// Chunks buffered between a batch transform process and its reader
const BATCH_CHANNEL_DEPTH: usize = 4;

pub struct ExecComm {
    base: BaseComm,
    runner: Arc<Runner>,
}

impl ExecComm {
    pub(crate) fn new(base: BaseComm, command: Vec<String>) -> Self {
        let runner = Arc::new(Runner {
            store: Arc::clone(&base.env.store),
            command,
            stats: Arc::clone(&base.stats),
        });
        Self { base, runner }
    }
}

/// Destination of a process's stdout.
#[async_trait]
trait Sink: Send {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()>;
}

#[async_trait]
impl Sink for Vec<u8> {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.extend_from_slice(chunk);
        Ok(())
    }
}

#[async_trait]
impl Sink for mpsc::Sender<io::Result<Bytes>> {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.send(Ok(Bytes::copy_from_slice(chunk)))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "transform reader closed"))
    }
}

struct Runner {
    store: Arc<dyn ObjectStore>,
    command: Vec<String>,
    stats: Arc<Stats>,
}

impl Runner {
    fn error(&self, reason: impl std::fmt::Display) -> EtlError {
        EtlError::Exec {
            command: self.command.join(" "),
            reason: reason.to_string(),
        }
    }

    /// Make sure the object is resident, fetching a remote-backed object
    /// once when it is not.
    async fn ensure_local(&self, bck: &Bck, obj: &str) -> Result<(), EtlError> {
        let mut lom = Lom::new(Arc::clone(&self.store), bck, obj)?;
        match lom.load(false).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() && bck.is_remote() => {
                self.store.get_cold(bck, obj).await?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn run<S: Sink>(&self, bck: &Bck, obj: &str, sink: &mut S) -> Result<(), EtlError> {
        match self.try_run(bck, obj, sink).await {
            Err(e) if e.is_not_found() && bck.is_remote() => {
                self.store.get_cold(bck, obj).await?;
                self.try_run(bck, obj, sink).await
            }
            res => res,
        }
    }

    async fn try_run<S: Sink>(&self, bck: &Bck, obj: &str, sink: &mut S) -> Result<(), EtlError> {
        let mut lom = Lom::new(Arc::clone(&self.store), bck, obj)?;
        lom.lock(false).await;
        lom.load(true).await?;
        let mut src = lom.open().await?;
        self.stats.add_in(lom.size_bytes());

        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| self.error("empty command"))?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.error(e))?;
        let (Some(mut stdin), Some(mut stdout), Some(mut stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(self.error("process pipes unavailable"));
        };

        let feed = async move {
            let res = tokio::io::copy(&mut src, &mut stdin).await;
            drop(stdin);
            match res {
                Ok(_) => Ok(()),
                // The process may exit without reading all of its input.
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
                Err(e) => Err(EtlError::from(ClusterError::from_io(e))),
            }
        };
        let drain = self.drain(&mut stdout, sink);
        let errs = async {
            let mut buf = Vec::new();
            stderr.read_to_end(&mut buf).await.map_err(|e| self.error(e))?;
            Ok::<_, EtlError>(buf)
        };
        let ((), (), err_out) = tokio::try_join!(feed, drain, errs)?;
        lom.unlock();

        let status = child.wait().await.map_err(|e| self.error(e))?;
        if !status.success() {
            let stderr = String::from_utf8_lossy(&err_out);
            tracing::warn!(
                command = %self.command.join(" "),
                status = %status,
                stderr = %stderr.trim(),
                "Transform process failed"
            );
            return Err(self.error(format!("{}: {}", status, stderr.trim())));
        }
        Ok(())
    }

    async fn drain<R, S>(&self, stdout: &mut R, sink: &mut S) -> Result<(), EtlError>
    where
        R: AsyncRead + Unpin,
        S: Sink,
    {
        let mut buf = memsys::alloc();
        loop {
            let n = stdout.read(&mut buf).await.map_err(|e| self.error(e))?;
            if n == 0 {
                return Ok(());
            }
            self.stats.add_out(n as u64);
            sink.write(&buf[..n]).await.map_err(|e| self.error(e))?;
        }
    }
}

#[async_trait]
impl Communicator for ExecComm {
    fn name(&self) -> &str {
        &self.base.name
    }

    fn pod_name(&self) -> &str {
        &self.base.pod_name
    }

    fn svc_name(&self) -> &str {
        &self.base.svc_name
    }

    fn comm_type(&self) -> CommType {
        CommType::Exec
    }

    async fn online_transform(
        &self,
        _req: Request<Body>,
        bck: &Bck,
        obj: &str,
    ) -> Result<Response<Body>, EtlError> {
        let mut out = Vec::new();
        let res = self.runner.run(bck, obj, &mut out).await;
        self.base.stats.inc_objects();
        res?;

        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, CONTENT_BINARY)
            .header(CONTENT_LENGTH, out.len())
            .body(Body::from(out))?)
    }

    async fn offline_transform(
        &self,
        bck: &Bck,
        obj: &str,
        timeout: Duration,
    ) -> Result<TransformReader, EtlError> {
        // Missing objects fail here rather than mid-stream.
        self.runner.ensure_local(bck, obj).await?;

        let (tx, mut rx) = mpsc::channel::<io::Result<Bytes>>(BATCH_CHANNEL_DEPTH);
        let runner = Arc::clone(&self.runner);
        let (bck, obj) = (bck.clone(), obj.to_string());
        tokio::spawn(async move {
            let mut out = tx.clone();
            let mut deadline = Deadline::new(timeout);
            let res = deadline
                .run(runner.run(&bck, &obj, &mut out))
                .await
                .unwrap_or_else(|| Err(runner.error("deadline exceeded")));
            if let Err(e) = res {
                tracing::debug!(obj = %bck.make_uname(&obj), error = %e, "Batch transform failed");
                let _ = tx.send(Err(io::Error::from(ClusterError::from(e)))).await;
            }
        });

        let body = futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx));
        let stats = Arc::clone(&self.base.stats);
        Ok(
            TransformReader::new(Box::new(StreamReader::new(Box::pin(body))), SIZE_UNKNOWN)
                .on_complete(move || stats.inc_objects()),
        )
    }

    fn stats(&self) -> CommStats {
        self.base.stats.snapshot()
    }
}
