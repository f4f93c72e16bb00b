// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Per-request deadlines
//!
//! A [`Deadline`] owns the timer bounding one outbound transform call. It
//! travels with the reader returned to the caller, so the timer is released
//! when the reader is dropped, whichever way the call ends.

use std::future::Future;
use std::pin::Pin;
use std::task::Context;
use std::time::Duration;

use tokio::time::Sleep;

#[derive(Debug)]
pub struct Deadline {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl Deadline {
    /// A zero `timeout` never expires.
    pub fn new(timeout: Duration) -> Self {
        Self {
            sleep: (!timeout.is_zero()).then(|| Box::pin(tokio::time::sleep(timeout))),
        }
    }

    pub fn none() -> Self {
        Self { sleep: None }
    }

    pub fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    /// Register `cx` for wakeup and report whether the deadline has passed.
    pub fn poll_expired(&mut self, cx: &mut Context<'_>) -> bool {
        match &mut self.sleep {
            Some(sleep) => sleep.as_mut().poll(cx).is_ready(),
            None => false,
        }
    }

    /// Drive `fut` until it completes or the deadline passes (`None`).
    pub async fn run<F: Future>(&mut self, fut: F) -> Option<F::Output> {
        match &mut self.sleep {
            None => Some(fut.await),
            Some(sleep) => {
                tokio::select! {
                    out = fut => Some(out),
                    _ = sleep.as_mut() => None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_zero_never_expires() {
        let mut deadline = Deadline::new(Duration::ZERO);
        assert!(!deadline.is_armed());
        let out = deadline
            .run(async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                7
            })
            .await;
        assert_eq!(out, Some(7));
    }

    #[tokio::test]
    async fn test_expiry() {
        let mut deadline = Deadline::new(Duration::from_millis(20));
        let out = deadline
            .run(tokio::time::sleep(Duration::from_secs(5)))
            .await;
        assert!(out.is_none());
        // Stays expired.
        let waker = futures_util::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        assert!(deadline.poll_expired(&mut cx));
    }
}
