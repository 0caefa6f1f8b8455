// Copyright 2024 The Fluxstore Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A bounded byte-chunk pipe used to implement upload's "strategy-(b)"
//! streaming discipline: the chunk-receive task writes into one end while
//! the object-store driver consumes the other end concurrently, giving
//! correct end-to-end back-pressure between the RPC transport and the
//! object store. Adapted from the teacher's buffer-channel pair, trimmed to
//! the subset the coordinator needs.

use bytes::Bytes;
use fluxstore_error::{make_err, Code, Error};
use tokio::sync::mpsc;

/// Creates a connected pair. The writer is driven by the chunk-receive loop;
/// the reader is consumed by the object-store `put` call.
pub fn make_buf_channel_pair() -> (BufChannelWriter, BufChannelReader) {
    // A small buffer gives the receive loop a little headroom to run ahead
    // of a slow object-store put without unbounded memory growth.
    let (tx, rx) = mpsc::channel(4);
    (BufChannelWriter { tx: Some(tx) }, BufChannelReader { rx })
}

pub struct BufChannelWriter {
    tx: Option<mpsc::Sender<Result<Bytes, Error>>>,
}

impl BufChannelWriter {
    /// Sends a chunk to the reader. Never call with an empty `buf`; use
    /// [`BufChannelWriter::send_eof`] to signal end of stream.
    pub async fn send(&mut self, buf: Bytes) -> Result<(), Error> {
        debug_assert!(!buf.is_empty(), "send() cannot be used to signal EOF");
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| make_err!(Code::Internal, "Tried to send on a closed buf_channel"))?;
        tx.send(Ok(buf))
            .await
            .map_err(|_| make_err!(Code::Internal, "buf_channel receiver disconnected"))
    }

    /// Signals a clean end of stream. The reader's next `recv` returns `None`.
    pub fn send_eof(&mut self) {
        self.tx = None;
    }

    /// Propagates a terminal error to the reader so the consumer (the
    /// object-store put) fails fast instead of hanging on a stalled stream.
    pub async fn send_error(&mut self, err: Error) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Err(err)).await;
        }
    }
}

pub struct BufChannelReader {
    rx: mpsc::Receiver<Result<Bytes, Error>>,
}

impl BufChannelReader {
    /// Reads the next chunk. Returns `Ok(None)` on clean EOF, `Err` if the
    /// writer propagated an upstream failure.
    pub async fn recv(&mut self) -> Result<Option<Bytes>, Error> {
        match self.rx.recv().await {
            Some(Ok(buf)) => Ok(Some(buf)),
            Some(Err(err)) => Err(err),
            None => Ok(None),
        }
    }

    /// Drains the whole stream into one buffer. Used by the "strategy-(a)"
    /// object-store backends that require a known-length body up front.
    pub async fn collect(mut self) -> Result<Bytes, Error> {
        use bytes::BytesMut;
        let mut out = BytesMut::new();
        while let Some(chunk) = self.recv().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn forwards_chunks_in_order_then_eof() {
        let (mut tx, mut rx) = make_buf_channel_pair();
        let writer = tokio::spawn(async move {
            tx.send(Bytes::from_static(b"hello ")).await.unwrap();
            tx.send(Bytes::from_static(b"world")).await.unwrap();
            tx.send_eof();
        });
        let mut received = Vec::new();
        while let Some(chunk) = rx.recv().await.unwrap() {
            received.extend_from_slice(&chunk);
        }
        writer.await.unwrap();
        assert_eq!(received, b"hello world");
    }

    #[tokio::test]
    async fn propagates_upstream_error_to_reader() {
        let (mut tx, mut rx) = make_buf_channel_pair();
        tx.send_error(make_err!(Code::Internal, "client disconnected")).await;
        let err = rx.recv().await.unwrap_err();
        assert_eq!(err.code, Code::Internal);
    }

    #[tokio::test]
    async fn collect_concatenates_all_chunks() {
        let (mut tx, rx) = make_buf_channel_pair();
        tokio::spawn(async move {
            tx.send(Bytes::from_static(b"a")).await.unwrap();
            tx.send(Bytes::from_static(b"b")).await.unwrap();
            tx.send(Bytes::from_static(b"c")).await.unwrap();
            tx.send_eof();
        });
        let collected = rx.collect().await.unwrap();
        assert_eq!(&collected[..], b"abc");
    }
}
