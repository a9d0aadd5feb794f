use std::{
  pin::Pin,
  task::{Context, Poll},
};

use bytes::Bytes;
use futures::Stream;

use crate::Result;

/// Cuts a byte window out of a chunked body: drops the first `skip_bytes`
/// and ends the stream after `limit_bytes`.
pub struct ByteStream<T> {
  stream: T,
  skip_bytes: u64,
  limit_bytes: Option<u64>,
}

impl<T> ByteStream<T> {
  pub fn new(stream: T) -> Self {
    ByteStream {
      stream,
      skip_bytes: 0,
      limit_bytes: None,
    }
  }

  pub fn skip_bytes(self, bytes: u64) -> Self {
    ByteStream {
      skip_bytes: bytes,
      ..self
    }
  }

  pub fn limit_bytes(self, bytes: u64) -> Self {
    ByteStream {
      limit_bytes: Some(bytes),
      ..self
    }
  }
}

impl<T> Stream for ByteStream<T>
where
  T: Stream<Item = Result<Bytes>> + Unpin,
{
  type Item = Result<Bytes>;

  fn poll_next(
    mut self: Pin<&mut Self>,
    cx: &mut Context<'_>,
  ) -> Poll<Option<Self::Item>> {
    let this = &mut *self;

    loop {
      // window exhausted, stop pulling from upstream
      if this.limit_bytes == Some(0) {
        return Poll::Ready(None);
      }

      let bytes = match Pin::new(&mut this.stream).poll_next(cx) {
        Poll::Ready(Some(Ok(bytes))) => bytes,
        other => return other,
      };

      let len = bytes.len() as u64;
      if len <= this.skip_bytes {
        this.skip_bytes -= len;
        continue;
      }

      let mut bytes = bytes.slice(this.skip_bytes as usize..);
      this.skip_bytes = 0;

      if let Some(limit) = this.limit_bytes {
        if bytes.len() as u64 > limit {
          bytes = bytes.slice(..limit as usize);
        }
        this.limit_bytes = Some(limit - bytes.len() as u64);
      }

      return Poll::Ready(Some(Ok(bytes)));
    }
  }
}
