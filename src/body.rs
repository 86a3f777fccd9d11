//! Request body.
//!
//! A body starts out as the raw hyper stream. The access logger may drain it
//! into memory for its record and puts it back as [`Body::Full`] (or, past the
//! capture limit, as [`Body::Replay`]) so the handler reads exactly the bytes
//! the client sent, from the beginning. If the stream broke while it was
//! being captured, the body becomes [`Body::Failed`] and the handler sees the
//! read error instead of a silently shortened payload.

use bytes::{Bytes, BytesMut};
use http_body_util::BodyExt;
use hyper::body::Incoming;

use crate::error::Error;

/// An incoming request body.
#[derive(Debug, Default)]
pub enum Body {
    #[default]
    Empty,
    /// Fully buffered.
    Full(Bytes),
    /// Untouched transport stream.
    Incoming(Incoming),
    /// A buffered prefix followed by the unread remainder of the stream.
    Replay { head: Bytes, rest: Incoming },
    /// The stream failed after `head` was received.
    Failed { head: Bytes, error: hyper::Error },
}

/// What [`Body::capture`] saw.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Capture {
    /// The whole body, byte-for-byte.
    Complete(Bytes),
    /// The body exceeded the capture limit.
    Truncated,
}

impl Body {
    /// Reads the whole body into one buffer.
    pub async fn into_bytes(self) -> Result<Bytes, Error> {
        match self {
            Self::Empty => Ok(Bytes::new()),
            Self::Full(bytes) => Ok(bytes),
            Self::Incoming(stream) => Ok(stream.collect().await?.to_bytes()),
            Self::Replay { head, rest } => {
                let tail = rest.collect().await?.to_bytes();
                let mut buf = BytesMut::with_capacity(head.len() + tail.len());
                buf.extend_from_slice(&head);
                buf.extend_from_slice(&tail);
                Ok(buf.freeze())
            }
            Self::Failed { error, .. } => Err(Error::Body(error)),
        }
    }

    /// Buffers up to `limit` bytes and returns a body that replays everything
    /// that was read, followed by whatever was not.
    ///
    /// A read error ends the capture early. The bytes received so far are
    /// reported as captured, and the returned body keeps the error for
    /// whoever reads it next.
    pub(crate) async fn capture(self, limit: usize) -> (Self, Capture) {
        match self {
            Self::Empty => (Self::Empty, Capture::Complete(Bytes::new())),
            Self::Full(bytes) if bytes.len() <= limit => {
                (Self::Full(bytes.clone()), Capture::Complete(bytes))
            }
            full @ Self::Full(_) => (full, Capture::Truncated),
            replay @ Self::Replay { .. } => (replay, Capture::Truncated),
            Self::Failed { head, error } => {
                let captured = if head.len() <= limit { Capture::Complete(head.clone()) } else { Capture::Truncated };
                (Self::Failed { head, error }, captured)
            }
            Self::Incoming(mut stream) => {
                let mut buf = BytesMut::new();
                loop {
                    match stream.frame().await {
                        None => break,
                        Some(Ok(frame)) => {
                            // Trailers carry no payload bytes.
                            let Ok(data) = frame.into_data() else { continue };
                            buf.extend_from_slice(&data);
                            if buf.len() > limit {
                                let head = buf.freeze();
                                return (Self::Replay { head, rest: stream }, Capture::Truncated);
                            }
                        }
                        Some(Err(error)) => {
                            tracing::debug!(error = %error, "request body read failed during capture");
                            let head = buf.freeze();
                            return (Self::Failed { head: head.clone(), error }, Capture::Complete(head));
                        }
                    }
                }
                let bytes = buf.freeze();
                (Self::Full(bytes.clone()), Capture::Complete(bytes))
            }
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        if bytes.is_empty() { Self::Empty } else { Self::Full(bytes) }
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self { Bytes::from(bytes).into() }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self { Bytes::from_static(s.as_bytes()).into() }
}

impl From<String> for Body {
    fn from(s: String) -> Self { Bytes::from(s).into() }
}

impl From<Incoming> for Body {
    fn from(stream: Incoming) -> Self { Self::Incoming(stream) }
}

impl From<()> for Body {
    fn from(_: ()) -> Self { Self::Empty }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_body_within_limit_is_captured_and_restored() {
        let (body, captured) = Body::from("hello").capture(16).await;
        assert_eq!(captured, Capture::Complete(Bytes::from_static(b"hello")));
        assert_eq!(body.into_bytes().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn full_body_over_limit_is_left_alone() {
        let (body, captured) = Body::from("hello world").capture(4).await;
        assert_eq!(captured, Capture::Truncated);
        assert_eq!(body.into_bytes().await.unwrap(), "hello world");
    }

    #[tokio::test]
    async fn empty_body_captures_nothing() {
        let (body, captured) = Body::from(Vec::new()).capture(0).await;
        assert_eq!(captured, Capture::Complete(Bytes::new()));
        assert!(matches!(body, Body::Empty));
    }
}
