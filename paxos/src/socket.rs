//! # Summary
//!
//! This module abstracts over external connections to clients and peer
//! servers.
//!
//! Frames are length-delimited via `tokio-util`'s codec and carry
//! bincode-encoded Rust data, which lets us move typed commands through a
//! TCP connection with minimal boilerplate on the sending and receiving
//! ends.

use std::marker::PhantomData;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{self, AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

use crate::error::Error;

/// External receiving channel. Expects length-delimited, bincode-encoded
/// Rust data of type `R`.
pub struct Rx<R, IO> {
    inner: FramedRead<io::ReadHalf<IO>, LengthDelimitedCodec>,
    _marker: PhantomData<R>,
}

/// External transmission channel. Sends length-delimited, bincode-encoded
/// Rust data of type `T`.
pub struct Tx<T, IO> {
    inner: FramedWrite<io::WriteHalf<IO>, LengthDelimitedCodec>,
    _marker: PhantomData<T>,
}

/// Split a duplex byte stream into a pair of receiving and transmitting
/// channels capable of reading and writing bincode-encoded data.
pub fn split<R, T, IO>(io: IO) -> (Rx<R, IO>, Tx<T, IO>)
where
    IO: AsyncRead + AsyncWrite,
{
    let (rx, tx) = io::split(io);
    let rx = Rx {
        inner: FramedRead::new(rx, LengthDelimitedCodec::new()),
        _marker: PhantomData,
    };
    let tx = Tx {
        inner: FramedWrite::new(tx, LengthDelimitedCodec::new()),
        _marker: PhantomData,
    };
    (rx, tx)
}

impl<R, IO> Rx<R, IO>
where
    R: serde::de::DeserializeOwned,
    IO: AsyncRead,
{
    /// Receive the next frame. Returns `None` once the peer has closed
    /// the connection.
    pub async fn recv(&mut self) -> Option<Result<R, Error>> {
        match self.inner.next().await {
        | None => None,
        | Some(Err(error)) => Some(Err(Error::Io(error))),
        | Some(Ok(frame)) => Some(bincode::deserialize(&frame).map_err(Error::Codec)),
        }
    }
}

impl<T, IO> Tx<T, IO>
where
    T: serde::Serialize,
    IO: AsyncWrite,
{
    /// Send one frame, flushing it onto the wire.
    pub async fn send(&mut self, item: &T) -> Result<(), Error> {
        let frame = bincode::serialize(item).map_err(Error::Codec)?;
        self.inner.send(Bytes::from(frame)).await.map_err(Error::Io)
    }
}
