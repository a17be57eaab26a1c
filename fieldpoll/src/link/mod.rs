//! Exclusive transaction channel for one physical connection
//!
//! A [`Transport`] moves single requests and responses. The crate-private `Link`
//! wraps a transport with the timing rules every field bus needs: one transaction
//! in flight, a minimum gap between transactions, a bounded wait for every answer,
//! and the open/close policy.

use std::time::Duration;

use tokio::time::Instant;
use tracing::Instrument;

use crate::config::LinkConfig;
use crate::connection::listener::{LinkState, Listener};
use crate::decode::DecodeLevel;
use crate::error::RequestError;

mod framed;
mod phys;
mod request;
#[cfg(feature = "serial")]
mod serial;

pub use framed::*;
pub use request::*;
#[cfg(feature = "serial")]
pub use serial::*;

/// Moves requests and responses over one physical channel
///
/// The byte-level protocol lives in the implementation. [`FramedTransport`] covers
/// the common case of a [`FrameCodec`] over TCP or a serial port.
#[async_trait::async_trait]
pub trait Transport: Send {
    /// Open the channel, a no-op if it's already open
    ///
    /// Failures must be reported as [`RequestError::Open`].
    async fn open(&mut self) -> Result<(), RequestError>;

    /// Send one request and wait for its response
    ///
    /// The caller bounds the wait, an implementation may wait forever.
    async fn exchange(
        &mut self,
        request: &Request,
        decode: DecodeLevel,
    ) -> Result<Response, RequestError>;

    /// Close the channel, a no-op if it's already closed
    async fn close(&mut self);
}

pub(crate) struct Link {
    transport: Box<dyn Transport>,
    timeout: Duration,
    min_interval: Duration,
    keep_alive: bool,
    is_open: bool,
    last_io_at: Option<Instant>,
    tx_id: u64,
    decode: DecodeLevel,
    state: LinkState,
    listener: Box<dyn Listener<LinkState>>,
}

impl Link {
    pub(crate) fn new(
        transport: Box<dyn Transport>,
        config: &LinkConfig,
        decode: DecodeLevel,
        listener: Box<dyn Listener<LinkState>>,
    ) -> Self {
        Self {
            transport,
            timeout: config.timeout,
            min_interval: config.min_interval,
            keep_alive: config.keep_alive,
            is_open: false,
            last_io_at: None,
            tx_id: 0,
            decode,
            state: LinkState::Closed,
            listener,
        }
    }

    pub(crate) fn set_decode_level(&mut self, level: DecodeLevel) {
        self.decode = level;
    }

    /// Run one transaction, opening the transport first if required
    pub(crate) async fn transact(&mut self, request: &Request) -> Result<Response, RequestError> {
        request.validate()?;

        self.tx_id = self.tx_id.wrapping_add(1);
        let tx_id = self.tx_id;

        let result = self
            .execute(request)
            .instrument(tracing::info_span!("Transaction", tx = tx_id))
            .await;

        match &result {
            Ok(_) => {
                if !self.keep_alive {
                    self.close().await;
                }
            }
            Err(err) => {
                tracing::warn!("transaction failed: {}", err);
                self.close().await;
            }
        }

        result
    }

    async fn execute(&mut self, request: &Request) -> Result<Response, RequestError> {
        self.open().await?;
        self.ensure_interval().await;

        if self.decode.app.header() {
            tracing::info!("TX - {}", request.display(self.decode.app));
        }

        let result =
            match tokio::time::timeout(self.timeout, self.transport.exchange(request, self.decode))
                .await
            {
                Ok(x) => x,
                Err(_) => Err(RequestError::ResponseTimeout),
            };
        self.last_io_at = Some(Instant::now());

        let response = result?.check(request)?;

        if self.decode.app.header() {
            tracing::info!("RX - {}", response.display(self.decode.app));
        }

        Ok(response)
    }

    async fn open(&mut self) -> Result<(), RequestError> {
        if self.is_open {
            return Ok(());
        }

        let result = match tokio::time::timeout(self.timeout, self.transport.open()).await {
            Ok(x) => x,
            Err(_) => Err(RequestError::Open(std::io::ErrorKind::TimedOut)),
        };

        match result {
            Ok(()) => {
                self.is_open = true;
                self.set_state(LinkState::Open).await;
                Ok(())
            }
            Err(err) => {
                // opening may leave a half-open handle behind
                self.transport.close().await;
                self.set_state(LinkState::OpenFailed).await;
                match err {
                    RequestError::Open(_) => Err(err),
                    other => {
                        tracing::warn!("transport reported {} while opening", other);
                        Err(RequestError::Open(std::io::ErrorKind::Other))
                    }
                }
            }
        }
    }

    /// Wait until `min_interval` has passed since the end of the previous transaction
    async fn ensure_interval(&mut self) {
        if let Some(last) = self.last_io_at {
            let next = last + self.min_interval;
            if Instant::now() < next {
                tokio::time::sleep_until(next).await;
            }
        }
    }

    pub(crate) async fn close(&mut self) {
        if self.is_open {
            self.transport.close().await;
            self.is_open = false;
            self.set_state(LinkState::Closed).await;
        }
    }

    pub(crate) async fn shutdown(&mut self) {
        self.close().await;
        self.set_state(LinkState::Shutdown).await;
    }

    async fn set_state(&mut self, state: LinkState) {
        if self.state != state {
            self.state = state;
            self.listener.update(state).get().await;
        }
    }
}
