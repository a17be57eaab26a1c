use crate::decode::DecodeLevel;
use crate::error::RequestError;
use crate::link::phys::PhysLayer;
use crate::link::{Request, Response, Transport};

#[cfg(feature = "serial")]
use crate::link::serial::SerialSettings;

const READ_CHUNK_SIZE: usize = 256;

/// Byte-level protocol plugged into a [`FramedTransport`]
///
/// Implementations translate requests to frames and frames back to responses. They
/// never touch the stream themselves.
pub trait FrameCodec: Send {
    /// Append the frame of `request` to `buffer`
    fn encode(&mut self, request: &Request, buffer: &mut Vec<u8>) -> Result<(), RequestError>;

    /// Try to parse the reply to `request` from the bytes received so far
    ///
    /// Returns `Ok(None)` if more bytes are required. Protocol exceptions are reported
    /// as [`RequestError::Exception`], malformed frames as [`RequestError::BadFrame`].
    fn decode(&mut self, request: &Request, buffer: &[u8]) -> Result<Option<Response>, RequestError>;
}

/// Physical endpoint of a [`FramedTransport`]
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialization", serde(rename_all = "camelCase"))]
pub enum PhysConfig {
    /// TCP connection to `host:port`
    Tcp(String),
    /// serial port at `path`
    #[cfg(feature = "serial")]
    Serial {
        /// path of the port, e.g. `/dev/ttyUSB0` or `COM3`
        path: String,
        /// port settings
        settings: SerialSettings,
    },
}

/// [`Transport`] that moves the frames of a [`FrameCodec`] over TCP or a serial port
pub struct FramedTransport<C> {
    config: Option<PhysConfig>,
    codec: C,
    phys: Option<PhysLayer>,
    buffer: Vec<u8>,
}

impl<C> FramedTransport<C>
where
    C: FrameCodec,
{
    /// Create a transport that opens `config` on demand
    pub fn new(config: PhysConfig, codec: C) -> Self {
        Self {
            config: Some(config),
            codec,
            phys: None,
            buffer: Vec::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn mock(stream: tokio::io::DuplexStream, codec: C) -> Self {
        Self {
            config: None,
            codec,
            phys: Some(PhysLayer::Mock(stream)),
            buffer: Vec::new(),
        }
    }

    async fn open_phys(config: &PhysConfig) -> Result<PhysLayer, std::io::Error> {
        match config {
            PhysConfig::Tcp(host) => {
                let stream = tokio::net::TcpStream::connect(host.as_str()).await?;
                stream.set_nodelay(true)?;
                Ok(PhysLayer::Tcp(stream))
            }
            #[cfg(feature = "serial")]
            PhysConfig::Serial { path, settings } => {
                let stream = crate::link::serial::open(path, *settings)?;
                Ok(PhysLayer::new_serial(stream))
            }
        }
    }
}

#[async_trait::async_trait]
impl<C> Transport for FramedTransport<C>
where
    C: FrameCodec,
{
    async fn open(&mut self) -> Result<(), RequestError> {
        if self.phys.is_some() {
            return Ok(());
        }

        let config = self
            .config
            .as_ref()
            .ok_or(RequestError::Open(std::io::ErrorKind::NotConnected))?;

        match Self::open_phys(config).await {
            Ok(phys) => {
                tracing::info!("opened {:?}", config);
                self.phys = Some(phys);
                Ok(())
            }
            Err(err) => {
                tracing::warn!("unable to open {:?}: {}", config, err);
                Err(RequestError::Open(err.kind()))
            }
        }
    }

    async fn exchange(
        &mut self,
        request: &Request,
        decode: DecodeLevel,
    ) -> Result<Response, RequestError> {
        let phys = self
            .phys
            .as_mut()
            .ok_or(RequestError::Io(std::io::ErrorKind::NotConnected))?;

        self.buffer.clear();
        self.codec.encode(request, &mut self.buffer)?;
        phys.write(&self.buffer, decode.physical).await?;

        self.buffer.clear();
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            let count = phys.read(&mut chunk, decode.physical).await?;
            if count == 0 {
                return Err(RequestError::Io(std::io::ErrorKind::UnexpectedEof));
            }
            self.buffer.extend_from_slice(&chunk[..count]);
            if let Some(response) = self.codec.decode(request, &self.buffer)? {
                return Ok(response);
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut phys) = self.phys.take() {
            phys.shutdown().await;
        }
    }
}
