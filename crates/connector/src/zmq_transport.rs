//! ZeroMQ REQ transport

use contracts::{ChannelKind, ContractError, Transport};
use zeromq::{ReqSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

/// Request/response channel over a ZeroMQ REQ socket
pub struct ZmqTransport {
    socket: ReqSocket,
    endpoint: String,
    channel: ChannelKind,
    address: String,
}

impl ZmqTransport {
    /// Connect a REQ socket to `tcp://address:port`
    pub async fn connect(
        channel: ChannelKind,
        address: &str,
        port: u16,
    ) -> Result<Self, zeromq::ZmqError> {
        let endpoint = format!("tcp://{address}:{port}");
        let mut socket = ReqSocket::new();
        socket.connect(&endpoint).await?;
        Ok(Self {
            socket,
            endpoint,
            channel,
            address: address.to_string(),
        })
    }

    fn failure(&self, e: zeromq::ZmqError) -> ContractError {
        ContractError::command(self.channel, &self.address, format!("transport failure: {e}"))
    }
}

impl Transport for ZmqTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn exchange(&mut self, request: &str) -> Result<String, ContractError> {
        self.socket
            .send(ZmqMessage::from(request.to_string()))
            .await
            .map_err(|e| self.failure(e))?;
        let reply = self.socket.recv().await.map_err(|e| self.failure(e))?;

        let frames = reply.into_vec();
        Ok(frames
            .last()
            .map(|frame| String::from_utf8_lossy(frame).into_owned())
            .unwrap_or_default())
    }
}
