//! Scripted in-memory transport for driving a slave in tests.

use std::collections::VecDeque;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use modslave::{crc::crc16, FrameTransport};

/// Feeds queued request frames to the slave and records every frame it
/// sends back.
#[derive(Default)]
pub struct ScriptedTransport {
    incoming: VecDeque<Vec<u8>>,
    pub sent: Vec<Vec<u8>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request(frame: &[u8]) -> Self {
        let mut transport = Self::new();
        transport.push_request(frame);
        transport
    }

    pub fn push_request(&mut self, frame: &[u8]) {
        self.incoming.push_back(frame.to_vec());
    }
}

#[async_trait]
impl FrameTransport for ScriptedTransport {
    async fn recv_frame(&mut self, _timeout: Duration) -> io::Result<Option<Vec<u8>>> {
        Ok(self.incoming.pop_front())
    }

    async fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.sent.push(frame.to_vec());
        Ok(())
    }
}

/// Append the CRC, low byte first, to a raw ADU body.
pub fn adu(body: &[u8]) -> Vec<u8> {
    let mut frame = body.to_vec();
    frame.extend_from_slice(&crc16(body).to_le_bytes());
    frame
}
