#[cfg(test)]
mod data_channel_test;

use crate::message::{message_channel_ack::*, message_channel_open::*, *};
use bytes::BytesMut;
use log::debug;
use sctp::PayloadProtocolIdentifier;
use shared::error::{Error, Result};
use shared::marshal::{Marshal, Unmarshal};
use std::collections::VecDeque;

/// DataChannelConfig is used to configure a data channel.
#[derive(Eq, PartialEq, Default, Clone, Debug)]
pub struct DataChannelConfig {
    pub channel_type: ChannelType,
    pub priority: u16,
    pub reliability_parameter: u32,
    pub label: String,
    pub protocol: String,
}

/// DataChannelMessage is one SCTP-bound message: a DCEP control message
/// or a PPID-tagged application payload.
#[derive(Debug, Default, Clone)]
pub struct DataChannelMessage {
    pub stream_id: u16,
    pub ppi: PayloadProtocolIdentifier,
    pub payload: BytesMut,
}

/// DataChannel represents one negotiated channel on an SCTP stream.
///
/// The opener (`dial`) queues DATA_CHANNEL_OPEN; the acceptor
/// (`accept`) parses it and queues DATA_CHANNEL_ACK. Application
/// payloads are tagged PPID 51 (string) or 53 (binary).
#[derive(Debug, Default, Clone)]
pub struct DataChannel {
    config: DataChannelConfig,
    stream_id: u16,
    acked: bool,

    write_outs: VecDeque<DataChannelMessage>,

    // stats
    messages_sent: usize,
    messages_received: usize,
    bytes_sent: usize,
    bytes_received: usize,
}

impl DataChannel {
    fn new(config: DataChannelConfig, stream_id: u16) -> Self {
        Self {
            config,
            stream_id,
            ..Default::default()
        }
    }

    /// dial opens a data channel over an SCTP stream.
    pub fn dial(config: DataChannelConfig, stream_id: u16) -> Result<Self> {
        let mut data_channel = DataChannel::new(config.clone(), stream_id);

        let msg = Message::DataChannelOpen(DataChannelOpen {
            channel_type: config.channel_type,
            priority: config.priority,
            reliability_parameter: config.reliability_parameter,
            label: config.label.bytes().collect(),
            protocol: config.protocol.bytes().collect(),
        })
        .marshal()?;

        data_channel.write_outs.push_back(DataChannelMessage {
            stream_id,
            ppi: PayloadProtocolIdentifier::Dcep,
            payload: msg,
        });

        Ok(data_channel)
    }

    /// accept takes an inbound DATA_CHANNEL_OPEN and answers it.
    pub fn accept(stream_id: u16, ppi: PayloadProtocolIdentifier, buf: &[u8]) -> Result<Self> {
        if ppi != PayloadProtocolIdentifier::Dcep {
            return Err(Error::InvalidPayloadProtocolIdentifier(ppi as u32));
        }

        let mut read_buf = buf;
        let msg = Message::unmarshal(&mut read_buf)?;

        let Message::DataChannelOpen(dco) = msg else {
            return Err(Error::InvalidMessageType(0x02));
        };

        let config = DataChannelConfig {
            channel_type: dco.channel_type,
            priority: dco.priority,
            reliability_parameter: dco.reliability_parameter,
            label: String::from_utf8(dco.label)?,
            protocol: String::from_utf8(dco.protocol)?,
        };

        let mut data_channel = DataChannel::new(config, stream_id);
        data_channel.acked = true;
        data_channel.write_data_channel_ack()?;
        debug!(
            "accepted data channel \"{}\" on stream {}",
            data_channel.config.label, stream_id
        );
        Ok(data_channel)
    }

    /// handle_ack records the peer's DATA_CHANNEL_ACK.
    pub fn handle_ack(&mut self) {
        self.acked = true;
    }

    pub fn is_acked(&self) -> bool {
        self.acked
    }

    pub fn stream_id(&self) -> u16 {
        self.stream_id
    }

    pub fn label(&self) -> &str {
        &self.config.label
    }

    pub fn protocol(&self) -> &str {
        &self.config.protocol
    }

    /// write queues one application payload, tagged by kind.
    pub fn write(&mut self, binary: bool, data: &[u8]) {
        let ppi = if binary {
            PayloadProtocolIdentifier::Binary
        } else {
            PayloadProtocolIdentifier::String
        };
        self.messages_sent += 1;
        self.bytes_sent += data.len();
        self.write_outs.push_back(DataChannelMessage {
            stream_id: self.stream_id,
            ppi,
            payload: BytesMut::from(data),
        });
    }

    /// read_received accounts one inbound application payload.
    pub fn read_received(&mut self, len: usize) {
        self.messages_received += 1;
        self.bytes_received += len;
    }

    /// poll_write drains the next outbound message.
    pub fn poll_write(&mut self) -> Option<DataChannelMessage> {
        self.write_outs.pop_front()
    }

    fn write_data_channel_ack(&mut self) -> Result<()> {
        let msg = Message::DataChannelAck(DataChannelAck).marshal()?;
        self.write_outs.push_back(DataChannelMessage {
            stream_id: self.stream_id,
            ppi: PayloadProtocolIdentifier::Dcep,
            payload: msg,
        });
        Ok(())
    }

    /// messages_sent returns the number of messages sent.
    pub fn messages_sent(&self) -> usize {
        self.messages_sent
    }

    /// messages_received returns the number of messages received.
    pub fn messages_received(&self) -> usize {
        self.messages_received
    }

    /// bytes_sent returns the number of payload bytes sent.
    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent
    }

    /// bytes_received returns the number of payload bytes received.
    pub fn bytes_received(&self) -> usize {
        self.bytes_received
    }
}
