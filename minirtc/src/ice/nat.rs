use log::debug;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use shared::error::Result;
use stun::addr::OtherAddress;
use stun::attributes::ATTR_CHANGE_REQUEST;
use stun::message::*;
use stun::xoraddr::XorMappedAddress;

/// Per-step response timeout (RFC 5780 runs over UDP without
/// retransmission here; one probe per rung).
const STEP_TIMEOUT: Duration = Duration::from_secs(2);

const CHANGE_IP: u32 = 0x04;
const CHANGE_PORT: u32 = 0x02;

/// NatType is the classification reported to the application.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NatType {
    NoNat,
    FullCone,
    AddressRestricted,
    PortRestricted,
    Symmetric,
    ServerUnreachable,
    ServerNonCompliant,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum State {
    Idle,
    /// Plain binding to the primary address.
    CheckingUdp,
    /// CHANGE-REQUEST (ip+port) via the primary address; a response
    /// proves inbound from an unknown address/port is allowed.
    CheckingFullCone,
    /// Plain binding to the alternate address to compare mappings.
    CheckingSymmetric,
    /// CHANGE-REQUEST (port) to split address- from port-restricted.
    CheckingPortRestricted,
    Done,
}

/// ChangeRequest represents the CHANGE-REQUEST attribute (RFC 5780
/// section 7.2).
#[derive(Default, Debug, Copy, Clone)]
struct ChangeRequest {
    change_ip: bool,
    change_port: bool,
}

impl Setter for ChangeRequest {
    fn add_to(&self, m: &mut Message) -> Result<()> {
        let mut v = 0u32;
        if self.change_ip {
            v |= CHANGE_IP;
        }
        if self.change_port {
            v |= CHANGE_PORT;
        }
        m.add(ATTR_CHANGE_REQUEST, &v.to_be_bytes());
        Ok(())
    }
}

/// NatDiscovery walks the RFC 5780 decision tree against a
/// behavior-discovery STUN server and reports one [`NatType`].
pub(crate) struct NatDiscovery {
    state: State,
    server: SocketAddr,
    local_addr: SocketAddr,
    alternate: Option<SocketAddr>,
    first_mapped: Option<SocketAddr>,
    transaction_id: TransactionId,
    deadline: Option<Instant>,
    transmits: VecDeque<(SocketAddr, Vec<u8>)>,
    result: Option<(NatType, Option<SocketAddr>)>,
}

impl NatDiscovery {
    pub(crate) fn new(server: SocketAddr, local_addr: SocketAddr) -> Self {
        NatDiscovery {
            state: State::Idle,
            server,
            local_addr,
            alternate: None,
            first_mapped: None,
            transaction_id: TransactionId::default(),
            deadline: None,
            transmits: VecDeque::new(),
            result: None,
        }
    }

    pub(crate) fn start(&mut self, now: Instant) -> Result<()> {
        self.state = State::CheckingUdp;
        self.probe(self.server, None, now)
    }

    pub(crate) fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// poll_result yields the classification and the mapped address
    /// once, when the ladder finishes.
    pub(crate) fn poll_result(&mut self) -> Option<(NatType, Option<SocketAddr>)> {
        self.result.take()
    }

    pub(crate) fn poll_transmit(&mut self) -> Option<(SocketAddr, Vec<u8>)> {
        self.transmits.pop_front()
    }

    pub(crate) fn poll_timeout(&self) -> Option<Instant> {
        self.deadline
    }

    /// matches reports whether a STUN message belongs to this probe.
    pub(crate) fn matches(&self, m: &Message) -> bool {
        self.state != State::Idle
            && self.state != State::Done
            && m.transaction_id == self.transaction_id
    }

    pub(crate) fn handle_response(&mut self, m: &Message, now: Instant) -> Result<()> {
        let mut mapped = XorMappedAddress::default();
        mapped.get_from(m)?;
        let mapped = SocketAddr::new(mapped.ip, mapped.port);

        match self.state {
            State::CheckingUdp => {
                self.first_mapped = Some(mapped);
                let mut other = OtherAddress::default();
                if other.get_from(m).is_ok() {
                    self.alternate = Some(SocketAddr::new(other.0.ip, other.0.port));
                }

                if mapped == self.local_addr {
                    self.finish(NatType::NoNat);
                } else if self.alternate.is_none() {
                    // Without OTHER-ADDRESS the rest of the ladder
                    // cannot run.
                    self.finish(NatType::ServerNonCompliant);
                } else {
                    self.state = State::CheckingFullCone;
                    self.probe(
                        self.server,
                        Some(ChangeRequest {
                            change_ip: true,
                            change_port: true,
                        }),
                        now,
                    )?;
                }
            }
            State::CheckingFullCone => {
                // The response arrived from the alternate address and
                // port: nothing is filtered.
                self.finish(NatType::FullCone);
            }
            State::CheckingSymmetric => {
                if Some(mapped) != self.first_mapped {
                    self.finish(NatType::Symmetric);
                } else {
                    // Same mapping; split address- from port-restricted
                    // with a changed-port probe via the primary server.
                    self.state = State::CheckingPortRestricted;
                    self.probe(
                        self.server,
                        Some(ChangeRequest {
                            change_ip: false,
                            change_port: true,
                        }),
                        now,
                    )?;
                }
            }
            State::CheckingPortRestricted => {
                // A response despite the changed source port: only the
                // address is being filtered.
                self.finish(NatType::AddressRestricted);
            }
            State::Idle | State::Done => {}
        }
        Ok(())
    }

    pub(crate) fn handle_timeout(&mut self, now: Instant) {
        let Some(deadline) = self.deadline else {
            return;
        };
        if now < deadline {
            return;
        }
        self.deadline = None;

        match self.state {
            State::CheckingUdp => self.finish(NatType::ServerUnreachable),
            State::CheckingFullCone => {
                // Filtered; compare mappings via the alternate address.
                self.state = State::CheckingSymmetric;
                if let Some(alternate) = self.alternate {
                    let _ = self.probe(alternate, None, now);
                } else {
                    self.finish(NatType::ServerNonCompliant);
                }
            }
            State::CheckingSymmetric => {
                // The alternate address never reached us at all: its
                // traffic is mapped (and filtered) per destination.
                self.finish(NatType::Symmetric);
            }
            State::CheckingPortRestricted => self.finish(NatType::PortRestricted),
            State::Idle | State::Done => {}
        }
    }

    fn probe(
        &mut self,
        to: SocketAddr,
        change: Option<ChangeRequest>,
        now: Instant,
    ) -> Result<()> {
        self.transaction_id = TransactionId::new();
        let mut setters: Vec<Box<dyn Setter>> =
            vec![Box::new(self.transaction_id), Box::new(BINDING_REQUEST)];
        if let Some(change) = change {
            setters.push(Box::new(change));
        }
        let mut msg = Message::new();
        msg.build(&setters)?;

        debug!("nat discovery probe {:?} -> {to}", self.state);
        self.transmits.push_back((to, msg.raw));
        self.deadline = Some(now + STEP_TIMEOUT);
        Ok(())
    }

    fn finish(&mut self, nat: NatType) {
        debug!("nat discovery finished: {nat:?}");
        self.state = State::Done;
        self.deadline = None;
        self.result = Some((nat, self.first_mapped));
    }
}
