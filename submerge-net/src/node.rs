use core::fmt::Debug;
use core::hash::Hash;
use std::collections::{BTreeMap, VecDeque};

use submerge_base::{err, Error};

use crate::msg::Msg;
use crate::time::NodeID;

pub trait Data: Clone + Debug + Eq + PartialEq + Ord + Hash {}
impl<T> Data for T where T: Clone + Debug + Eq + PartialEq + Ord + Hash {}

// Each message sent or received turns into a single [u8] buffer added to
// the incoming or outgoing deque of the associated IOQueues. Transports
// then turn these into bytes-on-the-wire with whatever framing the transport
// finds necessary.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Default)]
pub struct IOQueues {
    outgoing: VecDeque<(NodeID, Box<[u8]>)>,
    incoming: VecDeque<(NodeID, Box<[u8]>)>,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
struct Request {
    req: Box<Msg>,
    res: Option<Box<Msg>>,
}

// A Node organizes the communication for the process, in terms
// of sending and receiving messages with other nodes.
#[derive(Clone, Debug, Eq, PartialEq, Default, Hash)]
pub struct Node {
    /// The set of decoded incoming one-way messages awaiting consumption. The
    /// [`Node::recv_msg`] function will alternate messages between returning
    /// these and complete requests.
    incoming: VecDeque<Box<Msg>>,
    /// The set of request messages that have been sent but either not yet
    /// responded-to, or not yet consumed by [`Node::recv_msg`].
    requests: BTreeMap<i64, Request>,
    /// The set of decoded incoming request/response pairs awaiting consumption.
    complete: VecDeque<i64>,
    /// The set of incoming and outgoing serialized byte buffers associated with
    /// each peer node. [`Node::recv_bytes`] and [`Node::send_bytes`] operate on
    /// these.
    ioqueues: IOQueues,
}

#[derive(Clone, Debug, Eq, PartialEq, Default, Hash)]
pub enum RecvMsg {
    #[default]
    NoMsgs,
    Single(Box<Msg>),
    Paired {
        req: Box<Msg>,
        res: Box<Msg>,
    },
}

impl Node {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire-and-forget send, matching the `sendOneWay` messaging contract
    /// (used for commits at CL=any, batchlog deletes, and dropped-message
    /// bookkeeping has nothing to track).
    pub fn send_msg(&mut self, msg: Msg) -> Result<(), Error> {
        let dst = msg.dst;
        let buf = rmp_serde::to_vec(&msg)?;
        self.ioqueues
            .outgoing
            .push_back((dst, buf.into_boxed_slice()));
        Ok(())
    }

    /// Request/response send, matching `sendRR`/`addCallback`: the caller is
    /// expected to retain `msg.sequence` and correlate it against whatever
    /// `recv_msg` later returns as a `Paired` response.
    pub fn send_request(&mut self, msg: Msg) -> Result<i64, Error> {
        let sequence = msg.sequence;
        let boxed = Box::new(msg.clone());
        self.requests.insert(sequence, Request { req: boxed, res: None });
        self.send_msg(msg)?;
        Ok(sequence)
    }

    pub fn maybe_pop_incoming_msg(&mut self) -> Option<Box<Msg>> {
        // When incoming and complete both have content, alternate
        // messages from one or the other.
        if self.incoming.len() + self.complete.len() & 1 == 0 {
            self.incoming.pop_front()
        } else {
            None
        }
    }

    pub fn recv_msg(&mut self) -> Result<RecvMsg, Error> {
        if self.incoming.is_empty() && self.complete.is_empty() {
            if let Some((src, buf)) = self.ioqueues.incoming.pop_front() {
                self.decode_msg(src, buf)?;
            }
        }

        if let Some(msg) = self.maybe_pop_incoming_msg() {
            Ok(RecvMsg::Single(msg))
        } else if let Some(id) = self.complete.pop_front() {
            if let Some(req) = self.requests.remove(&id) {
                if req.req.sequence != id {
                    return Err(err("Unexpected sequence"));
                }
                if req.req.response {
                    return Err(err("Request is a response"));
                }
                if let Some(res) = req.res {
                    if res.sequence != id {
                        return Err(err("Mismatched sequence"));
                    }
                    if !res.response {
                        return Err(err("Response is not a response"));
                    }
                    Ok(RecvMsg::Paired { req: req.req, res })
                } else {
                    Err(err("Missing response in complete request"))
                }
            } else {
                Err(err("Missing request"))
            }
        } else {
            Ok(RecvMsg::NoMsgs)
        }
    }

    pub fn recv_bytes(&mut self, src: NodeID, buf: Box<[u8]>) -> Result<(), Error> {
        self.ioqueues.incoming.push_back((src, buf));
        Ok(())
    }

    pub fn send_bytes(&mut self) -> Result<Option<(NodeID, Box<[u8]>)>, Error> {
        if let Some((dst, buf)) = self.ioqueues.outgoing.pop_front() {
            Ok(Some((dst, buf)))
        } else {
            Ok(None)
        }
    }

    /// Pending request count: used by the response collector's liveness
    /// check to decide how many outstanding callbacks a timeout would
    /// still need to resolve or drop.
    pub fn pending_request_count(&self) -> usize {
        self.requests.len()
    }

    fn decode_msg(&mut self, src: NodeID, buf: Box<[u8]>) -> Result<(), Error> {
        let msg: Box<Msg> = Box::new(rmp_serde::from_slice(buf.as_ref())?);
        if msg.src != src {
            return Err(err("Mismatched source"));
        }
        if let Some(req) = self.requests.get_mut(&msg.sequence) {
            if req.res.is_none() {
                self.complete.push_back(msg.sequence);
                req.res = Some(msg);
            } else {
                return Err(err("Duplicate response"));
            }
        } else {
            self.incoming.push_back(msg);
        }
        Ok(())
    }
}
