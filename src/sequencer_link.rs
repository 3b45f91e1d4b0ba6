//! The boundary between an engine/storage node and its sequencer. The
//! sequencer's own consensus and global-cut logic is out of scope; this
//! module only defines what crosses the wire and enforces, at the type
//! level, that the direction of each message matches what the real
//! sequencer actually does.
//!
//! Grounded on `original_source/src/sequencer/server.cpp`'s
//! `Server::OnRecvNodeMessage` (receives only `LOCAL_CUT`, via
//! `LocalCutMsgProto`) and `Server::SendFsmRecordsMessage` (the only
//! message it ever originates, carrying opaque FSM record bytes) — the
//! sequencer never issues `REPLICATE`/`READ_AT` itself, so those variants
//! have no place in `ToSequencer`.

use crate::ids::NodeId;
use crate::pb::faas::LocalCutMsgProto;

/// A message an engine or storage node sends to the sequencer. The
/// sequencer only ever receives local-cut reports; it is never the
/// initiator of a replicated write or a read.
#[derive(Debug, Clone, PartialEq)]
pub struct ToSequencer {
    pub node_id: NodeId,
    pub logspace_id: u32,
    pub local_seqnums: Vec<u64>,
}

impl ToSequencer {
    pub fn into_proto(self) -> LocalCutMsgProto {
        LocalCutMsgProto {
            logspace_id: self.logspace_id,
            node_id: self.node_id as u32,
            local_seqnums: self.local_seqnums,
        }
    }

    pub fn from_proto(proto: LocalCutMsgProto) -> Self {
        ToSequencer {
            node_id: proto.node_id as u16,
            logspace_id: proto.logspace_id,
            local_seqnums: proto.local_seqnums,
        }
    }
}

/// A message the sequencer sends down to a node: a batch of FSM records
/// (the serialized global-cut decisions) to apply locally. Opaque payload
/// bytes, since the FSM record format belongs to the sequencer's own
/// consensus state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct FromSequencer {
    pub data: Vec<u8>,
}

/// Push-only directionality: a node can only ever be the sender of
/// [`ToSequencer`] and the receiver of [`FromSequencer`]. Modeled as a
/// trait rather than a single bidirectional message enum so a misplaced
/// call (e.g. a storage node trying to "send" a `FromSequencer`) is a
/// compile error, not a runtime assertion.
pub trait SequencerLink: Send + Sync {
    fn send_local_cut(&self, message: ToSequencer);
    fn poll_fsm_records(&mut self) -> Option<FromSequencer>;
}

/// An in-process link used by tests and single-binary deployments where the
/// sequencer role isn't actually implemented: local cuts are recorded for
/// inspection, and FSM records can be injected to simulate a push from a
/// real sequencer.
pub struct LoopbackSequencerLink {
    sent: std::sync::Mutex<Vec<ToSequencer>>,
    incoming: std::sync::Mutex<std::collections::VecDeque<FromSequencer>>,
}

impl LoopbackSequencerLink {
    pub fn new() -> Self {
        LoopbackSequencerLink {
            sent: std::sync::Mutex::new(Vec::new()),
            incoming: std::sync::Mutex::new(std::collections::VecDeque::new()),
        }
    }

    pub fn sent_messages(&self) -> Vec<ToSequencer> {
        self.sent.lock().unwrap().clone()
    }

    pub fn inject(&self, message: FromSequencer) {
        self.incoming.lock().unwrap().push_back(message);
    }
}

impl Default for LoopbackSequencerLink {
    fn default() -> Self {
        Self::new()
    }
}

impl SequencerLink for LoopbackSequencerLink {
    fn send_local_cut(&self, message: ToSequencer) {
        self.sent.lock().unwrap().push(message);
    }

    fn poll_fsm_records(&mut self) -> Option<FromSequencer> {
        self.incoming.get_mut().unwrap().pop_front()
    }
}
