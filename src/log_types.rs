//! `LogMetaData` and `LogEntry` — the durable record types stored under
//! `(logspace_id, seqnum)`. Grounded on `spec.md` §3 and the metadata
//! population helpers in `original_source/src/log/storage.cpp`
//! (`PopulateMetaDataFromRequest`/`PopulateMetaDataToResponse`).

use crate::protocol::SharedLogMessage;

/// Immutable once stored; never rewritten for a given `(logspace_id, seqnum)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMetaData {
    pub logspace_id: u32,
    pub seqnum: u64,
    pub user_logspace: u32,
    pub user_tag: u64,
    pub data_size: u32,
    pub source_node_id: u16,
}

impl LogMetaData {
    pub fn from_request(message: &SharedLogMessage) -> Self {
        LogMetaData {
            logspace_id: message.logspace_id,
            seqnum: message.seqnum,
            user_logspace: message.user_logspace,
            user_tag: message.user_tag,
            data_size: message.payload_size,
            source_node_id: message.src_node_id,
        }
    }

    pub fn populate_response(&self, response: &mut SharedLogMessage) {
        response.logspace_id = self.logspace_id;
        response.seqnum = self.seqnum;
        response.user_logspace = self.user_logspace;
        response.user_tag = self.user_tag;
        response.payload_size = self.data_size;
    }
}

/// `LogMetaData` plus the payload bytes, stored under key `(logspace_id, seqnum)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub metadata: LogMetaData,
    pub data: Vec<u8>,
}

impl LogEntry {
    pub fn new(metadata: LogMetaData, data: Vec<u8>) -> Self {
        debug_assert_eq!(metadata.data_size as usize, data.len());
        LogEntry { metadata, data }
    }
}
