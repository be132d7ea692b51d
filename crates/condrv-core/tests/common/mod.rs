//! In-memory transport and host scratchpads shared by the dispatch tests.
#![allow(dead_code)]

use condrv_common::error::{win32, CommResult, DeviceCommError};
use condrv_common::traits::{DeviceComm, HostIo, IoComplete};
use condrv_common::types::IoStatus;
use condrv_core::server::wire::{
    ApiNumber, ConnectionInformation, IoDescriptor, MsgHeader, CONSOLE_IO_CONNECT,
    CONSOLE_IO_USER_DEFINED, MSG_HEADER_SIZE,
};
use condrv_core::{dispatch_message, ApiMessage, ServerState};

/// Transport backed by plain vectors; reads past the end zero-fill, and
/// writes grow the output
#[derive(Default)]
pub struct MemoryComm {
    pub input: Vec<u8>,
    pub output: Vec<u8>,
    pub completions: Vec<IoStatus>,
}

impl DeviceComm for MemoryComm {
    fn read_input(&mut self, offset: u64, dest: &mut [u8]) -> CommResult<()> {
        let offset = offset as usize;
        if offset > self.input.len() {
            return Err(DeviceCommError::new(
                "read_input offset exceeded input size",
                win32::ERROR_INVALID_DATA,
            ));
        }
        for (i, byte) in dest.iter_mut().enumerate() {
            *byte = self.input.get(offset + i).copied().unwrap_or(0);
        }
        Ok(())
    }

    fn write_output(&mut self, offset: u64, src: &[u8]) -> CommResult<()> {
        let offset = offset as usize;
        if self.output.len() < offset + src.len() {
            self.output.resize(offset + src.len(), 0);
        }
        self.output[offset..offset + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn complete_io(&mut self, completion: IoComplete<'_>) -> CommResult<()> {
        self.completions.push(completion.io_status);
        Ok(())
    }
}

/// Host scratchpad that records writes and control events, serves a byte
/// queue, and refuses `wait_for_input` (dispatch must never block)
pub struct StrictHost {
    pub written: Vec<u8>,
    pub queue: Vec<u8>,
    pub queue_offset: usize,
    pub disconnected: bool,
    pub wait_called: bool,
    pub answer_queries: bool,
    pub end_tasks: Vec<(u32, u32, u32)>,
    pub flushes: usize,
}

impl Default for StrictHost {
    fn default() -> Self {
        Self {
            written: Vec::new(),
            queue: Vec::new(),
            queue_offset: 0,
            disconnected: false,
            wait_called: false,
            answer_queries: true,
            end_tasks: Vec::new(),
            flushes: 0,
        }
    }
}

impl StrictHost {
    pub fn inject(&mut self, bytes: &[u8]) {
        self.queue.extend_from_slice(bytes);
    }
}

impl HostIo for StrictHost {
    fn write_output_bytes(&mut self, bytes: &[u8]) -> CommResult<usize> {
        self.written.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn read_input_bytes(&mut self, dest: &mut [u8]) -> CommResult<usize> {
        let remaining = self.input_bytes_available();
        let copied = remaining.min(dest.len());
        dest[..copied].copy_from_slice(&self.queue[self.queue_offset..self.queue_offset + copied]);
        self.queue_offset += copied;
        Ok(copied)
    }

    fn peek_input_bytes(&mut self, dest: &mut [u8]) -> CommResult<usize> {
        let remaining = self.input_bytes_available();
        let copied = remaining.min(dest.len());
        dest[..copied].copy_from_slice(&self.queue[self.queue_offset..self.queue_offset + copied]);
        Ok(copied)
    }

    fn input_bytes_available(&self) -> usize {
        self.queue.len().saturating_sub(self.queue_offset)
    }

    fn inject_input_bytes(&mut self, bytes: &[u8]) -> bool {
        self.queue.extend_from_slice(bytes);
        true
    }

    fn flush_input_buffer(&mut self) -> CommResult<()> {
        self.queue.clear();
        self.queue_offset = 0;
        self.flushes += 1;
        Ok(())
    }

    fn vt_should_answer_queries(&self) -> bool {
        self.answer_queries
    }

    fn wait_for_input(&mut self, _timeout_ms: u32) -> CommResult<bool> {
        self.wait_called = true;
        Err(DeviceCommError::new(
            "wait_for_input must not be called from dispatch_message",
            win32::ERROR_INVALID_STATE,
        ))
    }

    fn input_disconnected(&self) -> bool {
        self.disconnected
    }

    fn send_end_task(&mut self, process_id: u32, event_type: u32, ctrl_flags: u32) -> CommResult<()> {
        self.end_tasks.push((process_id, event_type, ctrl_flags));
        Ok(())
    }
}

/// Register a connection and hand back its object ids
pub fn connect(state: &mut ServerState, host: &mut StrictHost, pid: u32, tid: u32) -> ConnectionInformation {
    let mut comm = MemoryComm::default();
    let descriptor = IoDescriptor {
        identifier: 1,
        function: CONSOLE_IO_CONNECT,
        process: pid,
        object: tid,
        input_size: 0,
        output_size: 0,
    };
    let mut message = ApiMessage::new(&mut comm, descriptor);
    let outcome = dispatch_message(state, &mut message, host).expect("connect dispatch");
    assert!(!outcome.reply_pending);
    ConnectionInformation::decode(&message.completion().write).expect("connection info")
}

/// Assemble a USER_DEFINED request: the transport input carries the
/// header, the descriptor bytes, and any inline payload
pub fn user_defined(
    identifier: u64,
    process: u32,
    object: u32,
    api: ApiNumber,
    descriptor_bytes: &[u8],
    payload: &[u8],
    output_payload_capacity: usize,
) -> (MemoryComm, IoDescriptor) {
    let header = MsgHeader {
        api_number: api.as_u32(),
        api_descriptor_size: descriptor_bytes.len() as u32,
    };

    let mut comm = MemoryComm::default();
    comm.input.extend_from_slice(&header.encode());
    comm.input.extend_from_slice(descriptor_bytes);
    comm.input.extend_from_slice(payload);

    let descriptor = IoDescriptor {
        identifier,
        function: CONSOLE_IO_USER_DEFINED,
        process,
        object,
        input_size: (MSG_HEADER_SIZE + descriptor_bytes.len() + payload.len()) as u32,
        output_size: (descriptor_bytes.len() + output_payload_capacity) as u32,
    };
    (comm, descriptor)
}

/// UTF-16LE helper for wire payloads
pub fn utf16_bytes(text: &str) -> Vec<u8> {
    text.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

pub fn le_units(bytes: &[u8]) -> Vec<u16> {
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}
