//! Demonstration host for the console driver server.
//!
//! Builds an in-memory transport, connects a client, pushes text (with VT
//! sequences) through WriteConsole, and renders the resulting viewport
//! snapshot to stdout. Useful for eyeballing interpreter behavior without
//! a real driver channel.

use anyhow::{anyhow, Result};
use clap::Parser;
use condrv_common::error::CommResult;
use condrv_common::traits::{DeviceComm, HostIo, IoComplete};
use condrv_core::server::wire::{
    ApiNumber, IoDescriptor, MsgHeader, WriteConsoleMsg, CONSOLE_IO_CONNECT,
    CONSOLE_IO_USER_DEFINED, MSG_HEADER_SIZE,
};
use condrv_core::{dispatch_message, make_viewport_snapshot, ApiMessage, ServerState};
use std::io::{self, Read, Write};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Console driver server demo host", long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Text to write through the server (reads stdin when omitted)
    #[arg(long)]
    text: Option<String>,

    /// Treat the text as VT (enables virtual terminal processing)
    #[arg(long, default_value_t = true)]
    vt: bool,
}

/// Transport backed by plain vectors
#[derive(Default)]
struct MemoryComm {
    input: Vec<u8>,
    output: Vec<u8>,
}

impl DeviceComm for MemoryComm {
    fn read_input(&mut self, offset: u64, dest: &mut [u8]) -> CommResult<()> {
        let offset = offset as usize;
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
        debug!(
            "Completed: status={:?} information={}",
            completion.io_status.status, completion.io_status.information
        );
        Ok(())
    }
}

/// Host that renders nothing and answers no queries; the snapshot is the
/// demo's display path
#[derive(Default)]
struct NullHost {
    written: Vec<u8>,
}

impl HostIo for NullHost {
    fn write_output_bytes(&mut self, bytes: &[u8]) -> CommResult<usize> {
        self.written.extend_from_slice(bytes);
        Ok(bytes.len())
    }
    fn read_input_bytes(&mut self, _dest: &mut [u8]) -> CommResult<usize> {
        Ok(0)
    }
    fn peek_input_bytes(&mut self, _dest: &mut [u8]) -> CommResult<usize> {
        Ok(0)
    }
    fn input_bytes_available(&self) -> usize {
        0
    }
    fn inject_input_bytes(&mut self, _bytes: &[u8]) -> bool {
        true
    }
    fn flush_input_buffer(&mut self) -> CommResult<()> {
        Ok(())
    }
    fn vt_should_answer_queries(&self) -> bool {
        false
    }
    fn wait_for_input(&mut self, _timeout_ms: u32) -> CommResult<bool> {
        Ok(false)
    }
    fn input_disconnected(&self) -> bool {
        false
    }
    fn send_end_task(&mut self, pid: u32, event: u32, _flags: u32) -> CommResult<()> {
        info!("send_end_task pid={} event={}", pid, event);
        Ok(())
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug { "condrv=debug" } else { "condrv=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let text = match args.text {
        Some(text) => text,
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };

    let mut state = ServerState::new();
    // processed + wrap, with or without virtual terminal processing
    state.set_output_mode(if args.vt { 0x0007 } else { 0x0003 });
    let mut host = NullHost::default();

    // Connect
    let mut connect_comm = MemoryComm::default();
    let connect_descriptor = IoDescriptor {
        identifier: 1,
        function: CONSOLE_IO_CONNECT,
        process: std::process::id(),
        object: 0,
        input_size: 0,
        output_size: 0,
    };
    let mut connect = ApiMessage::new(&mut connect_comm, connect_descriptor);
    dispatch_message(&mut state, &mut connect, &mut host)?;
    let info = condrv_core::server::wire::ConnectionInformation::decode(&connect.completion().write)
        .ok_or_else(|| anyhow!("connect produced no connection information"))?;
    info!("Connected: input={} output={}", info.input, info.output);

    // WriteConsole (ANSI payload)
    let msg = WriteConsoleMsg {
        num_bytes: text.len() as u32,
        unicode: false,
    };
    let header = MsgHeader {
        api_number: ApiNumber::WriteConsole.as_u32(),
        api_descriptor_size: WriteConsoleMsg::SIZE as u32,
    };
    let mut comm = MemoryComm::default();
    comm.input.extend_from_slice(&header.encode());
    comm.input.extend_from_slice(&msg.encode());
    comm.input.extend_from_slice(text.as_bytes());

    let write_descriptor = IoDescriptor {
        identifier: 2,
        function: CONSOLE_IO_USER_DEFINED,
        process: info.process,
        object: info.output,
        input_size: (MSG_HEADER_SIZE + WriteConsoleMsg::SIZE + text.len()) as u32,
        output_size: WriteConsoleMsg::SIZE as u32,
    };
    let mut write = ApiMessage::new(&mut comm, write_descriptor);
    dispatch_message(&mut state, &mut write, &mut host)?;

    // Render the viewport
    let snapshot = make_viewport_snapshot(&state.active_screen().buffer)
        .map_err(|e| anyhow!("snapshot failed: {}", e))?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let width = snapshot.viewport_size.x as usize;
    for row in snapshot.text.chunks(width) {
        let line: String = String::from_utf16_lossy(row);
        writeln!(out, "{}", line.trim_end())?;
    }
    info!(
        "Cursor at {:?}, title {:?}, revision {}",
        snapshot.cursor_position,
        state.title(),
        snapshot.revision
    );

    Ok(())
}
