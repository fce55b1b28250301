// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Windows console control.
//!
//! Raw mode on the console means: no echo, no line buffering, no Ctrl-C
//! processing, VT sequences accepted on input and interpreted on output, and
//! UTF-8 code pages in both directions.

use std::io;
use std::time::Duration;

use tracing::{debug, warn};
use windows_sys::Win32::Foundation::{HANDLE, INVALID_HANDLE_VALUE};
use windows_sys::Win32::System::Console::{
    GetConsoleCP, GetConsoleMode, GetConsoleOutputCP, GetStdHandle, SetConsoleCP, SetConsoleMode,
    SetConsoleOutputCP, CONSOLE_MODE, ENABLE_ECHO_INPUT, ENABLE_LINE_INPUT,
    ENABLE_PROCESSED_INPUT, ENABLE_VIRTUAL_TERMINAL_INPUT, ENABLE_VIRTUAL_TERMINAL_PROCESSING,
    STD_HANDLE, STD_INPUT_HANDLE, STD_OUTPUT_HANDLE,
};

use super::{current_size, stdin_is_terminal, TerminalController};
use crate::exec::error::TerminalError;
use crate::exec::protocol::TerminalSize;
use crate::exec::resize::ResizeEvents;

const UTF8_CODE_PAGE: u32 = 65001;

#[derive(Debug, Clone, Copy)]
struct ConsoleSnapshot {
    input_mode: CONSOLE_MODE,
    output_mode: CONSOLE_MODE,
    input_code_page: u32,
    output_code_page: u32,
}

pub(crate) fn std_handle(which: STD_HANDLE) -> io::Result<HANDLE> {
    let handle = unsafe { GetStdHandle(which) };
    if handle == INVALID_HANDLE_VALUE || handle.is_null() {
        return Err(io::Error::last_os_error());
    }
    Ok(handle)
}

fn console_mode(handle: HANDLE) -> io::Result<CONSOLE_MODE> {
    let mut mode: CONSOLE_MODE = 0;
    if unsafe { GetConsoleMode(handle, &mut mode) } == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(mode)
}

fn set_console_mode(handle: HANDLE, mode: CONSOLE_MODE) -> io::Result<()> {
    if unsafe { SetConsoleMode(handle, mode) } == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn set_code_pages(input: u32, output: u32) -> io::Result<()> {
    if unsafe { SetConsoleCP(input) } == 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { SetConsoleOutputCP(output) } == 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Raw-mode control of the attached console.
#[derive(Default)]
pub struct WindowsConsole {
    saved: Option<ConsoleSnapshot>,
}

impl WindowsConsole {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot() -> io::Result<ConsoleSnapshot> {
        let input = std_handle(STD_INPUT_HANDLE)?;
        let output = std_handle(STD_OUTPUT_HANDLE)?;
        Ok(ConsoleSnapshot {
            input_mode: console_mode(input)?,
            output_mode: console_mode(output)?,
            input_code_page: unsafe { GetConsoleCP() },
            output_code_page: unsafe { GetConsoleOutputCP() },
        })
    }

    fn apply(snapshot: &ConsoleSnapshot) -> io::Result<()> {
        let input = std_handle(STD_INPUT_HANDLE)?;
        let output = std_handle(STD_OUTPUT_HANDLE)?;

        set_code_pages(UTF8_CODE_PAGE, UTF8_CODE_PAGE)?;

        let raw_input = (snapshot.input_mode | ENABLE_VIRTUAL_TERMINAL_INPUT)
            & !(ENABLE_ECHO_INPUT | ENABLE_LINE_INPUT | ENABLE_PROCESSED_INPUT);
        set_console_mode(input, raw_input)?;
        set_console_mode(output, snapshot.output_mode | ENABLE_VIRTUAL_TERMINAL_PROCESSING)
    }

    fn put_back(snapshot: &ConsoleSnapshot) -> io::Result<()> {
        let input = std_handle(STD_INPUT_HANDLE)?;
        let output = std_handle(STD_OUTPUT_HANDLE)?;

        // Every step is attempted; the first failure is reported.
        let results = [
            set_console_mode(input, snapshot.input_mode),
            set_console_mode(output, snapshot.output_mode),
            set_code_pages(snapshot.input_code_page, snapshot.output_code_page),
        ];
        results.into_iter().collect()
    }
}

impl TerminalController for WindowsConsole {
    fn enter_raw_mode(&mut self) -> Result<(), TerminalError> {
        if self.saved.is_some() {
            return Ok(());
        }
        if !stdin_is_terminal() {
            return Err(TerminalError::NotATerminal);
        }

        let snapshot = Self::snapshot().map_err(TerminalError::Snapshot)?;
        self.saved = Some(snapshot);
        Self::apply(&snapshot).map_err(TerminalError::Apply)?;

        debug!("Console switched to raw VT mode");
        Ok(())
    }

    fn restore(&mut self) -> Result<(), TerminalError> {
        let Some(snapshot) = self.saved.take() else {
            return Ok(());
        };
        Self::put_back(&snapshot).map_err(TerminalError::Restore)?;
        debug!("Console settings restored");
        Ok(())
    }

    fn is_raw(&self) -> bool {
        self.saved.is_some()
    }

    fn size(&self) -> Option<TerminalSize> {
        current_size()
    }

    fn resize_events(&self, poll_interval: Duration) -> ResizeEvents {
        ResizeEvents::polling(poll_interval, Box::new(current_size))
    }
}

impl Drop for WindowsConsole {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            warn!("{e}");
        }
    }
}
