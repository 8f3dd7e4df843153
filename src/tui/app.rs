//! Debugger application state and logic.

use crate::asm::disasm::{listing, Line};
use crate::cpu::{Cpu, CpuConfig, CpuError, SegmentId};
use crate::asm::Program;
use std::collections::{HashMap, HashSet};

/// Bytes shown per memory row.
pub const ROW_BYTES: usize = 16;

/// Debugger application state.
pub struct DebuggerApp {
    /// The CPU being debugged.
    pub cpu: Cpu,
    /// Machine layout, reused on reset.
    config: CpuConfig,
    /// Original program for reference.
    pub program: Program,
    /// Disassembly of the whole program, with function names at their
    /// first line.
    pub code: Vec<(Option<String>, Line)>,
    /// Breakpoints (by program address).
    pub breakpoints: HashSet<u16>,
    /// Is the debugger running continuously?
    pub running: bool,
    /// Should we quit?
    pub should_quit: bool,
    /// Status message to display.
    pub status: String,
    /// Segment shown in the memory view.
    pub segment: SegmentId,
    /// Memory view scroll offset, in rows.
    pub mem_scroll: usize,
}

impl DebuggerApp {
    /// Create a new debugger with a loaded program.
    pub fn new(program: Program, config: CpuConfig) -> Result<Self, CpuError> {
        let mut cpu = Cpu::with_config(&config)?;
        program.load_into(&mut cpu)?;
        let code = disassemble_program(&program, &cpu);

        Ok(Self {
            cpu,
            config,
            program,
            code,
            breakpoints: HashSet::new(),
            running: false,
            should_quit: false,
            status: "Ready. Press 's' to step, 'r' to run, 'q' to quit.".into(),
            segment: SegmentId::Stack,
            mem_scroll: 0,
        })
    }

    /// Step one instruction.
    pub fn step(&mut self) {
        if !self.cpu.is_running() {
            self.status = format!("CPU stopped: {:?}", self.cpu.state);
            self.running = false;
            return;
        }

        let ip = self.cpu.ip();
        match self.cpu.step() {
            Ok(_) => {
                let text = self
                    .line_at(ip)
                    .map(|line| line.text.clone())
                    .unwrap_or_else(|| "???".into());
                self.status = format!("ip={:04x}: {}", ip, text);
            }
            Err(e) => {
                self.status = format!("Error: {}", e);
                self.running = false;
            }
        }
    }

    /// Run until halt, breakpoint, or error.
    pub fn run(&mut self) {
        self.running = true;
        self.status = "Running...".into();
    }

    /// Run one iteration of continuous execution.
    pub fn tick(&mut self) {
        if !self.running {
            return;
        }

        if !self.cpu.is_running() {
            self.running = false;
            self.status = format!("Stopped after {} cycles", self.cpu.cycles);
            return;
        }

        self.step();

        let ip = self.cpu.ip();
        if self.running && self.breakpoints.contains(&ip) {
            self.running = false;
            self.status = format!("Breakpoint at ip={:04x}", ip);
        }
    }

    /// Toggle breakpoint at the current instruction pointer.
    pub fn toggle_breakpoint(&mut self) {
        let ip = self.cpu.ip();
        if self.breakpoints.remove(&ip) {
            self.status = format!("Removed breakpoint at ip={:04x}", ip);
        } else {
            self.breakpoints.insert(ip);
            self.status = format!("Set breakpoint at ip={:04x}", ip);
        }
    }

    /// Reset CPU to initial state and reload the program.
    pub fn reset(&mut self) {
        self.cpu.reset();
        self.running = false;
        self.status = match self.program.load_into(&mut self.cpu) {
            Ok(()) => "Reset. Ready.".into(),
            Err(e) => format!("Reload failed: {}", e),
        };
    }

    /// Rebuild the CPU from the stored configuration.
    pub fn rebuild(&mut self) -> Result<(), CpuError> {
        self.cpu = Cpu::with_config(&self.config)?;
        self.program.load_into(&mut self.cpu)
    }

    /// Show the next segment in the memory view.
    pub fn next_segment(&mut self) {
        let pos = SegmentId::ALL.iter().position(|&id| id == self.segment).unwrap_or(0);
        self.segment = SegmentId::ALL[(pos + 1) % SegmentId::ALL.len()];
        self.mem_scroll = 0;
        if self.segment == SegmentId::Stack {
            self.scroll_to_sp();
        }
    }

    /// Scroll the memory view so the stack pointer is visible.
    pub fn scroll_to_sp(&mut self) {
        self.mem_scroll = (self.cpu.sp() as usize / ROW_BYTES).saturating_sub(2);
    }

    /// Number of rows in the current memory view.
    pub fn mem_rows(&self) -> usize {
        self.cpu.segment(self.segment).capacity().div_ceil(ROW_BYTES)
    }

    /// The disassembled instruction starting at `addr`.
    pub fn line_at(&self, addr: u16) -> Option<&Line> {
        self.code
            .iter()
            .map(|(_, line)| line)
            .find(|line| line.addr == addr as usize)
    }

    /// Disassembly lines around the current instruction pointer.
    pub fn get_disassembly(&self, lines: usize) -> &[(Option<String>, Line)] {
        let ip = self.cpu.ip() as usize;
        let current = self
            .code
            .iter()
            .position(|(_, line)| line.addr + line.bytes.len() > ip)
            .unwrap_or(0);
        let start = current.saturating_sub(lines / 2);
        let end = (start + lines).min(self.code.len());
        &self.code[start..end]
    }
}

fn disassemble_program(program: &Program, cpu: &Cpu) -> Vec<(Option<String>, Line)> {
    let labels: HashMap<u16, String> = cpu
        .labels()
        .iter()
        .map(|(name, &addr)| (addr, name.clone()))
        .collect();

    let mut code = Vec::new();
    for ((name, bytes), (_, base)) in program.functions.iter().zip(program.labels()) {
        for (i, line) in listing(bytes, base, &cpu.regs, &labels).into_iter().enumerate() {
            let label = (i == 0).then(|| name.clone());
            code.push((label, line));
        }
    }
    code
}

/// Run the debugger with a program.
pub fn run_debugger(program: Program, config: CpuConfig) -> std::io::Result<()> {
    use crossterm::{
        event::{self, Event, KeyCode, KeyEventKind},
        terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
        ExecutableCommand,
    };
    use ratatui::prelude::*;
    use std::io::stdout;
    use std::time::Duration;

    // Build the app before touching the terminal so errors print normally
    let mut app = DebuggerApp::new(program, config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    // Main loop
    loop {
        // Draw
        terminal.draw(|frame| {
            super::ui::draw(frame, &app);
        })?;

        // Handle input
        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') => app.should_quit = true,
                        KeyCode::Char('s') => {
                            app.running = false;
                            app.step();
                        }
                        KeyCode::Char('r') => app.run(),
                        KeyCode::Char('p') => {
                            app.running = false;
                            app.status = "Paused.".into();
                        }
                        KeyCode::Char('b') => app.toggle_breakpoint(),
                        KeyCode::Char('x') => app.reset(),
                        KeyCode::Char('m') => app.next_segment(),
                        KeyCode::Up => {
                            app.mem_scroll = app.mem_scroll.saturating_sub(1);
                        }
                        KeyCode::Down => {
                            if app.mem_scroll + 1 < app.mem_rows() {
                                app.mem_scroll += 1;
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        // Tick for continuous running
        if app.running {
            app.tick();
        }

        if app.should_quit {
            break;
        }
    }

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(())
}
