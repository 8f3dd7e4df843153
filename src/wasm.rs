//! WebAssembly bindings for the register machine.
//!
//! This module provides JavaScript-friendly wrappers around the core emulator.

use wasm_bindgen::prelude::*;
use crate::cpu::{Cpu, SegmentId};
use crate::asm::{assemble, Program};
use crate::asm::disasm::disassemble_instruction;
use crate::cpu::alu::{self, AluOp};

/// Initialize panic hook for better error messages in console.
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
}

fn js_err<E: std::fmt::Display>(e: E) -> JsError {
    JsError::new(&e.to_string())
}

fn segment_id(name: &str) -> Result<SegmentId, JsError> {
    SegmentId::ALL
        .into_iter()
        .find(|id| id.name() == name)
        .ok_or_else(|| JsError::new(&format!("unknown segment {:?}", name)))
}

/// WebAssembly-friendly CPU wrapper.
#[wasm_bindgen]
pub struct WasmCpu {
    cpu: Cpu,
    program: Program,
}

#[wasm_bindgen]
impl WasmCpu {
    /// Create a new CPU instance.
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        Self {
            cpu: Cpu::new(),
            program: Program::default(),
        }
    }

    /// Load a program from assembly source code. Returns its size in bytes.
    #[wasm_bindgen]
    pub fn load_asm(&mut self, source: &str) -> Result<usize, JsError> {
        let program = assemble(source).map_err(js_err)?;

        self.cpu = Cpu::new();
        program.load_into(&mut self.cpu).map_err(js_err)?;
        let len = program.byte_count;
        self.program = program;

        Ok(len)
    }

    /// Step one instruction. Returns the disassembled instruction.
    #[wasm_bindgen]
    pub fn step(&mut self) -> Result<String, JsError> {
        if !self.cpu.is_running() {
            return Err(JsError::new("CPU is not running"));
        }

        let ip = self.cpu.ip() as usize;
        let bytes = self.cpu.program.slice(ip, 4.min(self.cpu.program.capacity().saturating_sub(ip)))
            .map_err(js_err)?
            .to_vec();
        self.cpu.step().map_err(js_err)?;

        Ok(disassemble_instruction(&bytes, &self.cpu.regs).0)
    }

    /// Run until halt or max cycles.
    #[wasm_bindgen]
    pub fn run(&mut self, max_cycles: u32) -> Result<u64, JsError> {
        self.cpu.run_limited(max_cycles as u64).map_err(js_err)?;
        Ok(self.cpu.cycles)
    }

    /// Reset CPU to initial state with loaded program.
    #[wasm_bindgen]
    pub fn reset(&mut self) -> Result<(), JsError> {
        self.cpu.reset();
        if !self.program.is_empty() {
            self.program.load_into(&mut self.cpu).map_err(js_err)?;
        }
        Ok(())
    }

    /// Check if CPU is running.
    #[wasm_bindgen]
    pub fn is_running(&self) -> bool {
        self.cpu.is_running()
    }

    /// Check if CPU is halted.
    #[wasm_bindgen]
    pub fn is_halted(&self) -> bool {
        self.cpu.is_halted()
    }

    /// Get cycle count.
    #[wasm_bindgen]
    pub fn cycles(&self) -> u64 {
        self.cpu.cycles
    }

    /// Get instruction pointer.
    #[wasm_bindgen]
    pub fn ip(&self) -> u16 {
        self.cpu.ip()
    }

    /// Get stack pointer.
    #[wasm_bindgen]
    pub fn sp(&self) -> u16 {
        self.cpu.sp()
    }

    /// Read a register by name.
    #[wasm_bindgen]
    pub fn register(&self, name: &str) -> Result<u16, JsError> {
        self.cpu.regs.get_named(name).map_err(js_err)
    }

    /// Get state as string.
    #[wasm_bindgen]
    pub fn state(&self) -> String {
        format!("{:?}", self.cpu.state)
    }

    /// Read the word at `addr` in a segment (`general`, `program`, `io`,
    /// `display` or `stack`).
    #[wasm_bindgen]
    pub fn memory_at(&self, segment: &str, addr: usize) -> Result<u16, JsError> {
        let id = segment_id(segment)?;
        self.cpu.segment(id).get_u16(addr).map_err(js_err)
    }

    /// Copy of a whole segment.
    #[wasm_bindgen]
    pub fn segment_bytes(&self, segment: &str) -> Result<js_sys::Uint8Array, JsError> {
        let id = segment_id(segment)?;
        let seg = self.cpu.segment(id);
        let bytes = seg.slice(0, seg.capacity()).map_err(js_err)?;
        Ok(js_sys::Uint8Array::from(bytes))
    }

    /// Get registers and flags as JSON string.
    #[wasm_bindgen]
    pub fn registers_json(&self) -> String {
        let registers: serde_json::Map<String, serde_json::Value> = self
            .cpu
            .regs
            .dump()
            .into_iter()
            .map(|(name, value)| (name.to_string(), value.into()))
            .collect();

        serde_json::json!({
            "registers": registers,
            "flags": self.cpu.flags(),
            "cycles": self.cpu.cycles,
            "state": self.cpu.state,
        })
        .to_string()
    }
}

impl Default for WasmCpu {
    fn default() -> Self {
        Self::new()
    }
}

/// Assemble source code and return the program size in bytes.
#[wasm_bindgen]
pub fn wasm_assemble(source: &str) -> Result<usize, JsError> {
    let program = assemble(source).map_err(js_err)?;
    Ok(program.byte_count)
}

/// Disassemble a single instruction using the reference register names.
#[wasm_bindgen]
pub fn wasm_disassemble(bytes: &[u8]) -> String {
    let regs = crate::cpu::Registers::new(&crate::cpu::config::DEFAULT_REGISTERS);
    disassemble_instruction(bytes, &regs).0
}

/// Evaluate `a op b` on the ALU. Returns the 16-bit result.
#[wasm_bindgen]
pub fn wasm_calc(a: u16, op: &str, b: u16) -> Result<u16, JsError> {
    let op: AluOp = op.parse().map_err(js_err)?;
    let out = alu::compute(op, a, b).map_err(js_err)?;
    Ok(out.word())
}
