//! CPU execution engine.
//!
//! Implements the fetch-decode-execute cycle, the stack discipline and
//! call linkage on top of the register file, the ALU and the five memory
//! segments.

use crate::cpu::alu::{self, AluError, AluOp, Flags};
use crate::cpu::config::{ConfigError, CpuConfig};
use crate::cpu::decode::{DecodeError, Instruction, OperandSource, Opcode};
use crate::cpu::memory::{MemoryError, Segment};
use crate::cpu::registers::{RegIndex, RegisterError, Registers};
use serde::{Serialize, Deserialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Name of the function execution starts in, when present.
pub const ENTRY_FUNCTION: &str = "main";

/// CPU execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuState {
    /// CPU is running normally.
    Running,
    /// CPU has halted (executed HLT instruction).
    Halted,
    /// CPU encountered an error.
    Error,
}

/// Identifies one of the CPU's memory segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SegmentId {
    General,
    Program,
    Io,
    Display,
    Stack,
}

impl SegmentId {
    pub const ALL: [SegmentId; 5] = [
        SegmentId::General,
        SegmentId::Program,
        SegmentId::Io,
        SegmentId::Display,
        SegmentId::Stack,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SegmentId::General => "general",
            SegmentId::Program => "program",
            SegmentId::Io => "io",
            SegmentId::Display => "display",
            SegmentId::Stack => "stack",
        }
    }
}

/// Offsets of the registers the CPU manipulates implicitly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Special {
    ip: RegIndex,
    lr: RegIndex,
    ac: RegIndex,
    sp: RegIndex,
    fp: RegIndex,
}

/// The CPU.
#[derive(Clone, Serialize, Deserialize)]
pub struct Cpu {
    /// Register file.
    pub regs: Registers,
    /// General-purpose data memory (`LW`/`SW`).
    pub general: Segment,
    /// Program memory, written once by [`Cpu::load_program`].
    pub program: Segment,
    /// Reserved I/O-mapped memory.
    pub io: Segment,
    /// Reserved display-mapped memory.
    pub display: Segment,
    /// Stack memory; grows toward lower addresses.
    pub stack: Segment,
    /// Current execution state.
    pub state: CpuState,
    /// Instruction count (for profiling).
    pub cycles: u64,
    /// Condition flags of the most recent arithmetic/logical instruction.
    flags: Flags,
    /// Function name -> program offset.
    labels: HashMap<String, u16>,
    special: Special,
    sp_max: u16,
    call_depth: usize,
    loaded: bool,
    /// Last executed instruction (for debugging).
    last_instr: Option<Instruction>,
}

impl Cpu {
    /// Create a CPU with the reference configuration.
    pub fn new() -> Self {
        match Self::with_config(&CpuConfig::default()) {
            Ok(cpu) => cpu,
            Err(e) => unreachable!("reference configuration is valid: {}", e),
        }
    }

    /// Create a CPU from an explicit configuration.
    pub fn with_config(config: &CpuConfig) -> Result<Self, CpuError> {
        config.validate()?;

        let regs = Registers::new(&config.registers);
        let special = Special {
            ip: regs.index_of("ip")?,
            lr: regs.index_of("lr")?,
            ac: regs.index_of("ac")?,
            sp: regs.index_of("sp")?,
            fp: regs.index_of("fp")?,
        };
        let stack = Segment::new(config.stack);
        // The top word of the stack occupies the last two bytes.
        let sp_max = u16::try_from(stack.capacity() - 2).unwrap_or(u16::MAX - 1);

        let mut cpu = Self {
            regs,
            general: Segment::new(config.general),
            program: Segment::new(config.program),
            io: Segment::new(config.io),
            display: Segment::new(config.display),
            stack,
            state: CpuState::Running,
            cycles: 0,
            flags: Flags::default(),
            labels: HashMap::new(),
            special,
            sp_max,
            call_depth: 0,
            loaded: false,
            last_instr: None,
        };
        cpu.regs.set(special.sp, sp_max)?;
        Ok(cpu)
    }

    /// Reset the CPU to its freshly constructed state.
    pub fn reset(&mut self) {
        self.regs.reset();
        for id in SegmentId::ALL {
            self.segment_mut(id).clear();
        }
        self.state = CpuState::Running;
        self.cycles = 0;
        self.flags = Flags::default();
        self.labels.clear();
        self.call_depth = 0;
        self.loaded = false;
        self.last_instr = None;
        // The sp offset was validated at construction
        let _ = self.regs.set(self.special.sp, self.sp_max);
    }

    /// Load a program: each function's bytes are copied into the program
    /// segment in order, separated by one padding byte, and its start offset
    /// is recorded in the label table.
    ///
    /// Execution starts at the `main` function when there is one.
    pub fn load_program<N, B>(&mut self, functions: &[(N, B)], byte_count: usize) -> Result<(), CpuError>
    where
        N: AsRef<str>,
        B: AsRef<[u8]>,
    {
        if self.loaded {
            return Err(CpuError::ProgramAlreadyLoaded);
        }
        let actual: usize = functions.iter().map(|(_, bytes)| bytes.as_ref().len()).sum();
        if actual != byte_count {
            return Err(CpuError::ByteCountMismatch {
                declared: byte_count,
                actual,
            });
        }
        let size = byte_count + functions.len();
        if size >= self.program.capacity() {
            return Err(CpuError::ProgramTooLarge {
                size,
                capacity: self.program.capacity(),
            });
        }

        // Lay out every function before touching memory
        let mut layout = Vec::with_capacity(functions.len());
        let mut offset = 0usize;
        for (name, bytes) in functions {
            let start = u16::try_from(offset).map_err(|_| CpuError::ProgramTooLarge {
                size,
                capacity: usize::from(u16::MAX) + 1,
            })?;
            layout.push((name.as_ref(), bytes.as_ref(), start));
            offset += bytes.as_ref().len() + 1;
        }

        for (name, bytes, start) in layout {
            debug!(function = name, offset = start, len = bytes.len(), "loading function");
            self.program.write_bytes(start as usize, bytes)?;
            self.labels.insert(name.to_string(), start);
        }
        self.loaded = true;

        if let Some(&entry) = self.labels.get(ENTRY_FUNCTION) {
            self.jump(entry)?;
        }
        Ok(())
    }

    /// Program offset of a loaded function.
    pub fn label(&self, name: &str) -> Option<u16> {
        self.labels.get(name).copied()
    }

    /// The label table.
    pub fn labels(&self) -> &HashMap<String, u16> {
        &self.labels
    }

    /// Snapshot of the condition flags.
    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// Restore a previously taken flag snapshot.
    pub fn restore_flags(&mut self, flags: Flags) {
        self.flags = flags;
    }

    /// Highest value the stack pointer takes.
    pub fn sp_max(&self) -> u16 {
        self.sp_max
    }

    /// Number of calls without a matching return.
    pub fn call_depth(&self) -> usize {
        self.call_depth
    }

    pub fn segment(&self, id: SegmentId) -> &Segment {
        match id {
            SegmentId::General => &self.general,
            SegmentId::Program => &self.program,
            SegmentId::Io => &self.io,
            SegmentId::Display => &self.display,
            SegmentId::Stack => &self.stack,
        }
    }

    pub fn segment_mut(&mut self, id: SegmentId) -> &mut Segment {
        match id {
            SegmentId::General => &mut self.general,
            SegmentId::Program => &mut self.program,
            SegmentId::Io => &mut self.io,
            SegmentId::Display => &mut self.display,
            SegmentId::Stack => &mut self.stack,
        }
    }

    /// Current instruction pointer.
    pub fn ip(&self) -> u16 {
        self.regs.get(self.special.ip).unwrap_or(0)
    }

    /// Current stack pointer.
    pub fn sp(&self) -> u16 {
        self.regs.get(self.special.sp).unwrap_or(0)
    }

    // ==================== Fetch ====================

    /// Read the byte at `ip` from the program segment and advance `ip`.
    pub fn fetch(&mut self) -> Result<u8, CpuError> {
        let ip = self.regs.get(self.special.ip)?;
        let byte = self.program.get_u8(ip as usize)?;
        self.regs.set(self.special.ip, ip.wrapping_add(1))?;
        Ok(byte)
    }

    /// Read the big-endian word at `ip` and advance `ip` by two.
    pub fn fetch_word(&mut self) -> Result<u16, CpuError> {
        let ip = self.regs.get(self.special.ip)?;
        let word = self.program.get_u16(ip as usize)?;
        self.regs.set(self.special.ip, ip.wrapping_add(2))?;
        Ok(word)
    }

    /// Set `ip` to an absolute program address.
    pub fn jump(&mut self, address: u16) -> Result<(), CpuError> {
        self.regs.set(self.special.ip, address)?;
        Ok(())
    }

    // ==================== Stack ====================

    /// Write `value` at `sp`, then move `sp` down one word.
    ///
    /// At the bottom of the stack the write still happens but `sp` stays put.
    pub fn push(&mut self, value: u16) -> Result<(), CpuError> {
        let address = self.regs.get(self.special.sp)?;
        self.stack.set_u16(address as usize, value)?;
        if address > 0 {
            self.regs.set(self.special.sp, address.saturating_sub(2))?;
        }
        Ok(())
    }

    /// Move `sp` up one word, then read the value at `sp`.
    ///
    /// At the top of the stack `sp` stays put and the top word is read.
    pub fn pop(&mut self) -> Result<u16, CpuError> {
        let mut address = self.regs.get(self.special.sp)?;
        if address < self.sp_max {
            address += 2;
            self.regs.set(self.special.sp, address)?;
        }
        Ok(self.stack.get_u16(address as usize)?)
    }

    // ==================== Execution ====================

    /// Fetch, decode and execute one instruction.
    ///
    /// Returns `true` while the program should keep running and `false` once
    /// `HLT` has executed. Any error is fatal: the CPU enters
    /// [`CpuState::Error`] and refuses to step again.
    pub fn step(&mut self) -> Result<bool, CpuError> {
        if self.state != CpuState::Running {
            return Err(CpuError::NotRunning(self.state));
        }

        match self.step_inner() {
            Ok(instr) => {
                self.cycles += 1;
                self.last_instr = Some(instr);
                Ok(self.state == CpuState::Running)
            }
            Err(e) => {
                warn!(ip = self.ip(), error = %e, "execution aborted");
                self.state = CpuState::Error;
                Err(e)
            }
        }
    }

    fn step_inner(&mut self) -> Result<Instruction, CpuError> {
        let ip = self.ip();

        // Fetch
        let opcode = Opcode::try_from(self.fetch()?)?;

        // Decode
        let instr = Instruction::read(opcode, self)?;
        trace!(ip, ?instr, "execute");

        // Execute
        self.execute(instr)?;
        Ok(instr)
    }

    /// Run until halt or error.
    ///
    /// Returns the number of instructions executed.
    pub fn run(&mut self) -> Result<u64, CpuError> {
        let start_cycles = self.cycles;

        while self.step()? {}

        info!(cycles = self.cycles - start_cycles, "halted");
        Ok(self.cycles - start_cycles)
    }

    /// Run for at most `max_cycles` instructions.
    pub fn run_limited(&mut self, max_cycles: u64) -> Result<u64, CpuError> {
        let start_cycles = self.cycles;
        let limit = self.cycles + max_cycles;

        while self.state == CpuState::Running && self.cycles < limit {
            self.step()?;
        }

        Ok(self.cycles - start_cycles)
    }

    /// Execute a decoded instruction.
    fn execute(&mut self, instr: Instruction) -> Result<(), CpuError> {
        match instr {
            // ==================== Register / Memory ====================

            Instruction::Lw { rd, rs } => {
                let address = self.regs.get(rs)?;
                let word = self.general.get_u16(address as usize)?;
                self.regs.set(rd, word)?;
            }

            Instruction::Sw { rs, rd } => {
                let address = self.regs.get(rd)?;
                let word = self.regs.get(rs)?;
                self.general.set_u16(address as usize, word)?;
            }

            Instruction::Mov { rd, imm } => {
                self.regs.set(rd, imm)?;
            }

            Instruction::Swp { r1, r2 } => {
                let v1 = self.regs.get(r1)?;
                let v2 = self.regs.get(r2)?;
                self.push(v1)?;
                self.push(v2)?;
                let top = self.pop()?;
                self.regs.set(r1, top)?;
                let below = self.pop()?;
                self.regs.set(r2, below)?;
            }

            // ==================== Stack ====================

            Instruction::Psh { rs } => {
                let value = self.regs.get(rs)?;
                self.push(value)?;
            }

            Instruction::Pshi { imm } => {
                self.push(imm)?;
            }

            Instruction::Pop { rd } => {
                let value = self.pop()?;
                self.regs.set(rd, value)?;
            }

            // ==================== Call / Return ====================

            Instruction::Jali { target } => {
                self.call(target)?;
            }

            Instruction::Jal { rs } => {
                let target = self.regs.get(rs)?;
                self.call(target)?;
            }

            Instruction::Ret => {
                self.ret()?;
            }

            // ==================== Arithmetic / Logical ====================

            Instruction::Alu { op, r1, r2 } => {
                let a = self.regs.get(r1)?;
                let b = if op.is_unary() { 0 } else { self.regs.get(r2)? };
                self.compute(op, a, b)?;
            }

            // ==================== Control Flow ====================

            Instruction::Jr { rs } => {
                let address = self.regs.get(rs)?;
                self.jump(address)?;
            }

            Instruction::Ji { target } => {
                self.jump(target)?;
            }

            Instruction::Branch { cond, target } => {
                if cond.holds(self.flags) {
                    self.jump(target)?;
                }
            }

            Instruction::Hlt => {
                self.state = CpuState::Halted;
            }
        }

        Ok(())
    }

    /// Run the ALU, store the truncated result in `ac` and latch the flags.
    /// Flags are back at their reset state if the operation fails.
    fn compute(&mut self, op: AluOp, a: u16, b: u16) -> Result<(), CpuError> {
        self.flags = Flags::default();
        let out = alu::compute(op, a, b)?;
        self.regs.set(self.special.ac, out.word())?;
        self.flags = out.flags;
        Ok(())
    }

    /// Save the caller's frame and jump to `target`.
    ///
    /// Frame layout, top down: return address, saved `fp`. `fp` is left
    /// pointing just below the return address.
    fn call(&mut self, target: u16) -> Result<(), CpuError> {
        let return_address = self.ip();
        let fp = self.regs.get(self.special.fp)?;

        self.push(fp)?;
        self.push(return_address)?;

        let sp = self.sp();
        self.regs.set(self.special.fp, sp)?;
        self.regs.set(self.special.lr, return_address)?;
        self.call_depth += 1;

        debug!(target, return_address, depth = self.call_depth, "call");
        self.jump(target)
    }

    /// Discard the callee's frame, restore the caller's `fp` and return.
    fn ret(&mut self) -> Result<(), CpuError> {
        if self.call_depth == 0 {
            return Err(CpuError::ReturnWithoutCall);
        }

        let fp = self.regs.get(self.special.fp)?;
        self.regs.set(self.special.sp, fp)?;

        let return_address = self.pop()?;
        let saved_fp = self.pop()?;
        self.regs.set(self.special.fp, saved_fp)?;
        self.call_depth -= 1;

        debug!(return_address, depth = self.call_depth, "return");
        self.jump(return_address)
    }

    /// Get the last executed instruction.
    pub fn last_instruction(&self) -> Option<Instruction> {
        self.last_instr
    }

    /// Check if the CPU is halted.
    pub fn is_halted(&self) -> bool {
        self.state == CpuState::Halted
    }

    /// Check if the CPU is running.
    pub fn is_running(&self) -> bool {
        self.state == CpuState::Running
    }

    /// Register dump, one `name : 0000` line per register.
    pub fn dump_registers(&self) -> String {
        self.regs.to_string()
    }
}

impl OperandSource for Cpu {
    type Error = CpuError;

    fn next_byte(&mut self) -> Result<u8, CpuError> {
        self.fetch()
    }

    fn next_word(&mut self) -> Result<u16, CpuError> {
        self.fetch_word()
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("state", &self.state)
            .field("cycles", &self.cycles)
            .field("flags", &self.flags)
            .field("regs", &self.regs)
            .finish()
    }
}

/// Errors that can occur during CPU execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuError {
    #[error("CPU not running: {0:?}")]
    NotRunning(CpuState),

    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("register error: {0}")]
    Register(#[from] RegisterError),

    #[error("ALU error: {0}")]
    Alu(#[from] AluError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("program of {size} bytes does not fit in {capacity} bytes of program memory")]
    ProgramTooLarge { size: usize, capacity: usize },

    #[error("byte count {declared} does not match the {actual} bytes supplied")]
    ByteCountMismatch { declared: usize, actual: usize },

    #[error("a program is already loaded")]
    ProgramAlreadyLoaded,

    #[error("RET executed with no active call")]
    ReturnWithoutCall,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::decode::{encode, Condition};
    use proptest::prelude::*;

    const R1: RegIndex = 6;
    const R2: RegIndex = 8;
    const R3: RegIndex = 10;
    const AC: RegIndex = 4;

    fn make_program(instructions: &[Instruction]) -> Vec<u8> {
        instructions.iter().flat_map(encode).collect()
    }

    fn load(cpu: &mut Cpu, instructions: &[Instruction]) {
        let bytes = make_program(instructions);
        let len = bytes.len();
        cpu.load_program(&[("main", bytes)], len).unwrap();
    }

    fn run(instructions: &[Instruction]) -> Cpu {
        let mut cpu = Cpu::new();
        load(&mut cpu, instructions);
        cpu.run().unwrap();
        cpu
    }

    fn alu(op: AluOp, r1: RegIndex, r2: RegIndex) -> Instruction {
        Instruction::Alu { op, r1, r2 }
    }

    #[test]
    fn test_initial_state() {
        let cpu = Cpu::new();
        assert_eq!(cpu.sp(), 3326);
        assert_eq!(cpu.sp_max(), 3326);
        assert_eq!(cpu.ip(), 0);
        assert_eq!(cpu.regs.get_named("ac").unwrap(), 0);
        assert_eq!(cpu.flags(), Flags::default());
        assert!(cpu.is_running());
    }

    #[test]
    fn test_cpu_halt() {
        let cpu = run(&[Instruction::Hlt]);
        assert!(cpu.is_halted());
        assert_eq!(cpu.cycles, 1);
        assert_eq!(cpu.last_instruction(), Some(Instruction::Hlt));
    }

    #[test]
    fn test_add_program() {
        let cpu = run(&[
            Instruction::Mov { rd: R1, imm: 0x0004 },
            Instruction::Mov { rd: R2, imm: 0x0002 },
            alu(AluOp::Add, R1, R2),
            Instruction::Hlt,
        ]);
        assert_eq!(cpu.regs.get(AC).unwrap(), 0x0006);
        assert!(!cpu.flags().zero);
        assert!(!cpu.flags().negative);
    }

    #[test]
    fn test_push_immediate_pop() {
        let cpu = run(&[
            Instruction::Pshi { imm: 0x0112 },
            Instruction::Pop { rd: R1 },
            Instruction::Hlt,
        ]);
        assert_eq!(cpu.regs.get(R1).unwrap(), 0x0112);
        assert_eq!(cpu.sp(), cpu.sp_max());
    }

    fn branch_program(second: u16) -> Vec<Instruction> {
        // MOV(4) MOV(4) SUB(3) BEQ(3) MOV(4) HLT(1) | target: MOV(4) HLT
        vec![
            Instruction::Mov { rd: R1, imm: 0x0005 },
            Instruction::Mov { rd: R2, imm: second },
            alu(AluOp::Sub, R1, R2),
            Instruction::Branch { cond: Condition::Eq, target: 19 },
            Instruction::Mov { rd: R3, imm: 1 },
            Instruction::Hlt,
            Instruction::Mov { rd: R3, imm: 2 },
            Instruction::Hlt,
        ]
    }

    #[test]
    fn test_branch_taken_on_zero_flag() {
        let cpu = run(&branch_program(0x0005));
        assert_eq!(cpu.regs.get(R3).unwrap(), 2);
    }

    #[test]
    fn test_branch_not_taken() {
        let cpu = run(&branch_program(0x0006));
        assert_eq!(cpu.regs.get(R3).unwrap(), 1);
    }

    #[test]
    fn test_branch_reads_flags_not_registers() {
        // r1 == r2, but the latest ALU result (r1 + r2) is non-zero
        let cpu = run(&[
            Instruction::Mov { rd: R1, imm: 3 },
            Instruction::Mov { rd: R2, imm: 3 },
            alu(AluOp::Add, R1, R2),
            Instruction::Branch { cond: Condition::Eq, target: 19 },
            Instruction::Mov { rd: R3, imm: 1 },
            Instruction::Hlt,
            Instruction::Mov { rd: R3, imm: 2 },
            Instruction::Hlt,
        ]);
        assert_eq!(cpu.regs.get(R3).unwrap(), 1);
    }

    #[test]
    fn test_flag_snapshot_restore() {
        let mut cpu = Cpu::new();
        load(&mut cpu, &[
            Instruction::Branch { cond: Condition::Lt, target: 4 },
            Instruction::Hlt,
            Instruction::Mov { rd: R3, imm: 7 },
            Instruction::Hlt,
        ]);
        let negative = Flags { zero: false, negative: true, overflow: false };
        cpu.restore_flags(negative);
        cpu.run().unwrap();
        assert_eq!(cpu.regs.get(R3).unwrap(), 7);
        assert_eq!(cpu.flags(), negative);
    }

    #[test]
    fn test_load_store_general() {
        let cpu = run(&[
            Instruction::Mov { rd: R1, imm: 0xBEEF },
            Instruction::Mov { rd: R2, imm: 0x0010 },
            Instruction::Sw { rs: R1, rd: R2 },
            Instruction::Lw { rd: R3, rs: R2 },
            Instruction::Hlt,
        ]);
        assert_eq!(cpu.general.get_u16(0x10).unwrap(), 0xBEEF);
        assert_eq!(cpu.regs.get(R3).unwrap(), 0xBEEF);
    }

    #[test]
    fn test_store_out_of_bounds_aborts() {
        let mut cpu = Cpu::new();
        load(&mut cpu, &[
            Instruction::Mov { rd: R2, imm: 2047 },
            Instruction::Sw { rs: R1, rd: R2 },
            Instruction::Hlt,
        ]);
        let err = cpu.run().unwrap_err();
        assert_eq!(
            err,
            CpuError::Memory(MemoryError::AddressOutOfBounds { addr: 2048, capacity: 2048 })
        );
        assert_eq!(cpu.state, CpuState::Error);
        assert!(matches!(cpu.step(), Err(CpuError::NotRunning(CpuState::Error))));
    }

    #[test]
    fn test_swap() {
        let cpu = run(&[
            Instruction::Mov { rd: R1, imm: 1 },
            Instruction::Mov { rd: R2, imm: 2 },
            Instruction::Swp { r1: R1, r2: R2 },
            Instruction::Hlt,
        ]);
        assert_eq!(cpu.regs.get(R1).unwrap(), 2);
        assert_eq!(cpu.regs.get(R2).unwrap(), 1);
        assert_eq!(cpu.sp(), cpu.sp_max());
    }

    #[test]
    fn test_arithmetic_truncates_into_ac() {
        let cpu = run(&[
            Instruction::Mov { rd: R1, imm: 0x0100 },
            Instruction::Mov { rd: R2, imm: 0x0101 },
            alu(AluOp::Mul, R1, R2),
            Instruction::Hlt,
        ]);
        assert_eq!(cpu.regs.get(AC).unwrap(), 0x0100);
        assert!(cpu.flags().overflow);
    }

    #[test]
    fn test_not() {
        let cpu = run(&[
            Instruction::Mov { rd: R1, imm: 0x00FF },
            alu(AluOp::Not, R1, 0),
            Instruction::Hlt,
        ]);
        assert_eq!(cpu.regs.get(AC).unwrap(), 0xFF00);
        assert!(cpu.flags().negative);
    }

    #[test]
    fn test_divide_by_zero_aborts() {
        let mut cpu = Cpu::new();
        load(&mut cpu, &[alu(AluOp::Div, R1, R2), Instruction::Hlt]);
        assert_eq!(cpu.run(), Err(CpuError::Alu(AluError::DivideByZero)));
        assert!(!cpu.is_running());
    }

    #[test]
    fn test_failed_division_resets_flags() {
        let mut cpu = Cpu::new();
        load(&mut cpu, &[
            Instruction::Mov { rd: R1, imm: 5 },
            Instruction::Mov { rd: R2, imm: 6 },
            alu(AluOp::Sub, R1, R2),
            alu(AluOp::Div, R1, R3),
            Instruction::Hlt,
        ]);
        assert_eq!(cpu.run(), Err(CpuError::Alu(AluError::DivideByZero)));
        assert_eq!(cpu.flags(), Flags::default());
    }

    #[test]
    fn test_unknown_instruction() {
        let mut cpu = Cpu::new();
        cpu.load_program(&[("main", vec![0x00])], 1).unwrap();
        assert_eq!(
            cpu.run(),
            Err(CpuError::Decode(DecodeError::UnknownInstruction(0x00)))
        );
    }

    #[test]
    fn test_invalid_register_operand() {
        let mut cpu = Cpu::new();
        load(&mut cpu, &[Instruction::Mov { rd: 7, imm: 1 }]);
        assert_eq!(
            cpu.run(),
            Err(CpuError::Register(RegisterError::IndexNotFound(7)))
        );
    }

    #[test]
    fn test_jumps() {
        let cpu = run(&[
            Instruction::Ji { target: 7 },          // 0
            Instruction::Mov { rd: R3, imm: 1 },    // 3
            Instruction::Mov { rd: R1, imm: 15 },   // 7
            Instruction::Jr { rs: R1 },             // 11
            Instruction::Hlt,                       // 13
            Instruction::Hlt,                       // 14
            Instruction::Mov { rd: R2, imm: 9 },    // 15
            Instruction::Hlt,
        ]);
        assert_eq!(cpu.regs.get(R3).unwrap(), 0);
        assert_eq!(cpu.regs.get(R2).unwrap(), 9);
    }

    #[test]
    fn test_fetch_advances_ip() {
        let mut cpu = Cpu::new();
        cpu.load_program(&[("main", vec![0x01, 0x02, 0x03])], 3).unwrap();
        assert_eq!(cpu.fetch().unwrap(), 0x01);
        assert_eq!(cpu.ip(), 1);
        assert_eq!(cpu.fetch_word().unwrap(), 0x0203);
        assert_eq!(cpu.ip(), 3);
    }

    #[test]
    fn test_load_program_layout() {
        let mut cpu = Cpu::new();
        let functions = [
            ("main", vec![1u8, 2, 3, 4, 5]),
            ("helper", vec![6u8, 7, 8]),
        ];
        cpu.load_program(&functions, 8).unwrap();

        assert_eq!(cpu.label("main"), Some(0));
        assert_eq!(cpu.label("helper"), Some(6));
        assert_eq!(cpu.labels().len(), 2);
        assert_eq!(cpu.program.slice(0, 9).unwrap(), &[1, 2, 3, 4, 5, 0, 6, 7, 8]);
        assert_eq!(cpu.ip(), 0);
    }

    #[test]
    fn test_entry_is_main() {
        let mut cpu = Cpu::new();
        let functions = [("helper", vec![0xFFu8]), ("main", vec![0xFFu8])];
        cpu.load_program(&functions, 2).unwrap();
        assert_eq!(cpu.ip(), 2);
    }

    #[test]
    fn test_program_too_large() {
        let mut cpu = Cpu::new();
        let bytes = vec![0xFFu8; 2047];
        assert_eq!(
            cpu.load_program(&[("main", bytes)], 2047),
            Err(CpuError::ProgramTooLarge { size: 2048, capacity: 2048 })
        );

        let bytes = vec![0xFFu8; 2046];
        assert!(cpu.load_program(&[("main", bytes)], 2046).is_ok());
    }

    #[test]
    fn test_byte_count_mismatch_leaves_cpu_untouched() {
        let mut cpu = Cpu::new();
        let functions = [("main", vec![0xFFu8; 4]), ("helper", vec![0xFFu8; 4])];
        assert_eq!(
            cpu.load_program(&functions, 3),
            Err(CpuError::ByteCountMismatch { declared: 3, actual: 8 })
        );
        assert!(cpu.labels().is_empty());
        assert_eq!(cpu.program.get_u8(0).unwrap(), 0);
        assert!(cpu.load_program(&functions, 8).is_ok());
    }

    #[test]
    fn test_program_segment_beyond_16_bits() {
        let mut config = CpuConfig::default();
        config.program = 70_000;
        assert!(matches!(
            Cpu::with_config(&config),
            Err(CpuError::Config(ConfigError::SegmentTooLarge { segment: "program", .. }))
        ));

        // The largest valid segment still keeps every label addressable
        config.program = 0x10000;
        let mut cpu = Cpu::with_config(&config).unwrap();
        let functions = [("big", vec![0xFFu8; 0xFFFC]), ("main", vec![0xFFu8])];
        cpu.load_program(&functions, 0xFFFD).unwrap();
        assert_eq!(cpu.label("main"), Some(0xFFFD));
        assert_eq!(cpu.ip(), 0xFFFD);
    }

    #[test]
    fn test_program_loaded_once() {
        let mut cpu = Cpu::new();
        cpu.load_program(&[("main", vec![0xFFu8])], 1).unwrap();
        assert_eq!(
            cpu.load_program(&[("main", vec![0xFFu8])], 1),
            Err(CpuError::ProgramAlreadyLoaded)
        );
        cpu.reset();
        assert!(cpu.load_program(&[("main", vec![0xFFu8])], 1).is_ok());
    }

    #[test]
    fn test_push_clamps_at_bottom() {
        let mut cpu = Cpu::new();
        cpu.regs.set_named("sp", 0).unwrap();
        cpu.push(0x1111).unwrap();
        assert_eq!(cpu.sp(), 0);
        cpu.push(0x2222).unwrap();
        assert_eq!(cpu.sp(), 0);
        assert_eq!(cpu.stack.get_u16(0).unwrap(), 0x2222);
    }

    #[test]
    fn test_pop_clamps_at_top() {
        let mut cpu = Cpu::new();
        cpu.stack.set_u16(cpu.sp_max() as usize, 0xABCD).unwrap();
        assert_eq!(cpu.pop().unwrap(), 0xABCD);
        assert_eq!(cpu.sp(), cpu.sp_max());
    }

    #[test]
    fn test_call_and_return() {
        // helper at 0: MOV r1, 42; RET
        // main at 6:  JALI 0; MOV r2, 7; HLT
        let helper = make_program(&[Instruction::Mov { rd: R1, imm: 42 }, Instruction::Ret]);
        let main = make_program(&[
            Instruction::Jali { target: 0 },
            Instruction::Mov { rd: R2, imm: 7 },
            Instruction::Hlt,
        ]);
        let count = helper.len() + main.len();
        let mut cpu = Cpu::new();
        cpu.load_program(&[("helper", helper), ("main", main)], count).unwrap();
        assert_eq!(cpu.ip(), 6);

        cpu.run().unwrap();
        assert_eq!(cpu.regs.get(R1).unwrap(), 42);
        assert_eq!(cpu.regs.get(R2).unwrap(), 7);
        assert_eq!(cpu.regs.get_named("lr").unwrap(), 9);
        assert_eq!(cpu.regs.get_named("fp").unwrap(), 0);
        assert_eq!(cpu.sp(), cpu.sp_max());
        assert_eq!(cpu.call_depth(), 0);
    }

    #[test]
    fn test_return_discards_callee_frame() {
        // helper pushes without popping; RET must still find the return address
        let helper = make_program(&[
            Instruction::Pshi { imm: 0x1234 },
            Instruction::Pshi { imm: 0x5678 },
            Instruction::Ret,
        ]);
        let main = make_program(&[
            Instruction::Mov { rd: R1, imm: 0 },
            Instruction::Jal { rs: R1 },
            Instruction::Mov { rd: R2, imm: 1 },
            Instruction::Hlt,
        ]);
        let count = helper.len() + main.len();
        let mut cpu = Cpu::new();
        cpu.load_program(&[("helper", helper), ("main", main)], count).unwrap();
        cpu.run().unwrap();

        assert_eq!(cpu.regs.get(R2).unwrap(), 1);
        assert_eq!(cpu.sp(), cpu.sp_max());
    }

    #[test]
    fn test_return_without_call() {
        let mut cpu = Cpu::new();
        load(&mut cpu, &[Instruction::Ret]);
        assert_eq!(cpu.run(), Err(CpuError::ReturnWithoutCall));
    }

    #[test]
    fn test_run_limited() {
        let mut cpu = Cpu::new();
        load(&mut cpu, &[Instruction::Ji { target: 0 }]);
        assert_eq!(cpu.run_limited(10).unwrap(), 10);
        assert!(cpu.is_running());
    }

    #[test]
    fn test_reset_restores_initial_state() {
        let mut cpu = run(&[Instruction::Pshi { imm: 1 }, Instruction::Hlt]);
        cpu.reset();
        assert!(cpu.is_running());
        assert_eq!(cpu.sp(), cpu.sp_max());
        assert_eq!(cpu.cycles, 0);
        assert!(cpu.labels().is_empty());
        assert_eq!(cpu.stack.get_u16(cpu.sp_max() as usize).unwrap(), 0);
    }

    #[test]
    fn test_custom_config() {
        let config = CpuConfig::with_memory_size(256);
        let cpu = Cpu::with_config(&config).unwrap();
        assert_eq!(cpu.stack.capacity(), 104);
        assert_eq!(cpu.sp(), 102);

        let mut bad = CpuConfig::default();
        bad.registers.retain(|r| r != "ip");
        assert!(matches!(
            Cpu::with_config(&bad),
            Err(CpuError::Config(ConfigError::MissingRegister(_)))
        ));
    }

    #[test]
    fn test_dump_registers() {
        let cpu = Cpu::new();
        let dump = cpu.dump_registers();
        assert!(dump.starts_with("ip : 0000\n"));
        assert!(dump.contains("sp : 0cfe\n"));
    }

    proptest! {
        #[test]
        fn prop_push_pop_inverse(value in any::<u16>(), depth in 1u16..100) {
            let mut cpu = Cpu::new();
            let sp = cpu.sp_max() - depth * 2;
            cpu.regs.set_named("sp", sp).unwrap();

            cpu.push(value).unwrap();
            prop_assert_eq!(cpu.pop().unwrap(), value);
            prop_assert_eq!(cpu.sp(), sp);
        }
    }
}
