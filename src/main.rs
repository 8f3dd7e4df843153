//! vm16 Emulator - CLI Entry Point
//!
//! Commands:
//! - `vm16-emu run <program>` - Run an ASM file or JSON image
//! - `vm16-emu debug <program>` - Interactive debugger
//! - `vm16-emu asm <source>` - Assemble to a JSON image
//! - `vm16-emu disasm <image>` - Disassemble an image
//! - `vm16-emu calc <a> <op> <b>` - Evaluate one ALU operation

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use vm16::asm::{Program, assemble_with, load_image};
use vm16::cpu::{CpuConfig, load_config};

#[derive(Parser)]
#[command(name = "vm16-emu")]
#[command(author = "Yigit")]
#[command(version = "0.1.0")]
#[command(about = "A simulator for a simple 16-bit register machine")]
struct Cli {
    /// Machine configuration (JSON); defaults to the 8 KiB reference layout
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program until it halts
    Run {
        /// Path to the ASM or JSON image file to execute
        program: String,
        /// Maximum number of cycles to run (default: 10000)
        #[arg(short, long, default_value = "10000")]
        max_cycles: u64,
        /// Show trace output
        #[arg(short, long)]
        trace: bool,
    },
    /// Interactive debugger
    Debug {
        /// Path to the ASM or JSON image file to debug
        program: String,
    },
    /// Assemble source to a JSON image
    Asm {
        /// Path to the source file
        source: String,
        /// Output image file
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Disassemble a program
    Disasm {
        /// Path to the ASM or JSON image file
        program: String,
    },
    /// Evaluate a single ALU operation, e.g. `calc 7 / -2` or `calc 5 ~`
    Calc {
        #[arg(allow_hyphen_values = true)]
        a: String,
        #[arg(allow_hyphen_values = true)]
        op: String,
        /// Second operand; omitted for unary operators
        #[arg(allow_hyphen_values = true)]
        b: Option<String>,
    },
    /// Run the built-in self-test
    Test,
}

fn main() {
    let cli = Cli::parse();

    let trace = matches!(cli.command, Some(Commands::Run { trace: true, .. }));
    init_logging(trace);

    let config = machine_config(cli.config.as_deref());

    match cli.command {
        Some(Commands::Run { program, max_cycles, trace: _ }) => {
            run_program(&program, &config, max_cycles);
        }
        Some(Commands::Debug { program }) => {
            debug_program(&program, config);
        }
        Some(Commands::Asm { source, output }) => {
            assemble_file(&source, &config, output);
        }
        Some(Commands::Disasm { program }) => {
            disassemble_file(&program, &config);
        }
        Some(Commands::Calc { a, op, b }) => {
            calc(&a, &op, b.as_deref());
        }
        Some(Commands::Test) => {
            run_self_test();
        }
        None => {
            println!("vm16 Emulator v0.1.0");
            println!("A 16-bit register machine simulator");
            println!();
            println!("Use --help for available commands");
            println!();
            demo();
        }
    }
}

/// Install the log subscriber. `RUST_LOG` wins unless `--trace` was given.
fn init_logging(trace: bool) {
    let filter = if trace {
        EnvFilter::new("trace")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn machine_config(path: Option<&str>) -> CpuConfig {
    let Some(path) = path else {
        return CpuConfig::default();
    };
    match load_config(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load config: {}", e);
            std::process::exit(1);
        }
    }
}

/// Load an ASM file (assembling it) or a JSON image.
fn load_program(path: &str, config: &CpuConfig) -> Program {
    let program = if path.ends_with(".asm") {
        let source = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("❌ Failed to read file: {}", e);
                std::process::exit(1);
            }
        };

        match assemble_with(&source, &config.registers) {
            Ok(program) => {
                println!("📝 Assembled {} bytes in {} function(s)", program.byte_count, program.functions.len());
                program
            }
            Err(e) => {
                eprintln!("❌ Assembly error: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        match load_image(path) {
            Ok(program) => {
                println!("📂 Loaded {} bytes in {} function(s)", program.byte_count, program.functions.len());
                program
            }
            Err(e) => {
                eprintln!("❌ Failed to load image: {}", e);
                std::process::exit(1);
            }
        }
    };

    if program.is_empty() {
        eprintln!("❌ No instructions to execute");
        std::process::exit(1);
    }
    program
}

fn run_program(path: &str, config: &CpuConfig, max_cycles: u64) {
    use vm16::Cpu;

    println!("🔧 Running: {}", path);
    let program = load_program(path, config);

    // Create CPU and load program
    let mut cpu = match Cpu::with_config(config) {
        Ok(cpu) => cpu,
        Err(e) => {
            eprintln!("❌ Invalid machine: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = program.load_into(&mut cpu) {
        eprintln!("❌ Failed to load program: {}", e);
        std::process::exit(1);
    }

    println!();
    println!("━━━ Execution ━━━");

    let result = cpu.run_limited(max_cycles);

    println!();
    println!("━━━ Result ━━━");
    println!("Cycles: {}", cpu.cycles);
    println!("State: {:?}", cpu.state);
    let flags = cpu.flags();
    println!("Flags: zero={} negative={} overflow={}", flags.zero, flags.negative, flags.overflow);
    println!();
    print!("{}", cpu.dump_registers());

    if let Err(e) = result {
        eprintln!();
        eprintln!("❌ CPU error at ip={:04x}: {}", cpu.ip(), e);
        std::process::exit(1);
    }

    if cpu.is_running() {
        println!();
        println!("⚠️  Reached max cycles limit ({}). Use --max-cycles to increase.", max_cycles);
    }
}

#[cfg(feature = "tui")]
fn debug_program(path: &str, config: CpuConfig) {
    use vm16::tui::run_debugger;

    println!("🔍 Loading: {}", path);
    let program = load_program(path, &config);

    println!("🚀 Launching debugger...");
    println!();

    if let Err(e) = run_debugger(program, config) {
        eprintln!("❌ Debugger error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(not(feature = "tui"))]
fn debug_program(_path: &str, _config: CpuConfig) {
    eprintln!("❌ Built without the `tui` feature");
    std::process::exit(1);
}

fn assemble_file(source_path: &str, config: &CpuConfig, output: Option<String>) {
    use vm16::save_image;

    let out_path = output.unwrap_or_else(|| {
        source_path.replace(".asm", ".json")
    });

    println!("📝 Assembling: {} → {}", source_path, out_path);

    let source = match std::fs::read_to_string(source_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ Failed to read file: {}", e);
            std::process::exit(1);
        }
    };

    let program = match assemble_with(&source, &config.registers) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("❌ Assembly error: {}", e);
            std::process::exit(1);
        }
    };

    println!("✓ Assembled {} bytes", program.byte_count);
    for (name, offset) in program.labels() {
        println!("  {:04x}  {}", offset, name);
    }

    if let Err(e) = save_image(&out_path, &program) {
        eprintln!("❌ Failed to save image: {}", e);
        std::process::exit(1);
    }

    println!("✓ Saved to {}", out_path);
}

fn disassemble_file(path: &str, config: &CpuConfig) {
    use vm16::Registers;
    use vm16::asm::disasm::disassemble;

    println!("📖 Disassembling: {}", path);
    println!();

    let program = load_program(path, config);
    let regs = Registers::new(&config.registers);
    println!("{}", disassemble(&program, &regs));
}

fn calc(a: &str, op: &str, b: Option<&str>) {
    use vm16::cpu::alu::{compute, AluOp};

    let parse = |s: &str| -> u16 {
        let parsed = match s.strip_prefix("0x") {
            Some(hex) => i64::from_str_radix(hex, 16),
            None => s.parse::<i64>(),
        };
        match parsed {
            Ok(v) if (i16::MIN as i64..=u16::MAX as i64).contains(&v) => v as u16,
            _ => {
                eprintln!("❌ Not a 16-bit value: {}", s);
                std::process::exit(1);
            }
        }
    };

    let op: AluOp = match op.parse() {
        Ok(op) => op,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    };
    let a = parse(a);
    let b = match (op.is_unary(), b) {
        (true, _) => 0,
        (false, Some(b)) => parse(b),
        (false, None) => {
            eprintln!("❌ {} needs two operands", op);
            std::process::exit(1);
        }
    };

    match compute(op, a, b) {
        Ok(out) => {
            println!("result: {} (0x{:04x})", out.result, out.word());
            println!("flags:  zero={} negative={} overflow={}", out.flags.zero, out.flags.negative, out.flags.overflow);
        }
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    }
}

fn demo() {
    use vm16::{Cpu, assemble};

    println!("━━━ Demo: 4 + 2 ━━━");
    println!();

    let source = "MOV r1, 0x0004\nMOV r2, 0x0002\nADD r1, r2\nHLT";
    println!("{}", source);
    println!();

    let mut cpu = Cpu::new();
    let outcome = assemble(source)
        .map_err(|e| e.to_string())
        .and_then(|program| program.load_into(&mut cpu).map_err(|e| e.to_string()))
        .and_then(|()| cpu.run().map_err(|e| e.to_string()));

    match outcome {
        Ok(cycles) => {
            println!("Halted after {} cycles", cycles);
            print!("{}", cpu.dump_registers());
        }
        Err(e) => eprintln!("❌ {}", e),
    }
}

fn run_self_test() {
    use vm16::{Cpu, assemble};
    use vm16::cpu::alu::{compute, AluOp};
    use vm16::cpu::Segment;

    println!("━━━ vm16 Emulator Self-Test ━━━");
    println!();

    let mut passed = 0;
    let mut failed = 0;

    // Test 1: Additive identity
    print!("ALU additive identity... ");
    let ok = [0u16, 1, 0x7FFF, 0x8000, 0xFFFF]
        .iter()
        .all(|&a| compute(AluOp::Add, a, 0).map(|o| o.word()) == Ok(a));
    if ok { println!("✓"); passed += 1; }
    else { println!("✗"); failed += 1; }

    // Test 2: Division by zero
    print!("ALU division by zero rejected... ");
    if compute(AluOp::Div, 7, 0).is_err() && compute(AluOp::Mod, 7, 0).is_err() {
        println!("✓");
        passed += 1;
    } else {
        println!("✗");
        failed += 1;
    }

    // Test 3: Segment word round-trip
    print!("Segment word round-trip... ");
    let mut seg = Segment::new(16);
    let ok = seg.set_u16(14, 0xBEEF).is_ok() && seg.get_u16(14) == Ok(0xBEEF) && seg.get_u16(15).is_err();
    if ok { println!("✓"); passed += 1; }
    else { println!("✗"); failed += 1; }

    // Test 4: Push/pop inverse
    print!("Stack push/pop inverse... ");
    let mut cpu = Cpu::new();
    let sp = cpu.sp();
    let ok = cpu.push(0x1234).is_ok() && cpu.pop() == Ok(0x1234) && cpu.sp() == sp;
    if ok { println!("✓"); passed += 1; }
    else { println!("✗"); failed += 1; }

    // Test 5: End-to-end add
    print!("CPU mov/add/halt... ");
    let mut cpu = Cpu::new();
    let ok = assemble("MOV r1, 4\nMOV r2, 2\nADD r1, r2\nHLT")
        .ok()
        .and_then(|p| p.load_into(&mut cpu).ok())
        .and_then(|()| cpu.run().ok())
        .is_some();
    if ok && cpu.is_halted() && cpu.regs.get_named("ac") == Ok(6) {
        println!("✓");
        passed += 1;
    } else {
        println!("✗");
        failed += 1;
    }

    // Test 6: Call and return
    print!("CPU call/return... ");
    let mut cpu = Cpu::new();
    let ok = assemble("f:\nMOV r3, 9\nRET\nmain:\nJALI f\nHLT")
        .ok()
        .and_then(|p| p.load_into(&mut cpu).ok())
        .and_then(|()| cpu.run().ok())
        .is_some();
    if ok && cpu.regs.get_named("r3") == Ok(9) && cpu.sp() == cpu.sp_max() {
        println!("✓");
        passed += 1;
    } else {
        println!("✗");
        failed += 1;
    }

    println!();
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Results: {} passed, {} failed", passed, failed);

    if failed == 0 {
        println!("✓ All tests passed!");
    } else {
        std::process::exit(1);
    }
}
