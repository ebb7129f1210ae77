use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Instant;

use nodal_core::bpe::MergeRule;
use nodal_core::format::{ENTRY_SIZE, HEADER_SIZE};
use nodal_core::program::{
    BufferDType, BufferDecl, BufferInit, OpDecl, Prepared, Program, TensorRef,
};
use nodal_core::{Executor, NdbnWriter, OpKind, RuntimeConfig, Scalar, TensorTable, Workspace};

#[derive(Parser)]
#[command(name = "nodal")]
#[command(about = "Zero-copy tensor tape runtime for NDBN models")]
#[command(version)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a model and execute a tape file against it
    Run {
        /// Path to the .ndbn model
        model: PathBuf,

        /// JSON tape file
        #[arg(long)]
        tape: PathBuf,

        /// Runtime table capacity
        #[arg(long)]
        capacity: Option<usize>,

        /// JSON runtime config
        #[arg(long)]
        config: Option<PathBuf>,

        /// Use the portable kernels only
        #[arg(long)]
        generic: bool,

        /// Time the run
        #[arg(long)]
        bench: bool,

        /// Timed iterations for --bench
        #[arg(long, default_value = "1")]
        iters: u32,

        /// Report static sizes
        #[arg(long)]
        audit: bool,

        /// Print every declared buffer after the run
        #[arg(long)]
        dump: bool,
    },

    /// Show the header and tensor table of a model
    Inspect {
        /// Path to the .ndbn model
        model: PathBuf,

        /// Runtime table capacity
        #[arg(long, default_value = "1024")]
        capacity: usize,
    },

    /// Write an NDBN model
    Pack {
        /// Output path
        out: PathBuf,

        /// Write a small deterministic test model
        #[arg(long)]
        mock: bool,

        /// Also write a tape file exercising the mock model
        #[arg(long)]
        emit_tape: Option<PathBuf>,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let result = match cli.command {
        Commands::Run {
            model,
            tape,
            capacity,
            config,
            generic,
            bench,
            iters,
            audit,
            dump,
        } => {
            let opts = RunOptions {
                bench,
                iters: iters.max(1),
                audit,
                dump,
            };
            load_config(config.as_deref(), capacity, generic)
                .and_then(|cfg| cmd_run(&model, &tape, &cfg, &opts))
        }
        Commands::Inspect { model, capacity } => cmd_inspect(&model, capacity),
        Commands::Pack {
            out,
            mock,
            emit_tape,
        } => cmd_pack(&out, mock, emit_tape.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

struct RunOptions {
    bench: bool,
    iters: u32,
    audit: bool,
    dump: bool,
}

fn load_config(
    path: Option<&Path>,
    capacity: Option<usize>,
    generic: bool,
) -> Result<RuntimeConfig> {
    let mut cfg = match path {
        Some(p) => RuntimeConfig::from_path(p)
            .with_context(|| format!("reading config {}", p.display()))?,
        None => RuntimeConfig::default(),
    };
    if let Some(c) = capacity {
        cfg.table_capacity = c;
    }
    if generic {
        cfg.accelerated = false;
    }
    if cfg.table_capacity == 0 {
        bail!("table capacity must be at least 1");
    }
    Ok(cfg)
}

fn cmd_run(model: &Path, tape_path: &Path, cfg: &RuntimeConfig, opts: &RunOptions) -> Result<()> {
    let start = Instant::now();
    let (mapping, table) = nodal_core::load(model, cfg.table_capacity)
        .with_context(|| format!("loading {}", model.display()))?;
    let load_time = start.elapsed();

    let program = Program::from_path(tape_path)
        .with_context(|| format!("reading tape {}", tape_path.display()))?;
    let Prepared {
        tape,
        mut workspace,
        buffers,
    } = program.prepare(&table, cfg).context("resolving tape")?;
    tracing::info!(
        "tape {}: {} ops over {} buffers",
        tape_path.display(),
        tape.len(),
        buffers.len()
    );

    let executor = Executor::new(cfg.registry());
    let pristine = opts.bench.then(|| workspace.clone());

    let start = Instant::now();
    executor
        .run(&tape, &mapping, &table, &mut workspace)
        .context("executing tape")?;
    let first = start.elapsed();

    if opts.audit {
        print_audit(&table, &tape, &workspace, cfg);
    }

    if let Some(pristine) = pristine {
        let mut total = first;
        for _ in 1..opts.iters {
            let mut ws = pristine.clone();
            let start = Instant::now();
            executor.run(&tape, &mapping, &table, &mut ws)?;
            total += start.elapsed();
        }
        eprintln!("load: {:.3}ms", load_time.as_secs_f64() * 1000.0);
        eprintln!(
            "run:  {:.3}ms avg over {} iteration(s), {} ops, kernels: {}",
            total.as_secs_f64() * 1000.0 / opts.iters as f64,
            opts.iters,
            tape.len(),
            if cfg.accelerated {
                nodal_core::simd::level_name()
            } else {
                "generic"
            }
        );
    }

    if opts.dump {
        for (decl, id) in &buffers {
            println!("{} = {}", decl.name, render(&workspace, *id, decl.dtype())?);
        }
    }
    Ok(())
}

fn render(ws: &Workspace, id: nodal_core::TensorId, dtype: BufferDType) -> Result<String> {
    Ok(match dtype {
        BufferDType::F32 => format!("{:?}", ws.f32s(id)?),
        BufferDType::U32 => format!("{:?}", ws.u32s(id)?),
        BufferDType::Bytes => format!("{:?}", String::from_utf8_lossy(ws.bytes(id)?)),
    })
}

fn print_audit(
    table: &TensorTable,
    tape: &nodal_core::Tape,
    ws: &Workspace,
    cfg: &RuntimeConfig,
) {
    let model_bytes: u64 = table.tensors().map(|(_, s)| s.data.len).sum();
    let ws_bytes: usize = (0..ws.len())
        .filter_map(|i| ws.bytes(ws.base() + i as u32).ok())
        .map(<[u8]>::len)
        .sum();
    println!("audit:");
    println!("  header:         {HEADER_SIZE} B");
    println!("  table entry:    {ENTRY_SIZE} B");
    println!("  kernel call:    {} B", std::mem::size_of::<nodal_core::KernelCall<'_>>());
    println!("  operation:      {} B", std::mem::size_of::<nodal_core::Operation>());
    println!(
        "  runtime table:  {} slots ({} usable), {} tensors",
        table.capacity(),
        table.usable_capacity(),
        table.tensor_count()
    );
    println!("  tensor data:    {}", format_bytes(model_bytes));
    println!("  workspace:      {} buffers, {}", ws.len(), format_bytes(ws_bytes as u64));
    println!("  tape:           {} ops", tape.len());
    println!("  bpe scratch:    {} tokens", cfg.bpe_scratch_capacity);
}

fn cmd_inspect(model: &Path, capacity: usize) -> Result<()> {
    let (mapping, table) = nodal_core::load(model, capacity)
        .with_context(|| format!("loading {}", model.display()))?;

    println!("file:     {} ({})", model.display(), format_bytes(mapping.len() as u64));
    println!(
        "tensors:  {} (table capacity {}, usable {})",
        table.tensor_count(),
        table.capacity(),
        table.usable_capacity()
    );
    for (id, slot) in table.tensors() {
        let Some(entry) = slot.entry else { continue };
        let shape: Vec<String> = entry.dims().iter().map(|d| d.to_string()).collect();
        let elements = entry
            .num_elements()
            .map_or_else(|| "overflow".to_string(), |n| n.to_string());
        print!(
            "  [{id:>4}] {:<5} [{}] {elements} elems  @{} {}",
            format!("{:?}", entry.dtype),
            shape.join("x"),
            slot.data.offset,
            format_bytes(slot.data.len)
        );
        match slot.aux {
            Some(aux) => println!("  aux @{} {}", aux.offset, format_bytes(aux.len)),
            None => println!(),
        }
    }
    if let Some(id) = table.vocab_id() {
        let slot = table.get(id)?;
        let summary = match nodal_core::bpe::MergeTable::parse(table.view(id, &mapping)?) {
            Ok(rules) => format!("{} merge rules", rules.len()),
            Err(e) => format!("unreadable ({e})"),
        };
        println!(
            "vocab:    slot {id} @{} {}, {summary}",
            slot.data.offset,
            format_bytes(slot.data.len)
        );
    }
    Ok(())
}

fn cmd_pack(out: &Path, mock: bool, emit_tape: Option<&Path>) -> Result<()> {
    if !mock {
        bail!("only --mock models can be packed");
    }

    let mut w = NdbnWriter::new();
    let dense: Vec<f32> = (0..16).map(|i| ((i * 7) % 16) as f32 / 8.0 - 1.0).collect();
    let weight = w.add_f32(&[4, 4], &dense)?;
    let quant: Vec<f32> = (0..16).map(|i| ((i * 5) % 16) as f32 / 16.0 - 0.5).collect();
    let (qweight, qscales) = w.add_nf4(4, 4, &quant, 4)?;
    let h = b'h' as u32;
    let e = b'e' as u32;
    let l = b'l' as u32;
    w.set_merge_rules(&[
        MergeRule::new(h, e, 0),
        MergeRule::new(l, l, 1),
        MergeRule::new(256, 257, 2),
    ]);
    w.write_to(out)
        .with_context(|| format!("writing {}", out.display()))?;
    println!("wrote {} ({} tensors + vocab)", out.display(), w.num_tensors());

    if let Some(path) = emit_tape {
        let program = mock_program(weight, qweight, qscales);
        let text = serde_json::to_string_pretty(&program)?;
        std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
        println!("wrote {}", path.display());
    }
    Ok(())
}

fn mock_program(weight: u32, qweight: u32, qscales: u32) -> Program {
    let buf = |name: &str, bytes: Option<usize>, init: Option<BufferInit>, dtype| BufferDecl {
        name: name.into(),
        bytes,
        init,
        dtype,
    };
    let b = |name: &str| TensorRef::Buffer(name.into());
    let op = |kind, inputs, outputs, scalars: &[u32]| OpDecl {
        kind,
        inputs,
        outputs,
        scalars: scalars.iter().map(|&s| Scalar::U32(s)).collect(),
    };

    Program {
        buffers: vec![
            buf("x", None, Some(BufferInit::F32(vec![1.0, 2.0, 3.0, 4.0])), None),
            buf("h", Some(16), None, None),
            buf("q", Some(16), None, None),
            buf("p", Some(16), None, None),
            buf("prompt", None, Some(BufferInit::Text("hello".into())), None),
            buf("ids", Some(32), None, Some(BufferDType::U32)),
            buf("count", Some(4), None, Some(BufferDType::U32)),
        ],
        ops: vec![
            op(OpKind::MatMul, vec![b("x"), TensorRef::Tensor(weight)], vec![b("h")], &[1, 4, 4]),
            op(
                OpKind::MatMulNf4,
                vec![b("h"), TensorRef::Tensor(qweight), TensorRef::Tensor(qscales)],
                vec![b("q")],
                &[1, 4, 4, 4],
            ),
            op(OpKind::Softmax, vec![b("q")], vec![b("p")], &[4]),
            op(
                OpKind::TokenizeBpe,
                vec![b("prompt"), TensorRef::Vocab],
                vec![b("ids"), b("count")],
                &[5, 8],
            ),
        ],
    }
}

fn format_bytes(n: u64) -> String {
    if n >= 1024 * 1024 * 1024 {
        format!("{:.2} GB", n as f64 / (1024.0 * 1024.0 * 1024.0))
    } else if n >= 1024 * 1024 {
        format!("{:.2} MB", n as f64 / (1024.0 * 1024.0))
    } else if n >= 1024 {
        format!("{:.2} KB", n as f64 / 1024.0)
    } else {
        format!("{n} B")
    }
}
