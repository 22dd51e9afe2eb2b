use std::fs::File;
use std::io;
use std::io::BufReader;
use std::io::BufWriter;
use std::net::TcpListener;
use std::os::unix::net::UnixListener;
use std::path::Path;
use std::path::PathBuf;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use log::info;
use log::warn;

use tracedbg::arch::riscv::Rv32;
use tracedbg::arch::riscv::Rv64;
use tracedbg::arch::Isa;
use tracedbg::conn::ConnectionExt;
use tracedbg::dut::NullDut;
use tracedbg::shadow::AddressBlock;
use tracedbg::shadow::CoreConfig;
use tracedbg::shadow::ShadowSystem;
use tracedbg::shadow::SystemConfig;
use tracedbg::trace::read_trace_body;
use tracedbg::trace::write_trace;
use tracedbg::trace::RetiredFor;
use tracedbg::trace::TraceFileHeader;
use tracedbg::DebugStub;
use tracedbg::DisconnectReason;
use tracedbg::StubError;

const DEFAULT_SOCKET: &str = "unix-socket";

#[derive(Parser, Debug)]
#[command(
    version,
    about = "CPU debug server for recorded hardware simulation traces"
)]
struct Args {
    /// TCP port to listen on
    #[arg(
        short = 'p',
        long,
        conflicts_with = "socket",
        num_args = 0..=1,
        default_missing_value = "1234"
    )]
    port: Option<u16>,

    /// UNIX socket path to listen on (default 'unix-socket')
    #[arg(short = 's', long)]
    socket: Option<PathBuf>,

    /// Simulation trace record input file
    #[arg(short = 'i', long)]
    input: Option<PathBuf>,

    /// Processed trace output file
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Verbose output
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Enable debugging output
    #[arg(short = 'd', long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.debug {
        log::LevelFilter::Trace
    } else if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    // the trace file header fixes the architecture width; without a trace,
    // serve an empty 32-bit recording
    match &args.input {
        Some(path) => {
            let mut file = BufReader::new(
                File::open(path).with_context(|| format!("opening trace {}", path.display()))?,
            );
            let header = TraceFileHeader::read(&mut file)
                .with_context(|| format!("reading trace header of {}", path.display()))?;
            match header.xlen as usize {
                w if w == core::mem::size_of::<u32>() => serve::<Rv32>(&args, file, header),
                w if w == core::mem::size_of::<u64>() => serve::<Rv64>(&args, file, header),
                w => bail!("unsupported XLEN width {} in trace file", w),
            }
        }
        None => {
            let header = TraceFileHeader {
                version: 1,
                xlen: 4,
                flen: 4,
                vlen: 4,
                harts: 1,
            };
            serve::<Rv32>(&args, io::empty(), header)
        }
    }
}

fn serve<I: Isa>(
    args: &Args,
    trace_input: impl io::Read,
    header: TraceFileHeader,
) -> Result<()> {
    let trace: Vec<RetiredFor<I>> =
        read_trace_body::<I, _>(trace_input, &header).context("reading trace records")?;
    info!(
        "loaded {} retired instruction(s) for {} {} hart(s)",
        trace.len(),
        I::name(),
        header.harts
    );

    let config = system_config::<I>(header.harts.max(1));
    let mut sys = ShadowSystem::<I>::new(&config, trace).context("configuring shadow")?;
    let mut dut = NullDut;

    let listener = Listener::bind(args)?;

    loop {
        let conn = listener.accept()?;
        info!("debugger connected");

        match DebugStub::new(conn).run(&mut sys, &mut dut) {
            Ok(DisconnectReason::Detach) => {
                info!("debugger detached; shadow preserved, awaiting reconnect");
            }
            Ok(DisconnectReason::Kill) => {
                info!("debugger sent kill");
                break;
            }
            Err(StubError::Shadow(e)) => {
                // the shadow no longer matches the recording; nothing
                // truthful left to serve
                bail!("fatal shadow error: {}", e);
            }
            Err(e) => {
                warn!("session ended: {}; awaiting reconnect", e);
            }
        }
    }

    if let Some(path) = &args.output {
        let file = BufWriter::new(
            File::create(path)
                .with_context(|| format!("creating trace output {}", path.display()))?,
        );
        write_trace::<I, _>(file, header.harts, sys.trace())
            .with_context(|| format!("writing processed trace to {}", path.display()))?;
        info!("wrote processed trace to {}", path.display());
    }

    Ok(())
}

/// The default SoC address map: one RAM region and one MMIO region per core.
fn system_config<I: Isa>(harts: u8) -> SystemConfig<I::Xlen> {
    let word = |v: u64| I::Xlen::from_u64(v).expect("address fits XLEN");
    let core = CoreConfig {
        mem: vec![AddressBlock {
            base: word(0x8000_0000),
            size: word(0x0001_0000),
        }],
        i_o: vec![AddressBlock {
            base: word(0x8001_0000),
            size: word(0x0001_0000),
        }],
    };

    SystemConfig {
        cores: vec![core; harts as usize],
        mem: Vec::new(),
        i_o: Vec::new(),
    }
}

enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl Listener {
    fn bind(args: &Args) -> Result<Self> {
        if let Some(port) = args.port {
            let addr = format!("0.0.0.0:{}", port);
            let listener =
                TcpListener::bind(&addr).with_context(|| format!("binding TCP {}", addr))?;
            info!("listening on tcp {}", addr);
            return Ok(Listener::Tcp(listener));
        }

        let path = args
            .socket
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET));
        remove_stale_socket(&path)?;
        let listener = UnixListener::bind(&path)
            .with_context(|| format!("binding UNIX socket {}", path.display()))?;
        info!("listening on unix socket {}", path.display());
        Ok(Listener::Unix(listener))
    }

    fn accept(&self) -> Result<Box<dyn ConnectionExt<Error = io::Error>>> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, addr) = listener.accept().context("accepting TCP connection")?;
                info!("connection from {}", addr);
                Ok(Box::new(stream))
            }
            Listener::Unix(listener) => {
                let (stream, _) = listener.accept().context("accepting UNIX connection")?;
                Ok(Box::new(stream))
            }
        }
    }
}

fn remove_stale_socket(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("removing stale socket {}", path.display())),
    }
}
