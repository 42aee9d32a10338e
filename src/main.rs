use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ft_coordinator::{Admission, FtClient, FtConfig, MAX_SLOTS, Server, current_pid, current_tid};

#[derive(Parser, Debug)]
#[command(name = "ft-coordinator")]
#[command(version)]
#[command(about = "Primary/replica fault-tolerance coordinator over shared memory")]
#[command(propagate_version = true)]
struct Args {
    /// Prefix of every shared-memory region name
    #[arg(long, global = true, default_value = "ft")]
    namespace: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the coordinator: one dispatcher plus one heartbeat monitor per slot
    Server(ServerArgs),

    /// Run the admission handshake, then a demo workload if admitted
    Client(ClientArgs),
}

#[derive(Parser, Debug)]
struct ServerArgs {
    /// Number of supervised slots
    #[arg(long, default_value_t = MAX_SLOTS)]
    slots: usize,

    /// Dispatcher cadence in microseconds
    #[arg(long, default_value_t = 50)]
    dispatch_us: u64,

    /// Heartbeat monitor cadence in milliseconds
    #[arg(long, default_value_t = 1)]
    monitor_ms: u64,

    /// Unchanged monitor ticks after which a primary is considered dead
    #[arg(long, default_value_t = 50)]
    stale_ticks: u32,
}

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Role label: "main" or "replica"
    role: String,

    /// Slot index
    slot: usize,

    /// Workload iterations to run once admitted (0 runs forever)
    #[arg(long, default_value_t = 0)]
    iterations: u64,

    /// Duration of one workload iteration in milliseconds
    #[arg(long, default_value_t = 1000)]
    work_ms: u64,
}

fn run_server(namespace: String, args: ServerArgs) -> ft_coordinator::Result<()> {
    let config = FtConfig::new(namespace)
        .with_slots(args.slots)
        .with_dispatch_interval(Duration::from_micros(args.dispatch_us))
        .with_monitor_interval(Duration::from_millis(args.monitor_ms))
        .with_stale_threshold(args.stale_ticks);

    let handle = Server::new(config)?.launch()?;
    handle.wait();
    Ok(())
}

fn run_client(namespace: String, args: ClientArgs) -> ft_coordinator::Result<()> {
    let client = FtClient::connect(FtConfig::new(namespace))?;
    let (pid, tid) = (current_pid(), current_tid());

    let emitter = match client.request(pid, tid, &args.role, args.slot)? {
        Admission::Admitted(emitter) => emitter,
        Admission::Rejected => {
            tracing::warn!(role = %args.role, slot = args.slot, "not allowed to run, exiting");
            return Ok(());
        }
    };

    let work = Duration::from_millis(args.work_ms);
    let mut iteration = 0u64;
    while args.iterations == 0 || iteration < args.iterations {
        iteration += 1;
        tracing::info!(role = %args.role, slot = args.slot, iteration, "working");
        std::thread::sleep(work);
    }

    emitter.stop();
    tracing::info!(role = %args.role, slot = args.slot, iterations = iteration, "workload finished");
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let res = match args.command {
        Commands::Server(server_args) => run_server(args.namespace, server_args),
        Commands::Client(client_args) => run_client(args.namespace, client_args),
    };

    if let Err(err) = res {
        tracing::error!(error = %err, "fatal");
        std::process::exit(1);
    }
}
