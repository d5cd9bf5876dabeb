use clap::{Parser, Subcommand, ValueEnum};
use rand::{rngs::StdRng, Rng, SeedableRng};
use ranklink::{launch, BootstrapArgs, Communicator, Environment, Op, Result, Source};

#[derive(Debug, Clone, Subcommand)]
enum Program {
    /// Estimate pi by throwing darts at the unit square on every rank
    Pi {
        /// Darts thrown by each rank
        #[arg(default_value_t = 10000)]
        darts: usize,
    },
    /// Rank 0 pings every other rank, which reply with their host id
    PingPong,
    /// Pass a growing message once around the ring of ranks
    Ring,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Strategy {
    /// This process is one rank; peers come from --rank and --peers
    Peers,
    /// Run all ranks as threads, over in-process channels
    Local,
    /// Run all ranks as threads, over loopback TCP
    Tcp,
}

#[derive(Debug, Clone, Parser)]
#[command(version, about, long_about = None)]
struct Opts {
    #[command(subcommand)]
    program: Program,

    #[arg(short, long, value_enum, default_value_t = Strategy::Peers)]
    strategy: Strategy,

    /// Number of ranks to run with the local and tcp strategies
    #[arg(short = 'n', long, default_value_t = 4)]
    num_ranks: usize,

    #[command(flatten)]
    bootstrap: BootstrapArgs,
}

impl Program {
    fn run(&self, world: &Communicator) -> Result<()> {
        match self {
            Program::Pi { darts } => pi(world, *darts),
            Program::PingPong => ping_pong(world),
            Program::Ring => ring(world),
        }
    }
}

fn pi(world: &Communicator, darts: usize) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(5 * world.rank() as u64);
    let darts_in_circle = (0..darts)
        .filter(|_| {
            let x = (rng.gen::<f64>() - 0.5) * 2.0;
            let y = (rng.gen::<f64>() - 0.5) * 2.0;
            x * x + y * y <= 1.0
        })
        .count() as i64;

    if let Some(total) = world.reduce(darts_in_circle, Op::Sum, 0)? {
        let thrown = (world.size() * darts) as f64;
        println!("Pi is approximately {}", 4.0 * total as f64 / thrown);
    }
    Ok(())
}

fn ping_pong(world: &Communicator) -> Result<()> {
    if world.rank() == 0 {
        println!("Rank 0 is alive and running on {}", world.host_id());
        for dest in 1..world.size() {
            println!("Pinging process with rank {}...", dest);
            world.send("Ping!", dest, 0)?;
            let dest_host: String = world.receive(Source::Rank(dest), 1)?;
            println!(" Pong!");
            println!("  Rank {} is alive and running on {}", dest, dest_host);
        }
    } else {
        let _ping: String = world.receive(Source::Rank(0), 0)?;
        world.send(world.host_id(), 0, 1)?;
    }
    Ok(())
}

fn ring(world: &Communicator) -> Result<()> {
    if world.size() < 2 {
        eprintln!("Error: the ring needs at least 2 ranks");
        return Ok(());
    }
    let msg: String = if world.rank() == 0 {
        world.send("Rosie", 1, 0)?;
        world.receive(Source::Any, 0)?
    } else {
        let msg: String = world.receive(Source::Rank(world.rank() - 1), 0)?;
        world.send(
            format!("{}, {}", msg, world.rank()),
            (world.rank() + 1) % world.size(),
            0,
        )?;
        msg
    };
    println!("Rank {} received message \"{}\".", world.rank(), msg);
    Ok(())
}

fn main_peers(opts: Opts) -> Result<()> {
    let env = Environment::init(&opts.bootstrap)?;
    let result = opts.program.run(env.world());
    env.dispose();
    result
}

fn main_threads(opts: Opts) -> Result<()> {
    let config = opts.bootstrap.config()?;
    let program = opts.program.clone();
    let job = move |comm: Communicator| program.run(&comm);

    let outcomes = match opts.strategy {
        Strategy::Tcp => launch::run_tcp(opts.num_ranks, config, job)?,
        _ => launch::run_local(opts.num_ranks, config, job)?,
    };
    outcomes.into_iter().collect()
}

fn main() {
    env_logger::init();
    let opts = Opts::parse();

    let result = match opts.strategy {
        Strategy::Peers => main_peers(opts),
        Strategy::Local | Strategy::Tcp => main_threads(opts),
    };
    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
