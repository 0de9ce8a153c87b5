use clap::Parser;
use hammer::{DumbConsoleProgress, ExecConfig, Executor, GraphBuilder};
use hammer_cli::ham;

mod cli;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();
    if let Err(err) = run(&args) {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run(args: &cli::Args) -> anyhow::Result<()> {
    let script = ham::load("Hammer")?;

    let mut builder = GraphBuilder::new();
    let opts = ham::EvalOptions {
        dir: args.dir.clone(),
    };
    {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        ham::Evaluator::new(&mut builder, &opts, &mut out).eval_script(&script)?;
    }
    let graph = builder.build()?;

    let cfg = ExecConfig {
        parallelism: args.jobs.unwrap_or(1).clamp(1, 1024),
        force: args.force,
    };
    let progress = DumbConsoleProgress;
    let mut exec = Executor::new(&cfg, &graph, &progress);

    if args.targets.is_empty() {
        if exec.want_default().is_none() {
            anyhow::bail!("Nothing to build.");
        }
    } else {
        for target in &args.targets {
            if !exec.want(target) {
                anyhow::bail!("No rule to build '{target}'.");
            }
        }
    }

    exec.run()?;
    Ok(())
}
