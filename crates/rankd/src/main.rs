use anyhow::Context;
use clap::Parser;
use rankd::{init_logging, plans, registry_summary, serve, Args, Reply};
use std::io::Read;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log);

    if args.print_registry {
        println!("{}", registry_summary());
        return Ok(());
    }
    if args.list_plans {
        let names = plans::list_plans(&args.plan_dir)?;
        println!("Available plans in {}:", args.plan_dir.display());
        for name in names {
            println!("  {name}");
        }
        return Ok(());
    }

    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("failed to read request from stdin")?;

    match serve(&args, &input) {
        Ok(Reply::Ok(response)) => {
            println!("{response}");
            Ok(())
        }
        Ok(Reply::Rejected(body)) => {
            println!("{body}");
            std::process::exit(1);
        }
        Err(err) => {
            tracing::error!(error = ?err, "request failed");
            Err(err)
        }
    }
}
