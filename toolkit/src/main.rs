use clap::Parser;
use toolkit::Cli;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cmd: Cli = Cli::parse();
    cmd.run_program()
}
