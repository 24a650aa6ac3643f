use clap::Parser;

fn main() -> miette::Result<()> {
    grapa_run::Cli::parse().run()
}
