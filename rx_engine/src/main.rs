mod cli;
mod runtime;

use anyhow::Result;

fn main() -> Result<()> {
    env_logger::init();
    let args = cli::parse()?;
    runtime::execute(args)
}
