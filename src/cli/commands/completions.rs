//! Completions command - print shell completion scripts

use crate::cli::args::Cli;
use crate::error::WheelsmithResult;
use clap::CommandFactory;
use clap_complete::{generate, Shell};

pub fn execute(shell: Shell) -> WheelsmithResult<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut std::io::stdout());
    Ok(())
}
