//! Generates `jumpbox.1` plus one page per subcommand (`jumpbox-up.1`, ...)
//! into `OUT_DIR` from the shared clap definitions.

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

fn render(command: clap::Command, out_dir: &Path, title: &str) -> io::Result<()> {
    let mut buffer = Vec::new();
    Man::new(command).title(title).render(&mut buffer)?;
    fs::write(out_dir.join(format!("{title}.1")), buffer)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir = PathBuf::from(
        env::var_os("OUT_DIR")
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "OUT_DIR was not set"))?,
    );

    let command = cli::Cli::command();
    for sub in command.get_subcommands() {
        let title = format!("jumpbox-{}", sub.get_name());
        render(sub.clone(), &out_dir, &title)?;
    }
    render(command, &out_dir, "jumpbox")?;

    Ok(())
}
