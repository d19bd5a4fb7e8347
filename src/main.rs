use clap::Parser;

use hopshell::app::{self, EXIT_FAILURE, LaunchOptions};
use hopshell::ui::SessionMode;
use hopshell::{init_panic_hook, init_tracing};

#[derive(Parser, Debug)]
#[command(author, version, about = "Interactive SSH and SFTP client with jump host support")]
struct Cli {
    /// Inventory file; defaults to ~/.hopshell.yaml merged with ~/.sshw.yaml
    #[arg(short, long)]
    config: Option<String>,

    /// Log level, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Connect straight to `group/leaf` without the picker
    #[arg(long)]
    host: Option<String>,

    /// Session type for --host
    #[arg(long, value_enum, requires = "host")]
    mode: Option<SessionMode>,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(&cli.log_level) {
        eprintln!("Failed to initialize logging: {e}");
    }
    init_panic_hook();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start async runtime: {e}");
            std::process::exit(EXIT_FAILURE);
        }
    };

    let code = runtime.block_on(app::run(LaunchOptions {
        config: cli.config,
        host: cli.host,
        mode: cli.mode,
    }));

    // Blocked stdin readers live on detached threads; do not wait for them.
    runtime.shutdown_background();
    std::process::exit(code);
}
