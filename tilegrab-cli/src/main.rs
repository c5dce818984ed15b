//! Entry point for the command-line interface.
#![forbid(unsafe_code)]

fn main() {
    env_logger::init();
    if let Err(err) = tilegrab_cli::run() {
        eprintln!("tilegrab: {err}");
        std::process::exit(1);
    }
}
