//! Serves a single script run for a `ScriptRunner` configured with a script
//! worker. The runner writes the generated script to stdin and reads the
//! result from stdout.

use std::io;

fn main() {
    if let Err(e) = quarry::serve_worker(io::stdin().lock(), io::stdout().lock()) {
        eprintln!("Failed: {}", e);
        std::process::exit(1);
    }
}
