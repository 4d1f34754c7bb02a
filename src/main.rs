//! Rubidium server binary

use rubidium::config::cli::parse_args;
use rubidium::Server;
use std::process;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let config = match parse_args(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("rubidium-server: {}", err);
            eprintln!("Usage: rubidium-server [--port PORT] [--bind ADDR] [--replicaof HOST PORT] [--dir DIR] [--dbfilename FILE]");
            process::exit(1);
        }
    };

    println!("Rubidium v{} starting", rubidium::VERSION);

    let mut server = match Server::new(config) {
        Ok(server) => server,
        Err(err) => {
            eprintln!("Failed to start server: {}", err);
            process::exit(1);
        }
    };

    if let Err(err) = server.run() {
        eprintln!("Server error: {}", err);
        process::exit(1);
    }
}
