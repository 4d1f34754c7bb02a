//! Command-line argument parsing

use super::{Config, ConfigError, MasterAddr};

/// Parse command line arguments into a configuration.
/// `args` excludes the program name.
pub fn parse_args(args: &[String]) -> Result<Config, ConfigError> {
    let mut config = Config::default();
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                let value = take_value(args, &mut i, "--port")?;
                config.port = value
                    .parse::<u16>()
                    .map_err(|_| ConfigError::InvalidValue {
                        arg: "--port".to_string(),
                        value,
                    })?;
            }

            "--bind" => {
                config.bind_addr = take_value(args, &mut i, "--bind")?;
            }

            "--replicaof" => {
                // Two values: host and port
                let host = take_value(args, &mut i, "--replicaof")?;
                let port_str = take_value(args, &mut i, "--replicaof")?;
                let port = port_str
                    .parse::<u16>()
                    .map_err(|_| ConfigError::InvalidValue {
                        arg: "--replicaof".to_string(),
                        value: port_str,
                    })?;
                config.replicaof = Some(MasterAddr { host, port });
            }

            "--dir" => {
                config.dir = take_value(args, &mut i, "--dir")?;
            }

            "--dbfilename" => {
                config.dbfilename = take_value(args, &mut i, "--dbfilename")?;
            }

            other => {
                return Err(ConfigError::UnknownArgument(other.to_string()));
            }
        }
        i += 1;
    }

    Ok(config)
}

fn take_value(args: &[String], i: &mut usize, name: &str) -> Result<String, ConfigError> {
    *i += 1;
    args.get(*i)
        .cloned()
        .ok_or_else(|| ConfigError::MissingValue(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config, ConfigError> {
        let owned: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        parse_args(&owned)
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.port, 6379);
        assert_eq!(config.bind_addr, "127.0.0.1");
        assert!(config.replicaof.is_none());
        assert_eq!(config.dbfilename, "dump.rdb");
    }

    #[test]
    fn test_port_and_bind() {
        let config = parse(&["--port", "7000", "--bind", "0.0.0.0"]).unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.bind_addr, "0.0.0.0");
    }

    #[test]
    fn test_replicaof() {
        let config = parse(&["--replicaof", "localhost", "6379"]).unwrap();
        let master = config.replicaof.unwrap();
        assert_eq!(master.host, "localhost");
        assert_eq!(master.port, 6379);
    }

    #[test]
    fn test_snapshot_path() {
        let config = parse(&["--dir", "/tmp/data", "--dbfilename", "state.rdb"]).unwrap();
        assert_eq!(config.snapshot_path(), std::path::PathBuf::from("/tmp/data/state.rdb"));
    }

    #[test]
    fn test_invalid_port() {
        assert!(parse(&["--port", "not-a-port"]).is_err());
        assert!(parse(&["--port"]).is_err());
    }

    #[test]
    fn test_unknown_argument() {
        assert!(matches!(
            parse(&["--cluster"]),
            Err(ConfigError::UnknownArgument(_))
        ));
    }
}
