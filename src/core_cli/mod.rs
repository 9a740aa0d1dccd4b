use structopt::StructOpt;

/// Command-line arguments.
#[derive(Debug, StructOpt)]
#[structopt(name = "oxyftpd", about = "A multi-user FTP(S) server.")]
pub struct Cli {
    /// Path to the configuration file
    #[structopt(short, long, default_value = "/etc/oxyftpd.toml")]
    pub config: String,

    /// Override the listen port from the configuration file
    #[structopt(short, long)]
    pub port: Option<u16>,

    /// Enable verbose logging
    #[structopt(short, long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_arguments() {
        let cli = Cli::from_iter(&["oxyftpd"]);
        assert_eq!(cli.config, "/etc/oxyftpd.toml");
        assert_eq!(cli.port, None);
        assert!(!cli.verbose);
    }

    #[test]
    fn port_override_parsed() {
        let cli = Cli::from_iter(&["oxyftpd", "-c", "ftpd.toml", "-p", "2121"]);
        assert_eq!(cli.config, "ftpd.toml");
        assert_eq!(cli.port, Some(2121));
    }
}
