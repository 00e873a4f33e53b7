//! Command line interface for the `amqp-bridge` demo binary.
//!
//! The binary drives a scripted AMQP 1.0 session against the in-memory
//! broker; the flags tune the session limits it runs with.

use clap::Parser;

/// Command line arguments for the `amqp-bridge` binary.
#[derive(Debug, Parser)]
#[command(
    name = "amqp-bridge",
    version,
    about = "Run a scripted AMQP 1.0 session against an in-memory backend"
)]
pub struct Cli {
    /// Queue the demo publishes to and consumes from.
    #[arg(short, long, default_value = "demo")]
    pub queue: String,

    /// Number of messages to round-trip.
    #[arg(short, long, default_value_t = 3)]
    pub messages: u32,

    /// Session credit requested by the receiving link.
    #[arg(long, default_value_t = 100)]
    pub session_credit: u32,

    /// Link credit granted to peers sending on incoming links.
    #[arg(long, default_value_t = 100)]
    pub incoming_link_credit: u32,

    /// Largest payload carried by one transfer fragment, in bytes.
    #[arg(long, default_value_t = 64 * 1024)]
    pub max_fragment_size: usize,

    /// Largest reassembled message accepted from the peer, in bytes.
    #[arg(long, default_value_t = 16 * 1024 * 1024)]
    pub max_message_size: usize,

    /// Print the Prometheus rendering of the recorded metrics on exit.
    #[arg(long)]
    pub print_metrics: bool,
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::Cli;

    #[test]
    fn defaults_match_session_defaults() {
        let cli = Cli::parse_from(["amqp-bridge"]);
        assert_eq!(cli.queue, "demo");
        assert_eq!(cli.messages, 3);
        assert_eq!(cli.session_credit, 100);
        assert!(!cli.print_metrics);
    }

    #[test]
    fn parses_limits() {
        let cli = Cli::parse_from([
            "amqp-bridge",
            "--queue",
            "orders",
            "--session-credit",
            "7",
            "--max-fragment-size",
            "512",
        ]);
        assert_eq!(cli.queue, "orders");
        assert_eq!(cli.session_credit, 7);
        assert_eq!(cli.max_fragment_size, 512);
    }
}
