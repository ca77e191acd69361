//! Inkboard Web Server
//!
//! Self-hosted dashboard for organizing, sharing and collaboratively
//! editing drawing documents.

use clap::Parser;
use inkboard_core::{init_logging, LoggingConfig};
use inkboard_web::{InkboardServer, WebConfig};

/// Inkboard Web Server - collaborative drawing dashboard
#[derive(Parser)]
#[command(name = "inkboard-web")]
#[command(about = "A self-hosted collaborative drawing dashboard")]
#[command(version)]
struct Args {
    /// Server host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Enable development mode (relaxes origin checks for localhost)
    #[arg(long)]
    dev: bool,

    /// Database URL for persistent storage
    #[arg(long)]
    database_url: Option<String>,

    /// Front-end origins allowed to send mutation requests
    #[arg(long, value_delimiter = ',')]
    allowed_origin: Vec<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let logging = LoggingConfig {
        level: args.log_level.clone(),
        ..LoggingConfig::default()
    };
    if let Err(e) = init_logging(&logging) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    // Load environment variables
    dotenvy::dotenv().ok();

    let mut config = WebConfig::from_env();

    // Override with command line arguments
    config.host = args.host;
    config.port = args.port;
    if args.dev {
        config.inkboard.csrf.dev_mode = true;
    }
    if args.database_url.is_some() {
        config.inkboard.storage.database_url = args.database_url;
    }
    if !args.allowed_origin.is_empty() {
        config.inkboard.csrf.allowed_origins = args.allowed_origin;
    }

    println!("🚀 Starting Inkboard Web Server");
    println!("📍 Server: http://{}:{}", config.host, config.port);
    println!("🔧 Development mode: {}", config.inkboard.csrf.dev_mode);
    if let Some(db_url) = &config.inkboard.storage.database_url {
        println!("🗄️  Database: {}", db_url);
    } else {
        println!("🗄️  Database: in-memory (state is lost on restart)");
    }

    if std::env::var("INKBOARD_CSRF_SECRET").is_err() {
        println!("⚠️  INKBOARD_CSRF_SECRET is not set.");
        println!("   CSRF tokens will not validate across instances or restarts.");
    }

    let server = match InkboardServer::new(config).await {
        Ok(server) => server,
        Err(e) => {
            eprintln!("❌ Failed to build server: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = server.start().await {
        eprintln!("❌ Server failed: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parsing() {
        use clap::Parser;

        let args = Args::parse_from(["inkboard-web"]);
        assert_eq!(args.host, "127.0.0.1");
        assert_eq!(args.port, 8080);
        assert!(!args.dev);

        let args = Args::parse_from([
            "inkboard-web",
            "--host",
            "0.0.0.0",
            "--port",
            "3000",
            "--dev",
            "--allowed-origin",
            "https://draw.example.com,https://other.example.com",
        ]);
        assert_eq!(args.host, "0.0.0.0");
        assert_eq!(args.port, 3000);
        assert!(args.dev);
        assert_eq!(args.allowed_origin.len(), 2);
    }
}
