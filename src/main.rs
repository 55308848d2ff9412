use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::net::TcpStream;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use mailtrust::client_auth::read_certificate_file;
use mailtrust::{
    negotiate_starttls, Config, ConnectionAttempt, ConnectionMode, MailProtocol, ServerIdentity,
    TrustError, TrustStoreManager, TrustedSocketFactory,
};

/// Inspect and manage trusted mail server certificates
#[derive(Parser)]
#[command(name = "mailtrust")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List approved certificates
    List,

    /// Connect to a server and report whether its certificate is trusted
    Check {
        host: String,
        port: u16,
        /// Negotiate STARTTLS first (imap, pop3, smtp)
        #[arg(long, value_name = "PROTOCOL")]
        starttls: Option<MailProtocol>,
    },

    /// Approve the certificate a server presents, or one read from a file
    Approve {
        host: String,
        port: u16,
        #[arg(long, value_name = "PROTOCOL")]
        starttls: Option<MailProtocol>,
        /// PEM or DER certificate to approve without connecting
        #[arg(long, value_name = "FILE")]
        cert: Option<PathBuf>,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Remove the approved certificate of a server
    Revoke { host: String, port: u16 },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match cli.config.or_else(|| Config::default_path().filter(|p| p.exists())) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();
    debug!("Using trust store {:?}", config.store.path);

    let (factory, manager) = config.build()?;

    match cli.command {
        Commands::List => list(&manager),
        Commands::Check { host, port, starttls } => {
            let identity = ServerIdentity::new(host, port);
            match connect(&factory, &identity, starttls).await {
                Ok(trust) => println!("✓ {} is trusted ({})", identity, trust),
                Err(e) => report(&e),
            }
        }
        Commands::Approve {
            host,
            port,
            starttls,
            cert,
            yes,
        } => {
            let identity = ServerIdentity::new(host, port);
            match cert {
                Some(path) => {
                    let der = read_certificate_file(&path)?;
                    let entry = manager.add_exception(&identity, &der)?;
                    println!("✓ Approved {} for {}", entry.fingerprint().short(), identity);
                }
                None => approve(&factory, &manager, identity, starttls, yes).await?,
            }
        }
        Commands::Revoke { host, port } => {
            let identity = ServerIdentity::new(host, port);
            if manager.remove_exception(&identity)? {
                println!("✓ Removed approved certificate for {}", identity);
            } else {
                println!("No approved certificate for {}", identity);
            }
        }
    }

    Ok(())
}

async fn connect(
    factory: &TrustedSocketFactory,
    identity: &ServerIdentity,
    starttls: Option<MailProtocol>,
) -> mailtrust::Result<mailtrust::TrustReason> {
    let mode = match starttls {
        Some(protocol) => {
            let mut stream = TcpStream::connect((identity.host(), identity.port())).await?;
            negotiate_starttls(&mut stream, protocol).await?;
            ConnectionMode::StartTlsUpgrade(stream)
        }
        None => ConnectionMode::DirectTls,
    };
    let stream = factory.create_socket(identity, mode).await?;
    Ok(stream.trust)
}

async fn approve(
    factory: &TrustedSocketFactory,
    manager: &TrustStoreManager,
    identity: ServerIdentity,
    starttls: Option<MailProtocol>,
    yes: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut attempt = ConnectionAttempt::new(identity.clone());

    attempt.begin()?;
    let result = connect(factory, &identity, starttls).await;
    attempt.finish(result.as_ref().copied())?;

    let certificate = match result {
        Ok(trust) => {
            println!("✓ {} is already trusted ({})", identity, trust);
            return Ok(());
        }
        Err(TrustError::UntrustedCertificate { certificate, .. }) => certificate,
        Err(e) => {
            report(&e);
            return Ok(());
        }
    };

    println!("⚠ Untrusted certificate from {}", identity);
    print!("{}", certificate.describe());
    if !yes && !confirm("Trust this certificate? (y/n) ")? {
        println!("Not approved");
        return Ok(());
    }

    attempt.approve(manager)?;
    attempt.begin()?;
    let result = connect(factory, &identity, starttls).await;
    attempt.finish(result.as_ref().copied())?;
    match result {
        Ok(trust) => println!("✓ {} is now trusted ({})", identity, trust),
        Err(e) => report(&e),
    }
    Ok(())
}

fn list(manager: &TrustStoreManager) {
    let entries = manager.store().entries();
    if entries.is_empty() {
        println!("No approved certificates");
        return;
    }
    println!("Approved certificates:");
    for entry in entries {
        println!(
            "  {} - {} (added {})",
            entry.identity(),
            entry.fingerprint().short(),
            entry.added_at()
        );
    }
}

fn report(error: &TrustError) {
    match error {
        TrustError::UntrustedCertificate { identity, certificate } => {
            println!("✗ Certificate for {} is not trusted", identity);
            print!("{}", certificate.describe());
            println!("  Run `mailtrust approve {} {}` to trust it", identity.host(), identity.port());
        }
        TrustError::HostnameMismatch { identity } => {
            println!("✗ Certificate does not match host name {}", identity.host());
        }
        other => println!("✗ Connection failed: {}", other),
    }
}

fn confirm(prompt: &str) -> io::Result<bool> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
